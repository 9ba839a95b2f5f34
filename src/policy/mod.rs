//! Policy abstraction, invocation context and error type.
//!
//! A policy is any named unit of behavior the dispatcher, the query iterator
//! or another policy can invoke with a parameter document and a
//! configuration document. Policies reach collaborators and other policies
//! only through the [`PolicyInvoker`] in their context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::log_errors_enabled;
use crate::error::{ErrorCode, HostError};
use crate::query::QueryError;
use crate::retention::RetentionError;
use crate::services::{ServiceError, Services};
use crate::verification::VerificationError;

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchError, DispatchReport, PolicyDescriptor, PolicyDispatcher};
pub use registry::PolicyRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One failed invocation collected by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFailure {
    /// Name of the policy that failed.
    pub policy: String,
    /// Numeric status code.
    pub code: i32,
    /// Failure message.
    pub message: String,
}

/// Errors returned by policies.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Missing or malformed parameter or configuration.
    #[error("{policy}: {message}")]
    InvalidInput {
        /// Policy that rejected its input.
        policy: String,
        /// What was wrong.
        message: String,
    },
    /// No policy is registered under the name.
    #[error("policy [{0}] is not registered")]
    UnknownPolicy(String),
    /// Two replicas compared different.
    #[error("verification [{mode}] failed for [{logical_path}] between [{source_resource}] and [{destination_resource}]")]
    VerificationFailed {
        /// Object that was verified.
        logical_path: String,
        /// Resource holding the reference replica.
        source_resource: String,
        /// Resource holding the replica under test.
        destination_resource: String,
        /// Verification mode used.
        mode: String,
    },
    /// A recomputed checksum disagreed with the catalog.
    #[error("checksum mismatch for [{logical_path}] on resource [{resource}] computed [{computed}] catalog [{catalog}]")]
    ChecksumMismatch {
        /// Object that was checked.
        logical_path: String,
        /// Resource holding the replica.
        resource: String,
        /// Freshly computed checksum.
        computed: String,
        /// Checksum registered in the catalog.
        catalog: String,
    },
    /// Collaborator failure.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    /// Query-driven iteration failure.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    /// Verification engine failure.
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),
    /// Retention engine failure.
    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),
    /// Several isolated invocations failed.
    #[error("{} policy invocation(s) failed: {}", .failures.len(), summarize(.failures))]
    Aggregated {
        /// Every failure, in invocation order.
        failures: Vec<InvocationFailure>,
    },
}

fn summarize(failures: &[InvocationFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} [{}] {}", f.policy, f.code, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PolicyError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } | Self::UnknownPolicy(_) => ErrorCode::InvalidInputParam,
            Self::VerificationFailed { .. } => ErrorCode::VerificationMismatch,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::Service(e) => e.code(),
            Self::Query(e) => e.code(),
            Self::Verification(e) => e.code(),
            Self::Retention(e) => e.code(),
            Self::Aggregated { .. } => ErrorCode::AggregatedFailure,
        }
    }

    /// Convert to the `(code, message)` pair the host sees.
    pub fn to_host_error(&self) -> HostError {
        HostError::new(self.code(), self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Policy trait
// ---------------------------------------------------------------------------

/// A named, invocable policy.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Registry name, e.g. `irods_policy_data_replication`.
    fn name(&self) -> &str;

    /// Run the policy. The returned value is the policy's output document;
    /// `Value::Null` when it has nothing to report.
    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError>;
}

/// Everything a policy receives for one invocation.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// Name the policy was invoked under.
    pub policy_name: String,
    /// Parameter document: an event record, a query row wrapper or direct input.
    pub parameters: Value,
    /// Configuration document, `{}` when none was configured.
    pub configuration: Value,
    /// Handle for collaborators and nested invocations.
    pub invoker: PolicyInvoker,
}

impl PolicyContext {
    /// Collaborator handles.
    pub fn services(&self) -> &Services {
        self.invoker.services()
    }

    /// An input error attributed to this policy.
    pub fn invalid_input(&self, message: impl Into<String>) -> PolicyError {
        PolicyError::InvalidInput {
            policy: self.policy_name.clone(),
            message: message.into(),
        }
    }

    /// Whether verbose error logging was requested.
    pub fn log_errors(&self) -> bool {
        log_errors_enabled(&self.parameters, &self.configuration)
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Invokes policies by name or by resolved handle.
#[derive(Clone)]
pub struct PolicyInvoker {
    registry: Arc<PolicyRegistry>,
    services: Services,
}

impl std::fmt::Debug for PolicyInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyInvoker")
            .field("policies", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PolicyInvoker {
    /// Bind a registry to a set of collaborators.
    pub fn new(registry: Arc<PolicyRegistry>, services: Services) -> Self {
        Self { registry, services }
    }

    /// Collaborator handles.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Registry used for name lookups.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Invoke a policy by registry name.
    pub async fn invoke(
        &self,
        name: &str,
        parameters: Value,
        configuration: Value,
    ) -> Result<Value, PolicyError> {
        let policy = self
            .registry
            .get(name)
            .ok_or_else(|| PolicyError::UnknownPolicy(name.to_owned()))?;
        self.invoke_policy(&policy, parameters, configuration).await
    }

    /// Invoke an already-resolved policy.
    pub async fn invoke_policy(
        &self,
        policy: &Arc<dyn Policy>,
        parameters: Value,
        configuration: Value,
    ) -> Result<Value, PolicyError> {
        let configuration = if configuration.is_null() {
            Value::Object(Map::new())
        } else {
            configuration
        };
        let ctx = PolicyContext {
            policy_name: policy.name().to_owned(),
            parameters,
            configuration,
            invoker: self.clone(),
        };
        debug!(policy = %ctx.policy_name, "invoking policy");
        policy.invoke(ctx).await
    }

    /// Invoke through the serialized boundary: two JSON strings in, the
    /// output buffer out.
    pub async fn invoke_serialized(
        &self,
        name: &str,
        parameters: &str,
        configuration: &str,
    ) -> Result<String, HostError> {
        let parameters = parse_document(name, "parameters", parameters)?;
        let configuration = parse_document(name, "configuration", configuration)?;
        match self.invoke(name, parameters, configuration).await {
            Ok(Value::Null) => Ok(String::new()),
            Ok(output) => Ok(output.to_string()),
            Err(e) => Err(e.to_host_error()),
        }
    }
}

fn parse_document(policy: &str, what: &str, text: &str) -> Result<Value, HostError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(text).map_err(|e| {
        HostError::new(
            ErrorCode::InvalidInputParam,
            format!("{what} for [{policy}] is not valid JSON: {e}"),
        )
    })
}
