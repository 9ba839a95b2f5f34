//! Route classified events to the configured policies.
//!
//! Each configured [`PolicyDescriptor`] names a policy, the events it listens
//! for, the interception-point phases (clauses) it is active in and an
//! optional conditional. The dispatcher is built once from configuration:
//! conditionals are compiled and policy names resolved up front, so a typo in
//! the configuration fails at load time rather than on the first event.
//!
//! Invocation failures are isolated: every matching policy runs, and failures
//! are collected into a [`DispatchReport`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{InvocationFailure, Policy, PolicyError, PolicyInvoker, PolicyRegistry};
use crate::conditional::{Conditional, ConditionalError};
use crate::document::{keys, overlay};
use crate::error::ErrorCode;
use crate::event::{Event, EventRecord};

/// One entry of `policies_to_invoke`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    /// Registry name of the policy.
    pub policy: String,
    /// Event names the policy listens for, any case.
    #[serde(default)]
    pub events: Vec<String>,
    /// Phases the policy is active in, e.g. `post`.
    #[serde(default)]
    pub active_policy_clauses: Vec<String>,
    /// Optional conditional over the event record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Value>,
    /// Configuration handed to the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    /// Static parameters; the live record wins on key collision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Errors raised while building a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// A descriptor has an empty `policy` field.
    #[error("policy descriptor #{index} has no policy name")]
    MissingPolicyName {
        /// Position in `policies_to_invoke`.
        index: usize,
    },
    /// A descriptor names a policy that is not registered.
    #[error("policy [{policy}] is not registered")]
    UnknownPolicy {
        /// Name as configured.
        policy: String,
    },
    /// A descriptor's conditional does not compile.
    #[error("conditional for policy [{policy}] is invalid: {error}")]
    InvalidConditional {
        /// Name as configured.
        policy: String,
        /// Compile error.
        error: ConditionalError,
    },
}

impl DispatchError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidInputParam
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Policies that completed, in invocation order.
    pub invoked: Vec<String>,
    /// Policies that failed, in invocation order.
    pub failures: Vec<InvocationFailure>,
}

impl DispatchReport {
    /// Append another report.
    pub fn merge(&mut self, other: DispatchReport) {
        self.invoked.extend(other.invoked);
        self.failures.extend(other.failures);
    }

    /// Whether any invocation failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Collapse into a single result naming every failed policy.
    pub fn into_result(self) -> Result<(), PolicyError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Aggregated {
                failures: self.failures,
            })
        }
    }
}

/// A descriptor with its policy resolved and conditional compiled.
struct ResolvedDescriptor {
    name: String,
    policy: Arc<dyn Policy>,
    events: Vec<Event>,
    clauses: Vec<String>,
    conditional: Conditional,
    configuration: Value,
    parameters: Option<Value>,
}

/// Routes events to configured policies.
pub struct PolicyDispatcher {
    descriptors: Vec<ResolvedDescriptor>,
}

impl std::fmt::Debug for PolicyDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.descriptors.iter().map(|d| d.name.as_str()).collect();
        f.debug_struct("PolicyDispatcher")
            .field("policies", &names)
            .finish()
    }
}

impl PolicyDispatcher {
    /// Resolve and compile every descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first descriptor that names no policy, names an
    /// unregistered policy, or carries an invalid conditional.
    pub fn new(
        descriptors: &[PolicyDescriptor],
        registry: &PolicyRegistry,
    ) -> Result<Self, DispatchError> {
        let mut resolved = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.policy.is_empty() {
                return Err(DispatchError::MissingPolicyName { index });
            }
            let policy =
                registry
                    .get(&descriptor.policy)
                    .ok_or_else(|| DispatchError::UnknownPolicy {
                        policy: descriptor.policy.clone(),
                    })?;
            let conditional = Conditional::parse(
                descriptor.conditional.as_ref().unwrap_or(&Value::Null),
            )
            .map_err(|error| DispatchError::InvalidConditional {
                policy: descriptor.policy.clone(),
                error,
            })?;

            let mut events = Vec::with_capacity(descriptor.events.len());
            for name in &descriptor.events {
                match name.parse::<Event>() {
                    Ok(event) => events.push(event),
                    Err(e) => warn!(policy = %descriptor.policy, error = %e, "ignoring event"),
                }
            }

            if events.is_empty() || descriptor.active_policy_clauses.is_empty() {
                debug!(policy = %descriptor.policy, "descriptor has no events or clauses");
            }

            resolved.push(ResolvedDescriptor {
                name: descriptor.policy.clone(),
                policy,
                events,
                clauses: descriptor.active_policy_clauses.clone(),
                conditional,
                configuration: descriptor.configuration.clone().unwrap_or(Value::Null),
                parameters: descriptor.parameters.clone(),
            });
        }
        Ok(Self {
            descriptors: resolved,
        })
    }

    /// Number of configured descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Invoke every policy configured for `event` at interception point `pep`.
    pub async fn dispatch(
        &self,
        invoker: &PolicyInvoker,
        event: Event,
        pep: &str,
        record: &EventRecord,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for descriptor in &self.descriptors {
            for clause in &descriptor.clauses {
                if !pep.ends_with(&format!("_{clause}")) {
                    continue;
                }
                if !descriptor.conditional.matches(record) {
                    debug!(policy = %descriptor.name, pep, "conditional did not match");
                    continue;
                }

                for listened in &descriptor.events {
                    if *listened != event {
                        continue;
                    }
                    let mut parameters =
                        overlay(descriptor.parameters.as_ref(), record.as_document());
                    if !descriptor.conditional.raw().is_null() {
                        parameters.insert(
                            keys::CONDITIONAL.to_owned(),
                            descriptor.conditional.raw().clone(),
                        );
                    }

                    let outcome = invoker
                        .invoke_policy(
                            &descriptor.policy,
                            Value::Object(parameters),
                            descriptor.configuration.clone(),
                        )
                        .await;
                    match outcome {
                        Ok(_) => report.invoked.push(descriptor.name.clone()),
                        Err(e) => {
                            error!(
                                policy = %descriptor.name,
                                %event,
                                pep,
                                code = e.code().as_i32(),
                                error = %e,
                                "policy invocation failed"
                            );
                            report.failures.push(InvocationFailure {
                                policy: descriptor.name.clone(),
                                code: e.code().as_i32(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        report
    }
}
