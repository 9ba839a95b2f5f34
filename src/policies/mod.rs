//! Built-in policies.
//!
//! Each policy is a unit struct implementing [`Policy`]. They talk to the
//! outside world only through [`Services`](crate::services::Services) and reach
//! each other by name through the invoker, so any of them can be replaced by
//! registering a different implementation under the same name.

use std::sync::Arc;

use serde_json::Value;

use crate::policy::{Policy, PolicyRegistry};

pub mod access_time;
pub mod collection_metadata;
pub mod data_movement;
pub mod data_replication;
pub mod data_retention;
pub mod data_verification;
pub mod filesystem_usage;
pub mod log_context;
pub mod query_processor;
pub mod resource_metadata;
pub mod verify_checksum;

pub use access_time::AccessTime;
pub use collection_metadata::CollectionMetadataDelegate;
pub use data_movement::DataMovement;
pub use data_replication::DataReplication;
pub use data_retention::DataRetention;
pub use data_verification::DataVerification;
pub use filesystem_usage::FilesystemUsage;
pub use log_context::LogContext;
pub use query_processor::QueryProcessor;
pub use resource_metadata::ResourceMetadataGenerator;
pub use verify_checksum::VerifyChecksum;

/// Registry names of the built-in policies.
pub mod names {
    /// Query-driven iterator.
    pub const QUERY_PROCESSOR: &str = "irods_policy_query_processor";
    /// Replicate, verify, then apply retention.
    pub const DATA_MOVEMENT: &str = "irods_policy_data_movement";
    /// Create a replica.
    pub const DATA_REPLICATION: &str = "irods_policy_data_replication";
    /// Compare two replicas.
    pub const DATA_VERIFICATION: &str = "irods_policy_data_verification";
    /// Remove replicas.
    pub const DATA_RETENTION: &str = "irods_policy_data_retention";
    /// Stamp access time metadata.
    pub const ACCESS_TIME: &str = "irods_policy_access_time";
    /// Record a resource's filesystem usage.
    pub const FILESYSTEM_USAGE: &str = "irods_policy_filesystem_usage";
    /// Recompute and compare a replica checksum.
    pub const VERIFY_CHECKSUM: &str = "irods_policy_verify_checksum";
    /// Log parameters and configuration.
    pub const LOG_CONTEXT: &str = "irods_policy_log_context";
    /// Delegate events by ancestor collection metadata.
    pub const EVENT_DELEGATE_COLLECTION_METADATA: &str =
        "irods_policy_event_delegate_collection_metadata";
    /// Generate events from resource metadata.
    pub const EVENT_GENERATOR_RESOURCE_METADATA: &str =
        "irods_policy_event_generator_resource_metadata";
}

/// Register every built-in policy.
pub fn register_builtin(registry: &PolicyRegistry) {
    let builtins: [Arc<dyn Policy>; 11] = [
        Arc::new(QueryProcessor),
        Arc::new(DataMovement),
        Arc::new(DataReplication),
        Arc::new(DataVerification),
        Arc::new(DataRetention),
        Arc::new(AccessTime),
        Arc::new(FilesystemUsage),
        Arc::new(VerifyChecksum),
        Arc::new(LogContext),
        Arc::new(CollectionMetadataDelegate),
        Arc::new(ResourceMetadataGenerator),
    ];
    for policy in builtins {
        registry.register(policy);
    }
}

/// A registry holding only the built-in policies.
pub fn builtin_registry() -> PolicyRegistry {
    let registry = PolicyRegistry::new();
    register_builtin(&registry);
    registry
}

/// Read `policies_to_invoke` from a configuration document as an array.
///
/// A single `policy_to_invoke` entry is accepted as a one-element list.
pub(crate) fn chained_policies(doc: &Value) -> Vec<Value> {
    match doc.get(crate::document::keys::POLICIES_TO_INVOKE) {
        Some(Value::Array(items)) => items.clone(),
        Some(other @ Value::Object(_)) => vec![other.clone()],
        _ => match doc.get("policy_to_invoke") {
            Some(Value::String(name)) => vec![serde_json::json!({ "policy_to_invoke": name })],
            Some(other @ Value::Object(_)) => vec![other.clone()],
            _ => Vec::new(),
        },
    }
}

/// Name of a chained policy entry, given as `policy` or `policy_to_invoke`.
pub(crate) fn chained_policy_name(entry: &Value) -> Option<String> {
    crate::document::non_empty_field(entry, "policy")
        .or_else(|| crate::document::non_empty_field(entry, "policy_to_invoke"))
}
