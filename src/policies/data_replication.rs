//! `irods_policy_data_replication`: create replicas of an object.
//!
//! The destination is taken from, in order: the `destination_resource`
//! parameter, the `destination_resource` configuration value, or the entry
//! for the source resource in the `source_to_destination_map` configuration
//! object. A mapped entry may name one resource or a list of them.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::names;
use crate::document::{capture_parameters, non_empty_field, CapturedParameters, ResourceTag};
use crate::policy::{InvocationFailure, Policy, PolicyContext, PolicyError};
use crate::services::{ReplicaRequest, ServiceError};

/// Configuration key mapping a source resource to its destinations.
pub const SOURCE_TO_DESTINATION_MAP: &str = "source_to_destination_map";

/// Replicates an object to one or more destination resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataReplication;

/// Destinations listed for `source_resource` in `source_to_destination_map`.
///
/// `None` when the map is absent; an empty list when the source is unmapped.
pub fn mapped_destinations(configuration: &Value, source_resource: &str) -> Option<Vec<String>> {
    let map = configuration.get(SOURCE_TO_DESTINATION_MAP)?;
    let destinations = match map.get(source_resource) {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    };
    Some(destinations)
}

#[async_trait]
impl Policy for DataReplication {
    fn name(&self) -> &str {
        names::DATA_REPLICATION
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = capture_parameters(&ctx.parameters, ResourceTag::First);
        if captured.logical_path.is_empty() {
            return Err(ctx.invalid_input("logical_path is empty"));
        }

        let destinations = if !captured.destination_resource.is_empty() {
            vec![captured.destination_resource.clone()]
        } else if let Some(dst) = non_empty_field(&ctx.configuration, "destination_resource") {
            vec![dst]
        } else {
            let Some(mapped) = mapped_destinations(&ctx.configuration, &captured.source_resource)
            else {
                return Err(ctx.invalid_input(
                    "destination_resource or source_to_destination_map not provided",
                ));
            };
            if mapped.is_empty() {
                warn!(
                    source_resource = %captured.source_resource,
                    "source resource is not mapped, nothing to replicate"
                );
                return Ok(Value::Null);
            }
            mapped
        };

        if let [destination] = destinations.as_slice() {
            replicate(&ctx, &captured, destination).await?;
            return Ok(Value::Null);
        }

        let mut failures = Vec::new();
        for destination in &destinations {
            if let Err(e) = replicate(&ctx, &captured, destination).await {
                failures.push(InvocationFailure {
                    policy: ctx.policy_name.clone(),
                    code: e.code().as_i32(),
                    message: format!(
                        "failed to replicate [{}] from [{}] to [{destination}]: {e}",
                        captured.logical_path, captured.source_resource
                    ),
                });
            }
        }
        if failures.is_empty() {
            Ok(Value::Null)
        } else {
            Err(PolicyError::Aggregated { failures })
        }
    }
}

async fn replicate(
    ctx: &PolicyContext,
    captured: &CapturedParameters,
    destination: &str,
) -> Result<(), ServiceError> {
    let request = ReplicaRequest {
        user_name: captured.user_name.clone(),
        logical_path: captured.logical_path.clone(),
        source_resource: captured.source_resource.clone(),
        destination_resource: destination.to_owned(),
    };
    ctx.services().storage.replicate(&request).await?;
    info!(
        logical_path = %request.logical_path,
        source_resource = %request.source_resource,
        destination_resource = destination,
        "replicated"
    );
    Ok(())
}
