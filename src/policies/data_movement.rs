//! `irods_policy_data_movement`: replicate, verify, then apply retention.
//!
//! The three steps are invoked by name so a deployment can swap any of them.
//! The first failing step ends the chain and its error is returned.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::data_replication::mapped_destinations;
use super::names;
use crate::document::{capture_parameters, non_empty_field, ResourceTag};
use crate::policy::{Policy, PolicyContext, PolicyError};

const STEPS: [&str; 3] = [
    names::DATA_REPLICATION,
    names::DATA_VERIFICATION,
    names::DATA_RETENTION,
];

/// Orchestrates replication, verification and retention for one object.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataMovement;

#[async_trait]
impl Policy for DataMovement {
    fn name(&self) -> &str {
        names::DATA_MOVEMENT
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = capture_parameters(&ctx.parameters, ResourceTag::First);

        let destination_resource = if !captured.destination_resource.is_empty() {
            captured.destination_resource.clone()
        } else if let Some(dst) = non_empty_field(&ctx.configuration, "destination_resource") {
            dst
        } else {
            let Some(mapped) = mapped_destinations(&ctx.configuration, &captured.source_resource)
            else {
                return Err(ctx.invalid_input(
                    "destination_resource or source_to_destination_map not provided",
                ));
            };
            let Some(first) = mapped.into_iter().next() else {
                debug!(
                    source_resource = %captured.source_resource,
                    "source resource is not mapped, nothing to move"
                );
                return Ok(Value::Null);
            };
            first
        };

        let parameters = json!({
            "user_name": captured.user_name,
            "logical_path": captured.logical_path,
            "source_resource": captured.source_resource,
            "destination_resource": destination_resource,
        });

        for step in STEPS {
            ctx.invoker
                .invoke(step, parameters.clone(), ctx.configuration.clone())
                .await?;
        }

        info!(
            logical_path = %captured.logical_path,
            source_resource = %captured.source_resource,
            destination_resource = %destination_resource,
            "data movement complete"
        );
        Ok(Value::Null)
    }
}
