//! `irods_policy_data_verification`: compare the replica on the destination
//! resource with the one on the source resource.
//!
//! The verification mode is read from the destination resource's metadata
//! under the configured `attribute` (default `irods::verification::type`);
//! a resource without it is verified against the catalog.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::names;
use crate::document::{capture_parameters, non_empty_field, ResourceTag};
use crate::policy::{Policy, PolicyContext, PolicyError};
use crate::services::EntityType;
use crate::verification::{self, VerificationMode};

/// Resource metadata attribute naming the verification mode.
pub const DEFAULT_VERIFICATION_ATTRIBUTE: &str = "irods::verification::type";

/// Verifies a replica after replication.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataVerification;

#[async_trait]
impl Policy for DataVerification {
    fn name(&self) -> &str {
        names::DATA_VERIFICATION
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = capture_parameters(&ctx.parameters, ResourceTag::First);
        let source_resource = non_empty_field(&ctx.configuration, "source_resource")
            .unwrap_or(captured.source_resource);
        if source_resource.is_empty() {
            return Err(ctx.invalid_input("source_resource is not specified"));
        }
        let destination_resource = captured.destination_resource;
        if destination_resource.is_empty() {
            return Err(ctx.invalid_input("destination_resource is not specified"));
        }

        let attribute = non_empty_field(&ctx.configuration, "attribute")
            .unwrap_or_else(|| DEFAULT_VERIFICATION_ATTRIBUTE.to_owned());
        let mode_name = ctx
            .services()
            .metadata
            .metadata_for(EntityType::Resource, &destination_resource)
            .await?
            .into_iter()
            .find(|avu| avu.attribute == attribute)
            .map(|avu| avu.value)
            .unwrap_or_default();
        let mode: VerificationMode = mode_name.parse()?;

        if ctx.log_errors() {
            info!(
                logical_path = %captured.logical_path,
                %mode,
                destination_resource = %destination_resource,
                "verifying replica"
            );
        }

        let verified = verification::verify(
            ctx.services(),
            mode,
            &captured.logical_path,
            &source_resource,
            &destination_resource,
        )
        .await?;

        if verified {
            Ok(Value::Null)
        } else {
            Err(PolicyError::VerificationFailed {
                logical_path: captured.logical_path,
                source_resource,
                destination_resource,
                mode: mode.to_string(),
            })
        }
    }
}
