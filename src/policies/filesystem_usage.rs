//! `irods_policy_filesystem_usage`: record how full a resource's filesystem is.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::names;
use crate::document::{capture_parameters, ResourceTag};
use crate::policy::{Policy, PolicyContext, PolicyError};
use crate::services::{Avu, AvuAction, AvuOperation, EntityType, FilesystemStats, ServiceError};

/// Resource metadata attribute holding the percentage used.
pub const FILESYSTEM_PERCENT_USED_ATTRIBUTE: &str = "irods::resource::filesystem_percent_used";

/// Records filesystem usage on a resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemUsage;

/// Percentage of blocks in use, `None` for a filesystem reporting no blocks.
#[allow(clippy::cast_precision_loss)]
pub fn percent_used(stats: FilesystemStats) -> Option<f64> {
    if stats.total_blocks == 0 {
        return None;
    }
    let available = stats.available_blocks as f64;
    let total = stats.total_blocks as f64;
    Some(100.0 * (1.0 - available / total))
}

#[async_trait]
impl Policy for FilesystemUsage {
    fn name(&self) -> &str {
        names::FILESYSTEM_USAGE
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let source_resource =
            capture_parameters(&ctx.parameters, ResourceTag::First).source_resource;
        if source_resource.is_empty() {
            return Err(ctx.invalid_input("source_resource is empty"));
        }

        let services = ctx.services();
        let vault_path = services.resources.vault_path(&source_resource)?;
        let stats = services.storage.filesystem_stats(&vault_path).await?;
        let percent = percent_used(stats).ok_or_else(|| ServiceError::Storage {
            operation: "filesystem_stats",
            logical_path: vault_path.clone(),
            detail: "filesystem reports zero total blocks".to_owned(),
        })?;
        let value = format!("{percent:.6}");

        services
            .metadata
            .modify(&AvuOperation {
                action: AvuAction::Set,
                entity_type: EntityType::Resource,
                target: source_resource.clone(),
                avu: Avu::new(FILESYSTEM_PERCENT_USED_ATTRIBUTE, value.as_str(), ""),
                as_user: None,
            })
            .await?;

        info!(
            resource = %source_resource,
            vault = %vault_path,
            percent_used = %value,
            "filesystem usage recorded"
        );
        Ok(Value::Null)
    }
}
