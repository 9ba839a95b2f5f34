//! `irods_policy_verify_checksum`: recompute a replica's checksum where it is
//! stored and compare it with the catalog.
//!
//! The replica is the one on the leaf of `source_resource`. An empty catalog
//! checksum is not a mismatch.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::names;
use crate::document::{capture_parameters, split_logical_path, ResourceTag};
use crate::policy::{Policy, PolicyContext, PolicyError};
use crate::services::{query_rows, FileChecksumRequest, QueryType};
use crate::verification::VerificationError;

/// Recomputes and compares a replica checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyChecksum;

#[async_trait]
impl Policy for VerifyChecksum {
    fn name(&self) -> &str {
        names::VERIFY_CHECKSUM
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = capture_parameters(&ctx.parameters, ResourceTag::Last);
        if captured.logical_path.is_empty() || captured.source_resource.is_empty() {
            return Err(ctx.invalid_input("requires logical_path and source_resource"));
        }
        let logical_path = captured.logical_path;
        let resource = captured.source_resource;
        let services = ctx.services();

        let (collection, data_name) = split_logical_path(&logical_path);
        let query = format!(
            "SELECT DATA_CHECKSUM, DATA_RESC_HIER, DATA_PATH, DATA_SIZE WHERE DATA_NAME = '{data_name}' \
             AND COLL_NAME = '{collection}' AND RESC_NAME = '{resource}'"
        );
        let row = query_rows(services.catalog.as_ref(), &query, 1, QueryType::General)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VerificationError::ReplicaDoesNotExist {
                logical_path: logical_path.clone(),
                resource: resource.clone(),
            })?;
        let mut columns = row.into_iter();
        let catalog_checksum = columns.next().unwrap_or_default();
        let hierarchy = columns.next().unwrap_or_default();
        let physical_path = columns.next().unwrap_or_default();
        let data_size = columns.next().unwrap_or_default();

        let request = FileChecksumRequest {
            location: services.resources.location(&hierarchy)?,
            physical_path,
            hierarchy,
            logical_path: logical_path.clone(),
            data_size: data_size
                .trim()
                .parse()
                .map_err(|_| VerificationError::InvalidSize(data_size.clone()))?,
        };
        let computed = services.storage.file_checksum(&request).await?;
        debug!(%logical_path, %resource, %computed, catalog = %catalog_checksum, "checksum computed");

        if !catalog_checksum.is_empty() && catalog_checksum != computed {
            let mismatch = PolicyError::ChecksumMismatch {
                logical_path,
                resource,
                computed,
                catalog: catalog_checksum,
            };
            if ctx.log_errors() {
                error!(error = %mismatch, "checksum verification failed");
            }
            return Err(mismatch);
        }
        Ok(json!({ "checksum": computed }))
    }
}
