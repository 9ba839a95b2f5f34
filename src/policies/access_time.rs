//! `irods_policy_access_time`: record when an object was last accessed.
//!
//! The timestamp (seconds since the epoch) is set under the configured
//! `attribute`, default `irods::access_time`, as the object's owner. For
//! collection operations, flagged by a `collection` keyword in `cond_input`,
//! every data object beneath the collection is stamped.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::names;
use crate::document::{
    capture_parameters, join_logical_path, keys, non_empty_field, split_logical_path,
    ResourceTag,
};
use crate::policy::{InvocationFailure, Policy, PolicyContext, PolicyError};
use crate::services::{
    query_rows, Avu, AvuAction, AvuOperation, EntityType, QueryType, ServiceError, Services,
};

/// Attribute used when none is configured.
pub const DEFAULT_ACCESS_TIME_ATTRIBUTE: &str = "irods::access_time";

/// `cond_input` keyword marking a collection operation.
const COLLECTION_KW: &str = "collection";

/// Stamps access time metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessTime;

async fn first_column(services: &Services, query: &str) -> Result<Option<String>, ServiceError> {
    Ok(query_rows(services.catalog.as_ref(), query, 1, QueryType::General)
        .await?
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .filter(|owner| !owner.is_empty()))
}

async fn stamp(
    services: &Services,
    owner: Option<String>,
    logical_path: &str,
    attribute: &str,
    timestamp: &str,
) -> Result<(), ServiceError> {
    let operation = AvuOperation {
        action: AvuAction::Set,
        entity_type: EntityType::DataObject,
        target: logical_path.to_owned(),
        avu: Avu::new(attribute, timestamp, ""),
        as_user: owner,
    };
    services.metadata.modify(&operation).await
}

/// Logical paths of every data object at or beneath `collection`.
async fn objects_beneath(
    services: &Services,
    collection: &str,
) -> Result<Vec<String>, ServiceError> {
    let catalog = services.catalog.as_ref();
    let prefix = collection.trim_end_matches('/');
    let queries = [
        format!("SELECT COLL_NAME, DATA_NAME WHERE COLL_NAME = '{collection}'"),
        format!("SELECT COLL_NAME, DATA_NAME WHERE COLL_NAME LIKE '{prefix}/%'"),
    ];
    let mut paths = Vec::new();
    for query in &queries {
        for row in query_rows(catalog, query, 0, QueryType::General).await? {
            let mut columns = row.into_iter();
            if let (Some(coll), Some(data)) = (columns.next(), columns.next()) {
                paths.push(join_logical_path(&coll, &data));
            }
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

#[async_trait]
impl Policy for AccessTime {
    fn name(&self) -> &str {
        names::ACCESS_TIME
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = capture_parameters(&ctx.parameters, ResourceTag::First);
        if captured.logical_path.is_empty() {
            return Err(ctx.invalid_input("requires user_name and logical_path"));
        }
        let attribute = non_empty_field(&ctx.configuration, "attribute")
            .unwrap_or_else(|| DEFAULT_ACCESS_TIME_ATTRIBUTE.to_owned());
        let collection_operation = ctx
            .parameters
            .get(keys::COND_INPUT)
            .and_then(|c| non_empty_field(c, COLLECTION_KW))
            .is_some();
        let timestamp = Utc::now().timestamp().to_string();
        let services = ctx.services();
        let fallback_owner = Some(captured.user_name.clone()).filter(|u| !u.is_empty());

        if !collection_operation {
            let (collection, data_name) = split_logical_path(&captured.logical_path);
            let owner = first_column(
                services,
                &format!(
                    "SELECT USER_NAME WHERE COLL_NAME = '{collection}' AND DATA_NAME = '{data_name}'"
                ),
            )
            .await?
            .or(fallback_owner);
            stamp(services, owner, &captured.logical_path, &attribute, &timestamp).await?;
            debug!(logical_path = %captured.logical_path, %attribute, "access time updated");
            return Ok(Value::Null);
        }

        let owner = first_column(
            services,
            &format!(
                "SELECT USER_NAME WHERE COLL_NAME = '{}'",
                captured.logical_path
            ),
        )
        .await?
        .or(fallback_owner);

        let mut failures = Vec::new();
        for path in objects_beneath(services, &captured.logical_path).await? {
            if let Err(e) = stamp(services, owner.clone(), &path, &attribute, &timestamp).await {
                warn!(logical_path = %path, error = %e, "failed to update access time for object");
                failures.push(InvocationFailure {
                    policy: ctx.policy_name.clone(),
                    code: e.code().as_i32(),
                    message: format!("failed to update access time for object [{path}]: {e}"),
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
