//! `irods_policy_event_delegate_collection_metadata`: forward an event to the
//! policies whose conditional metadata is found on an ancestor collection.
//!
//! Each entry of the configured `policies_to_invoke` carries a
//! `conditional.metadata` pattern. Starting from the event's logical path and
//! walking up to the root, every collection whose metadata has a matching
//! triple triggers one invocation of that entry's policy. The matched triple
//! replaces `conditional.metadata` in the forwarded parameters.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{chained_policies, chained_policy_name, names};
use crate::conditional::Conditional;
use crate::document::{capture_parameters, keys, parent_path, ResourceTag};
use crate::policy::{InvocationFailure, Policy, PolicyContext, PolicyError};
use crate::services::{object_kind, Avu, EntityType, ObjectKind};

/// Delegates events by ancestor collection metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionMetadataDelegate;

/// Collections from `logical_path` up to, not including, the root.
fn ancestors(logical_path: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current = Some(logical_path.trim_end_matches('/').to_owned());
    while let Some(path) = current {
        if path.is_empty() || path == "/" {
            break;
        }
        current = parent_path(&path);
        paths.push(path);
    }
    paths
}

fn forwarded_parameters(parameters: &Value, entity_type: &str, avu: &Avu) -> Value {
    let mut forwarded = parameters.as_object().cloned().unwrap_or_default();
    let mut conditional = forwarded
        .get(keys::CONDITIONAL)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    conditional.insert(
        keys::METADATA.to_owned(),
        json!({
            "entity_type": entity_type,
            "attribute": avu.attribute,
            "value": avu.value,
            "units": avu.units,
        }),
    );
    forwarded.insert(keys::CONDITIONAL.to_owned(), Value::Object(conditional));
    Value::Object(forwarded)
}

#[async_trait]
impl Policy for CollectionMetadataDelegate {
    fn name(&self) -> &str {
        names::EVENT_DELEGATE_COLLECTION_METADATA
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let entries = chained_policies(&ctx.configuration);
        if entries.is_empty() {
            return Err(ctx.invalid_input("policies_to_invoke is empty for event delegate"));
        }

        let logical_path = capture_parameters(&ctx.parameters, ResourceTag::First).logical_path;
        if logical_path.is_empty() {
            return Err(ctx.invalid_input("logical_path is empty"));
        }

        let services = ctx.services();
        let catalog = services.catalog.as_ref();
        let start_kind = object_kind(catalog, &logical_path).await?;
        let entity_type = if start_kind == ObjectKind::DataObject {
            EntityType::DataObject
        } else {
            EntityType::Collection
        };
        let event_entity_type = ctx
            .parameters
            .get(keys::METADATA)
            .and_then(|m| m.get(keys::ENTITY_TYPE))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut failures = Vec::new();
        for entry in &entries {
            let Some(policy) = chained_policy_name(entry) else {
                error!("event delegate entry has no policy name");
                continue;
            };
            let Some(policy_metadata) = entry
                .get(keys::CONDITIONAL)
                .and_then(|c| c.get(keys::METADATA))
            else {
                error!(%policy, "event delegate entry does not contain conditional metadata");
                continue;
            };

            let wanted_entity_type = policy_metadata
                .get(keys::ENTITY_TYPE)
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !wanted_entity_type.is_empty()
                && !event_entity_type.is_empty()
                && wanted_entity_type != event_entity_type
            {
                continue;
            }

            let pattern = Conditional::parse(&json!({ "metadata": policy_metadata }))
                .map_err(|e| ctx.invalid_input(format!("conditional for [{policy}]: {e}")))?;
            let configuration = entry
                .get(keys::CONFIGURATION)
                .cloned()
                .unwrap_or(Value::Null);

            for (depth, path) in ancestors(&logical_path).into_iter().enumerate() {
                let is_object = if depth == 0 {
                    start_kind == ObjectKind::DataObject
                } else {
                    object_kind(catalog, &path).await? == ObjectKind::DataObject
                };
                if is_object {
                    continue;
                }

                let metadata = services
                    .metadata
                    .metadata_for(EntityType::Collection, &path)
                    .await?;
                let Some(avu) = metadata.iter().find(|avu| pattern.metadata().matches_avu(avu))
                else {
                    continue;
                };

                debug!(%policy, collection = %path, attribute = %avu.attribute, "delegating event");
                let parameters = forwarded_parameters(&ctx.parameters, entity_type.as_str(), avu);
                if let Err(e) = ctx
                    .invoker
                    .invoke(&policy, parameters, configuration.clone())
                    .await
                {
                    error!(%policy, collection = %path, error = %e, "delegated policy failed");
                    failures.push(InvocationFailure {
                        policy: policy.clone(),
                        code: e.code().as_i32(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(Value::Null)
        } else {
            Err(PolicyError::Aggregated { failures })
        }
    }
}
