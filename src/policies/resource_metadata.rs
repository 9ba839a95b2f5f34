//! `irods_policy_event_generator_resource_metadata`: invoke policies along a
//! chain of resources tagged with metadata.
//!
//! Resources carrying the configured `conditional.metadata` are listed in
//! order of their metadata units, and every consecutive pair becomes a
//! `(source_resource, destination_resource)` invocation of each configured
//! policy. A tiering setup tags its tiers `0`, `1`, `2` and gets data moved
//! from each tier to the next.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::{chained_policies, chained_policy_name, names};
use crate::document::{keys, non_empty_field};
use crate::policy::{InvocationFailure, Policy, PolicyContext, PolicyError};
use crate::query::substitution::replace_positional_tokens;
use crate::services::{query_rows, QueryType};

/// Generates events from resource metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceMetadataGenerator;

/// Query listing resources that carry `metadata`, ordered by units.
pub fn resource_query(metadata: &Value) -> String {
    let mut clauses = Vec::new();
    for (field, column) in [
        ("attribute", "META_RESC_ATTR_NAME"),
        ("value", "META_RESC_ATTR_VALUE"),
        ("units", "META_RESC_ATTR_UNITS"),
    ] {
        if let Some(wanted) = non_empty_field(metadata, field) {
            clauses.push(format!("{column} = '{wanted}'"));
        }
    }
    let mut query = "SELECT RESC_NAME, ORDER(META_RESC_ATTR_UNITS)".to_owned();
    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query
}

#[async_trait]
impl Policy for ResourceMetadataGenerator {
    fn name(&self) -> &str {
        names::EVENT_GENERATOR_RESOURCE_METADATA
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let entries = chained_policies(&ctx.configuration);
        if entries.is_empty() {
            return Err(ctx.invalid_input("policies_to_invoke is empty"));
        }
        let Some(metadata) = ctx
            .configuration
            .get(keys::CONDITIONAL)
            .and_then(|c| c.get(keys::METADATA))
        else {
            return Err(ctx.invalid_input("missing conditional metadata"));
        };

        let metadata = match ctx.parameters.get(keys::QUERY_RESULTS) {
            Some(Value::Array(row)) => {
                let results: Vec<String> = row
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
                    .collect();
                let substituted = replace_positional_tokens(&metadata.to_string(), &results);
                serde_json::from_str(&substituted).map_err(|e| {
                    ctx.invalid_input(format!("conditional metadata after substitution: {e}"))
                })?
            }
            _ => metadata.clone(),
        };

        let query = resource_query(&metadata);
        let resources: Vec<String> =
            query_rows(ctx.services().catalog.as_ref(), &query, 0, QueryType::General)
                .await?
                .into_iter()
                .filter_map(|row| row.into_iter().next())
                .collect();
        if resources.is_empty() {
            error!(%query, "no resources found for query");
            return Ok(Value::Null);
        }

        let base: Map<String, Value> = ctx.parameters.as_object().cloned().unwrap_or_default();
        let mut failures = Vec::new();
        for entry in &entries {
            let Some(policy) = chained_policy_name(entry) else {
                error!("resource metadata entry has no policy name");
                continue;
            };
            let configuration = entry
                .get(keys::CONFIGURATION)
                .cloned()
                .unwrap_or_else(|| ctx.configuration.clone());

            for pair in resources.windows(2) {
                let [source, destination] = pair else {
                    continue;
                };
                let mut parameters = base.clone();
                parameters.insert(keys::SOURCE_RESOURCE.to_owned(), Value::from(source.as_str()));
                parameters.insert(
                    keys::DESTINATION_RESOURCE.to_owned(),
                    Value::from(destination.as_str()),
                );
                debug!(%policy, %source, %destination, "invoking for resource pair");
                if let Err(e) = ctx
                    .invoker
                    .invoke(&policy, Value::Object(parameters), configuration.clone())
                    .await
                {
                    error!(%policy, %source, %destination, error = %e, "generated invocation failed");
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
