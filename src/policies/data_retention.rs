//! `irods_policy_data_retention`: remove replicas that are neither preserved
//! nor outside the whitelist.
//!
//! Invoked from the query processor, the parameters carry a `query_results`
//! row of `[user, collection, data_name, resource?]`; otherwise the event
//! record or direct-call parameters are used.

use async_trait::async_trait;
use serde_json::Value;

use super::names;
use crate::document::{
    capture_parameters, join_logical_path, keys, non_empty_field, CapturedParameters,
    ResourceTag,
};
use crate::policy::{Policy, PolicyContext, PolicyError};
use crate::retention::{self, RetentionMode, RetentionRequest, DEFAULT_PRESERVATION_ATTRIBUTE};

/// Removes replicas according to the configured retention mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataRetention;

fn from_query_results(
    ctx: &PolicyContext,
    row: &[Value],
) -> Result<CapturedParameters, PolicyError> {
    let column = |i: usize| row.get(i).and_then(Value::as_str).map(str::to_owned);
    let (Some(user_name), Some(collection), Some(data_name)) = (column(0), column(1), column(2))
    else {
        return Err(ctx.invalid_input(
            "query_results must hold user name, collection name and data name",
        ));
    };
    Ok(CapturedParameters {
        user_name,
        logical_path: join_logical_path(&collection, &data_name),
        source_resource: column(3).unwrap_or_default(),
        destination_resource: String::new(),
    })
}

fn whitelist(ctx: &PolicyContext) -> Result<Option<Vec<String>>, PolicyError> {
    match ctx.configuration.get("resource_white_list") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
        )),
        Some(_) => Err(ctx.invalid_input("resource_white_list must be an array")),
    }
}

#[async_trait]
impl Policy for DataRetention {
    fn name(&self) -> &str {
        names::DATA_RETENTION
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let captured = match ctx.parameters.get(keys::QUERY_RESULTS) {
            Some(Value::Array(row)) => from_query_results(&ctx, row)?,
            _ => capture_parameters(&ctx.parameters, ResourceTag::First),
        };

        let whitelist = whitelist(&ctx)?;
        if let Some(allowed) = &whitelist {
            if captured.source_resource.is_empty() {
                return Err(
                    ctx.invalid_input("resource whitelist provided with empty source resource")
                );
            }
            if !allowed.contains(&captured.source_resource) {
                return Err(ctx.invalid_input(format!(
                    "source resource not matched [{}]",
                    captured.source_resource
                )));
            }
        }

        let mode = match non_empty_field(&ctx.configuration, "mode") {
            Some(name) => name.parse()?,
            None if captured.source_resource.is_empty() => RetentionMode::RemoveAllReplicas,
            None => RetentionMode::TrimSingleReplica,
        };

        let request = RetentionRequest {
            mode,
            user_name: captured.user_name,
            logical_path: captured.logical_path,
            source_resource: captured.source_resource,
            destination_resource: captured.destination_resource,
            whitelist,
            preservation_attribute: non_empty_field(&ctx.configuration, "attribute")
                .unwrap_or_else(|| DEFAULT_PRESERVATION_ATTRIBUTE.to_owned()),
        };
        retention::apply(ctx.services(), &request).await?;
        Ok(Value::Null)
    }
}
