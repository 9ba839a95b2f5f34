//! `irods_policy_query_processor`: run a catalog query and invoke a chain of
//! policies for every row.
//!
//! Recognized parameters:
//!
//! | key | default | meaning |
//! |---|---|---|
//! | `query_string` | required | query with substitution tokens |
//! | `policies_to_invoke` | required | chained policies, `policy_to_invoke` accepted |
//! | `number_of_threads` | 4 | concurrent workers |
//! | `query_limit` | 0 | row limit, 0 for unlimited |
//! | `query_type` | `general` | `general` or `specific` |
//! | `stop_on_error` | false | stop a row's chain at its first failure |
//! | `lifetime` | none | seconds, or a nested substitution query |
//! | `query_results` | none | row from an outer iterator, for `{N}` tokens |
//! | `default_results_when_no_rows_found` | none | rows used when the query is empty |
//! | `parameters` | all parameters | base parameters handed to chained policies |
//! | `configuration` | none | configuration for chained policies without their own |

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use super::{chained_policies, names};
use crate::document::{
    capture_parameters, flag_field, integer_field, keys, non_empty_field, object_field,
    split_logical_path, ResourceTag,
};
use crate::policy::{Policy, PolicyContext, PolicyError};
use crate::query::substitution::{
    extract_substitution_query, replace_named_tokens, replace_positional_tokens,
    requires_query_substitution,
};
use crate::query::{
    self, ChainedPolicy, QueryError, QueryIteration, SubstitutionContext,
    DEFAULT_NUMBER_OF_THREADS,
};
use crate::services::{object_kind, query_rows, ObjectKind, QueryType, Row};

/// Query-driven iterator exposed as a policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProcessor;

fn string_rows(value: Option<&Value>) -> Vec<Row> {
    let Some(Value::Array(rows)) = value else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(Value::as_array)
        .map(|row| row.iter().map(value_text).collect())
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn positional_results(parameters: &Value) -> Vec<String> {
    match parameters.get(keys::QUERY_RESULTS) {
        Some(Value::Array(row)) => row.iter().map(value_text).collect(),
        _ => Vec::new(),
    }
}

impl QueryProcessor {
    /// Collection and data name tokens for the captured logical path.
    async fn names_for_path(
        ctx: &PolicyContext,
        logical_path: &str,
    ) -> Result<(String, String), PolicyError> {
        if logical_path.is_empty() {
            return Ok((String::new(), String::new()));
        }
        match object_kind(ctx.services().catalog.as_ref(), logical_path).await? {
            ObjectKind::DataObject => Ok(split_logical_path(logical_path)),
            ObjectKind::Collection | ObjectKind::Missing => {
                Ok((logical_path.to_owned(), String::new()))
            }
        }
    }

    /// Cutoff timestamp for the lifetime token: now minus the lifetime.
    async fn lifetime_cutoff(
        ctx: &PolicyContext,
        context: &SubstitutionContext,
    ) -> Result<i64, PolicyError> {
        let Some(lifetime) = ctx.parameters.get("lifetime") else {
            return Ok(0);
        };

        let seconds = if requires_query_substitution(lifetime) {
            let text = lifetime.as_str().unwrap_or_default();
            let nested = extract_substitution_query(text)
                .ok_or_else(|| ctx.invalid_input(format!("malformed lifetime query [{text}]")))?;
            let nested =
                replace_named_tokens(nested, context, ctx.services().resources.as_ref())
                    .map_err(QueryError::from)?;
            let rows = query_rows(
                ctx.services().catalog.as_ref(),
                &nested,
                1,
                QueryType::General,
            )
            .await?;
            let first = rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or_default();
            first.trim().parse::<i64>().map_err(|_| {
                ctx.invalid_input(format!("lifetime query returned [{first}], not a number"))
            })?
        } else {
            integer_field(&ctx.parameters, "lifetime")
                .ok_or_else(|| ctx.invalid_input("lifetime must be a number"))?
        };
        Ok(context.current_time.saturating_sub(seconds))
    }
}

#[async_trait]
impl Policy for QueryProcessor {
    fn name(&self) -> &str {
        names::QUERY_PROCESSOR
    }

    async fn invoke(&self, ctx: PolicyContext) -> Result<Value, PolicyError> {
        let params = &ctx.parameters;

        let Some(query_string) = non_empty_field(params, "query_string") else {
            return Err(ctx.invalid_input("empty query string"));
        };
        let entries = chained_policies(params);
        if entries.is_empty() {
            return Err(ctx.invalid_input("empty policies_to_invoke"));
        }
        let policies = entries
            .into_iter()
            .map(serde_json::from_value::<ChainedPolicy>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ctx.invalid_input(format!("invalid policies_to_invoke: {e}")))?;
        if let Some(unnamed) = policies.iter().position(|p| p.policy_to_invoke.is_empty()) {
            return Err(ctx.invalid_input(format!("policies_to_invoke #{unnamed} has no name")));
        }

        let number_of_threads = integer_field(params, "number_of_threads")
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_NUMBER_OF_THREADS);
        let limit = integer_field(params, "query_limit")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let query_type: QueryType = non_empty_field(params, "query_type")
            .unwrap_or_default()
            .parse()
            .map_err(|e: String| ctx.invalid_input(e))?;
        let stop_on_error = flag_field(params, "stop_on_error");

        let query_string = replace_positional_tokens(&query_string, &positional_results(params));

        let captured = capture_parameters(params, ResourceTag::First);
        let (collection_name, data_name) =
            Self::names_for_path(&ctx, &captured.logical_path).await?;
        let mut context = SubstitutionContext {
            current_time: Utc::now().timestamp(),
            lifetime: 0,
            user_name: captured.user_name,
            collection_name,
            data_name,
            source_resource: captured.source_resource,
            destination_resource: captured.destination_resource,
        };
        context.lifetime = Self::lifetime_cutoff(&ctx, &context).await?;

        let substituted =
            replace_named_tokens(&query_string, &context, ctx.services().resources.as_ref())
                .map_err(QueryError::from)?;
        debug!(policy = %ctx.policy_name, query = %substituted, "query string substituted");

        let base_parameters = match params.get(keys::PARAMETERS) {
            Some(Value::Object(_)) => object_field(params, keys::PARAMETERS),
            _ => params.as_object().cloned().unwrap_or_default(),
        };

        let iteration = QueryIteration {
            query: substituted,
            limit,
            query_type,
            number_of_threads,
            policies,
            base_parameters,
            default_configuration: params
                .get(keys::CONFIGURATION)
                .cloned()
                .unwrap_or(Value::Null),
            stop_on_error,
            default_rows: string_rows(params.get("default_results_when_no_rows_found")),
        };

        let summary = query::run(&ctx.invoker, iteration).await?;
        Ok(json!({
            "rows": summary.rows,
            "invocations": summary.invocations,
            "used_default_rows": summary.used_default_rows,
        }))
    }
}
