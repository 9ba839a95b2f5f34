//! Query-driven fan-out.
//!
//! [`run`] executes one catalog query and invokes a chain of policies once per
//! result row. Rows are split across a fixed number of tokio tasks; each task
//! returns its own list of failures and the lists are merged after every task
//! has joined, so no state is shared between workers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::document::{fill_missing, keys, Document};
use crate::error::ErrorCode;
use crate::policy::PolicyInvoker;
use crate::services::{query_rows, QueryType, Row, ServiceError};

pub mod substitution;

pub use substitution::{SubstitutionContext, SubstitutionError};

/// Workers used when the caller does not say.
pub const DEFAULT_NUMBER_OF_THREADS: usize = 4;

/// One policy in the per-row chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainedPolicy {
    /// Registry name of the policy.
    #[serde(alias = "policy")]
    pub policy_to_invoke: String,
    /// Parameters that win over the iterator's outgoing parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Configuration; the iterator's is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
}

/// A fully substituted query and what to do with each row.
#[derive(Debug, Clone, Default)]
pub struct QueryIteration {
    /// Query with every token already substituted.
    pub query: String,
    /// Maximum rows, `0` for unlimited.
    pub limit: u32,
    /// Query flavor.
    pub query_type: QueryType,
    /// Number of concurrent workers.
    pub number_of_threads: usize,
    /// Policies invoked for each row, in order.
    pub policies: Vec<ChainedPolicy>,
    /// Outgoing parameters, filled into each chained policy's parameters.
    pub base_parameters: Document,
    /// Configuration for chained policies that bring none.
    pub default_configuration: Value,
    /// Stop a row's chain at its first failure.
    pub stop_on_error: bool,
    /// Rows to use when the query returns nothing.
    pub default_rows: Vec<Row>,
}

/// What an iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationSummary {
    /// Rows processed.
    pub rows: usize,
    /// Successful policy invocations.
    pub invocations: usize,
    /// Whether the default rows stood in for an empty result.
    pub used_default_rows: bool,
}

/// One failed invocation for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Index of the row in the result set.
    pub row_index: usize,
    /// Policy that failed; empty when the worker itself failed.
    pub policy: String,
    /// Numeric status code.
    pub code: i32,
    /// Failure message.
    pub message: String,
}

/// Errors raised by the query iterator.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// One or more row invocations failed.
    #[error("query processor encountered an error for [{failed}] rows for query [{query}]")]
    RowFailures {
        /// Number of failures.
        failed: usize,
        /// The executed query.
        query: String,
        /// Every failure.
        errors: Vec<RowError>,
    },
    /// Token substitution failed.
    #[error("substitution failed: {0}")]
    Substitution(#[from] SubstitutionError),
    /// The catalog query failed.
    #[error("catalog query failed: {0}")]
    Service(#[from] ServiceError),
}

impl QueryError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RowFailures { .. } => ErrorCode::AggregatedFailure,
            Self::Substitution(e) => e.code(),
            Self::Service(e) => e.code(),
        }
    }
}

/// Shared, read-only per-row plan.
struct RowPlan {
    policies: Vec<ChainedPolicy>,
    base_parameters: Document,
    default_configuration: Value,
    stop_on_error: bool,
}

#[derive(Default)]
struct WorkerOutcome {
    invocations: usize,
    errors: Vec<RowError>,
}

/// Execute the query and fan the rows out to the policy chain.
///
/// "No rows found" is success. When the query yields nothing and default
/// rows were given, those rows are processed instead.
///
/// # Errors
///
/// Returns [`QueryError::Service`] when the query itself fails and
/// [`QueryError::RowFailures`] when any invocation failed.
pub async fn run(
    invoker: &PolicyInvoker,
    iteration: QueryIteration,
) -> Result<IterationSummary, QueryError> {
    let QueryIteration {
        query,
        limit,
        query_type,
        number_of_threads,
        policies,
        base_parameters,
        default_configuration,
        stop_on_error,
        default_rows,
    } = iteration;

    let catalog = Arc::clone(&invoker.services().catalog);
    let fetched = query_rows(catalog.as_ref(), &query, limit, query_type).await?;

    let (rows, used_default_rows) = if fetched.is_empty() && !default_rows.is_empty() {
        debug!(query = %query, rows = default_rows.len(), "no rows found, using default rows");
        (default_rows, true)
    } else {
        (fetched, false)
    };

    if rows.is_empty() {
        debug!(query = %query, "no rows found");
        return Ok(IterationSummary::default());
    }

    let plan = Arc::new(RowPlan {
        policies,
        base_parameters,
        default_configuration,
        stop_on_error,
    });

    let workers = number_of_threads.clamp(1, rows.len());
    let chunk_size = rows.len().div_ceil(workers);
    let row_count = rows.len();

    let mut set = JoinSet::new();
    for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
        let first_row = chunk_index.saturating_mul(chunk_size);
        let chunk = chunk.to_vec();
        let invoker = invoker.clone();
        let plan = Arc::clone(&plan);
        set.spawn(async move { process_rows(&invoker, &plan, first_row, chunk).await });
    }

    let mut invocations = 0_usize;
    let mut errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => {
                invocations = invocations.saturating_add(outcome.invocations);
                errors.extend(outcome.errors);
            }
            Err(e) => errors.push(RowError {
                row_index: 0,
                policy: String::new(),
                code: ErrorCode::Internal.as_i32(),
                message: format!("query worker failed: {e}"),
            }),
        }
    }

    if !errors.is_empty() {
        errors.sort_by_key(|e| e.row_index);
        for e in &errors {
            error!(
                row = e.row_index,
                policy = %e.policy,
                code = e.code,
                error = %e.message,
                "query row invocation failed"
            );
        }
        return Err(QueryError::RowFailures {
            failed: errors.len(),
            query,
            errors,
        });
    }

    info!(query = %query, rows = row_count, invocations, workers, "query iteration complete");
    Ok(IterationSummary {
        rows: row_count,
        invocations,
        used_default_rows,
    })
}

async fn process_rows(
    invoker: &PolicyInvoker,
    plan: &RowPlan,
    first_row: usize,
    rows: Vec<Row>,
) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::default();
    for (offset, row) in rows.into_iter().enumerate() {
        let row_index = first_row.saturating_add(offset);
        let results = json!(row);

        for chained in &plan.policies {
            let mut parameters = chained
                .parameters
                .as_ref()
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            fill_missing(&mut parameters, &plan.base_parameters);
            parameters.insert(keys::QUERY_RESULTS.to_owned(), results.clone());

            let configuration = chained
                .configuration
                .clone()
                .unwrap_or_else(|| plan.default_configuration.clone());

            match invoker
                .invoke(
                    &chained.policy_to_invoke,
                    Value::Object(parameters),
                    configuration,
                )
                .await
            {
                Ok(_) => outcome.invocations = outcome.invocations.saturating_add(1),
                Err(e) => {
                    outcome.errors.push(RowError {
                        row_index,
                        policy: chained.policy_to_invoke.clone(),
                        code: e.code().as_i32(),
                        message: e.to_string(),
                    });
                    if plan.stop_on_error {
                        break;
                    }
                }
            }
        }
    }
    outcome
}
