//! Decide which replicas of an object may be removed, then remove them.
//!
//! Replicas are named by the root of their resource hierarchy, the same names
//! policies receive as `source_resource`. Candidates are the object's
//! replicas, filtered first by the resource whitelist and then by
//! preservation metadata on the resources.
//! [`plan_removal`] is the pure decision; [`apply`] gathers its inputs from the
//! catalog and carries the decision out.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::document::{pick_resource, split_logical_path, ResourceTag};
use crate::error::ErrorCode;
use crate::services::{query_rows, QueryType, Row, ServiceError, Services};

/// Preservation attribute used when none is configured.
pub const DEFAULT_PRESERVATION_ATTRIBUTE: &str = "irods::retention::preserve_replicas";

/// What to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionMode {
    /// Remove every removable replica; unlink when that is all of them.
    RemoveAllReplicas,
    /// Remove exactly one replica.
    TrimSingleReplica,
}

impl RetentionMode {
    /// Configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoveAllReplicas => "remove_all_replicas",
            Self::TrimSingleReplica => "trim_single_replica",
        }
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionMode {
    type Err = RetentionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remove_all_replicas" => Ok(Self::RemoveAllReplicas),
            "trim_single_replica" => Ok(Self::TrimSingleReplica),
            other => Err(RetentionError::UnsupportedMode(other.to_owned())),
        }
    }
}

/// Errors raised by the retention engine.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// The mode is not a known retention mode.
    #[error("unknown retention mode [{0}]")]
    UnsupportedMode(String),
    /// A required input is empty.
    #[error("{0} is empty")]
    MissingInput(&'static str),
    /// Collaborator failure.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

impl RetentionError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedMode(_) | Self::MissingInput(_) => ErrorCode::InvalidInputParam,
            Self::Service(e) => e.code(),
        }
    }
}

/// Outcome of planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionDecision {
    /// Remove the object entirely.
    Unlink,
    /// Remove the replicas on these resources.
    Trim(Vec<String>),
    /// Remove nothing.
    Retain {
        /// Why nothing is removed.
        reason: String,
    },
}

fn retain(reason: impl Into<String>) -> RetentionDecision {
    RetentionDecision::Retain {
        reason: reason.into(),
    }
}

/// Decide what to remove.
///
/// `replicas` are the hierarchy roots holding a replica, `preserved` those
/// carrying the preservation attribute, `whitelist` the resources removal is
/// allowed from (`None` allows all). An explicit `source_resource` is trimmed
/// without checking it against `replicas`.
pub fn plan_removal(
    mode: RetentionMode,
    replicas: &[String],
    preserved: &[String],
    whitelist: Option<&[String]>,
    source_resource: &str,
    destination_resource: &str,
) -> RetentionDecision {
    let candidates: Vec<&String> = replicas
        .iter()
        .filter(|r| whitelist.map_or(true, |w| w.contains(*r)))
        .filter(|r| !preserved.contains(*r))
        .collect();

    match mode {
        RetentionMode::RemoveAllReplicas => {
            if candidates.is_empty() {
                retain("no replica is both whitelisted and unpreserved")
            } else if candidates.len() == replicas.len() {
                RetentionDecision::Unlink
            } else {
                RetentionDecision::Trim(candidates.into_iter().cloned().collect())
            }
        }
        RetentionMode::TrimSingleReplica => {
            let target = if !source_resource.is_empty() {
                Some(source_resource)
            } else if replicas.len() == 2 && !destination_resource.is_empty() {
                replicas
                    .iter()
                    .find(|r| r.as_str() != destination_resource)
                    .map(String::as_str)
            } else {
                None
            };
            let Some(target) = target else {
                return retain("no single replica identified for trimming");
            };
            let whitelisted = whitelist.map_or(true, |w| w.iter().any(|r| r == target));
            if whitelisted && !preserved.iter().any(|r| r == target) {
                RetentionDecision::Trim(vec![target.to_owned()])
            } else {
                retain(format!(
                    "replica on [{target}] is not whitelisted or is preserved"
                ))
            }
        }
    }
}

/// Inputs for [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionRequest {
    /// What to remove.
    pub mode: RetentionMode,
    /// User the removal runs as.
    pub user_name: String,
    /// Object whose replicas are considered.
    pub logical_path: String,
    /// Replica to trim in single mode.
    pub source_resource: String,
    /// Replica to keep in single mode when no source is given.
    pub destination_resource: String,
    /// Resources removal is allowed from; `None` allows all.
    pub whitelist: Option<Vec<String>>,
    /// Resource metadata attribute marking replicas to preserve.
    pub preservation_attribute: String,
}

/// Hierarchy root of a `RESC_NAME, DATA_RESC_HIER` row; the resource name
/// when no hierarchy is reported.
fn replica_root(row: Row) -> Option<String> {
    let mut columns = row.into_iter();
    let name = columns.next()?;
    let root = columns
        .next()
        .map(|hierarchy| pick_resource(&hierarchy, ResourceTag::First))
        .filter(|root| !root.is_empty());
    Some(root.unwrap_or(name))
}

/// Plan and carry out removal for one object.
pub async fn apply(
    services: &Services,
    request: &RetentionRequest,
) -> Result<RetentionDecision, RetentionError> {
    if request.logical_path.is_empty() {
        return Err(RetentionError::MissingInput("logical path"));
    }
    let (collection, data_name) = split_logical_path(&request.logical_path);
    let catalog = services.catalog.as_ref();

    let query = format!(
        "SELECT RESC_NAME, DATA_RESC_HIER WHERE COLL_NAME = '{collection}' \
         AND DATA_NAME = '{data_name}'"
    );
    let mut replicas: Vec<String> = query_rows(catalog, &query, 0, QueryType::General)
        .await?
        .into_iter()
        .filter_map(replica_root)
        .collect();
    replicas.sort();
    replicas.dedup();

    if replicas.is_empty() {
        return Ok(retain("object has no replicas"));
    }

    let mut considered = replicas.clone();
    if !request.source_resource.is_empty() && !considered.contains(&request.source_resource) {
        considered.push(request.source_resource.clone());
    }
    let quoted = considered
        .iter()
        .map(|r| format!("'{r}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT RESC_NAME WHERE RESC_NAME IN ({quoted}) AND META_RESC_ATTR_NAME = '{}'",
        request.preservation_attribute
    );
    let preserved: Vec<String> = query_rows(catalog, &query, 0, QueryType::General)
        .await?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect();

    let decision = plan_removal(
        request.mode,
        &replicas,
        &preserved,
        request.whitelist.as_deref(),
        &request.source_resource,
        &request.destination_resource,
    );

    match &decision {
        RetentionDecision::Unlink => {
            services
                .storage
                .unlink(&request.user_name, &request.logical_path)
                .await?;
        }
        RetentionDecision::Trim(resources) => {
            for resource in resources {
                services
                    .storage
                    .trim(&request.user_name, &request.logical_path, resource)
                    .await?;
            }
        }
        RetentionDecision::Retain { .. } => {}
    }

    info!(
        logical_path = %request.logical_path,
        mode = %request.mode,
        ?decision,
        "retention applied"
    );
    Ok(decision)
}
