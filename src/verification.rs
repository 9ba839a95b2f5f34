//! Compare a replica on a destination resource against the source replica.
//!
//! Three modes are supported:
//!
//! - `catalog` (the default): the catalog sizes must be equal;
//! - `filesystem`: the destination's physical size must equal the source's
//!   catalog size;
//! - `checksum`: the checksums must be equal, computing any that the catalog
//!   does not have.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::document::split_logical_path;
use crate::error::ErrorCode;
use crate::query::substitution::{leaf_bundle, SubstitutionError};
use crate::services::{query_rows, QueryType, ServiceError, Services};

/// How two replicas are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerificationMode {
    /// Compare catalog sizes.
    #[default]
    Catalog,
    /// Stat the destination file and compare with the source catalog size.
    Filesystem,
    /// Compare checksums.
    Checksum,
}

impl VerificationMode {
    /// Configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Filesystem => "filesystem",
            Self::Checksum => "checksum",
        }
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationMode {
    type Err = VerificationError;

    /// The empty string selects the default mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "catalog" => Ok(Self::Catalog),
            "filesystem" => Ok(Self::Filesystem),
            "checksum" => Ok(Self::Checksum),
            other => Err(VerificationError::UnsupportedMode(other.to_owned())),
        }
    }
}

/// Errors raised by the verification engine.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The mode is not one of `catalog`, `filesystem` or `checksum`.
    #[error("invalid verification type [{0}]")]
    UnsupportedMode(String),
    /// A required input is empty.
    #[error("{0} is empty")]
    MissingInput(&'static str),
    /// No replica of the object lives on the resource.
    #[error("replica for [{logical_path}] does not exist on resource [{resource}]")]
    ReplicaDoesNotExist {
        /// Object looked up.
        logical_path: String,
        /// Resource looked up.
        resource: String,
    },
    /// A catalog size is not a number.
    #[error("replica size [{0}] is not a number")]
    InvalidSize(String),
    /// The resource's leaves could not be resolved.
    #[error("leaf resolution failed: {0}")]
    Substitution(#[from] SubstitutionError),
    /// Collaborator failure.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

impl VerificationError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedMode(_) | Self::MissingInput(_) | Self::InvalidSize(_) => {
                ErrorCode::InvalidInputParam
            }
            Self::ReplicaDoesNotExist { .. } => ErrorCode::ReplicaDoesNotExist,
            Self::Substitution(e) => e.code(),
            Self::Service(e) => e.code(),
        }
    }
}

/// Catalog attributes of one replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaAttributes {
    /// Physical path in the vault.
    pub physical_path: String,
    /// Full resource hierarchy.
    pub hierarchy: String,
    /// Size in bytes, as the catalog reports it.
    pub data_size: String,
    /// Registered checksum, possibly empty.
    pub checksum: String,
}

/// Look up the replica of `logical_path` living on any leaf of `resource`.
pub async fn capture_replica_attributes(
    services: &Services,
    logical_path: &str,
    resource: &str,
) -> Result<ReplicaAttributes, VerificationError> {
    let (collection, data_name) = split_logical_path(logical_path);
    let leaves = leaf_bundle(services.resources.as_ref(), resource)?;
    let query = format!(
        "SELECT DATA_PATH, DATA_RESC_HIER, DATA_SIZE, DATA_CHECKSUM WHERE DATA_NAME = '{data_name}' \
         AND COLL_NAME = '{collection}' AND DATA_RESC_ID IN ({leaves})"
    );

    let rows = query_rows(services.catalog.as_ref(), &query, 1, QueryType::General).await?;
    let Some(row) = rows.into_iter().next() else {
        return Err(VerificationError::ReplicaDoesNotExist {
            logical_path: logical_path.to_owned(),
            resource: resource.to_owned(),
        });
    };

    let mut columns = row.into_iter();
    Ok(ReplicaAttributes {
        physical_path: columns.next().unwrap_or_default(),
        hierarchy: columns.next().unwrap_or_default(),
        data_size: columns.next().unwrap_or_default(),
        checksum: columns.next().unwrap_or_default(),
    })
}

/// Whether the replica on `destination_resource` matches the one on
/// `source_resource` under `mode`.
///
/// # Errors
///
/// A missing replica on either side is [`VerificationError::ReplicaDoesNotExist`],
/// never a plain mismatch.
pub async fn verify(
    services: &Services,
    mode: VerificationMode,
    logical_path: &str,
    source_resource: &str,
    destination_resource: &str,
) -> Result<bool, VerificationError> {
    if logical_path.is_empty() {
        return Err(VerificationError::MissingInput("logical path"));
    }
    if source_resource.is_empty() {
        return Err(VerificationError::MissingInput("source resource"));
    }
    if destination_resource.is_empty() {
        return Err(VerificationError::MissingInput("destination resource"));
    }

    let source = capture_replica_attributes(services, logical_path, source_resource).await?;
    let destination =
        capture_replica_attributes(services, logical_path, destination_resource).await?;

    let verified = match mode {
        VerificationMode::Catalog => source.data_size == destination.data_size,
        VerificationMode::Filesystem => {
            let expected: u64 = source
                .data_size
                .trim()
                .parse()
                .map_err(|_| VerificationError::InvalidSize(source.data_size.clone()))?;
            let actual = services
                .storage
                .stat(
                    logical_path,
                    &destination.hierarchy,
                    &destination.physical_path,
                )
                .await?;
            actual == expected
        }
        VerificationMode::Checksum => {
            let source_checksum =
                checksum_or_compute(services, logical_path, source_resource, source.checksum)
                    .await?;
            let destination_checksum = checksum_or_compute(
                services,
                logical_path,
                destination_resource,
                destination.checksum,
            )
            .await?;
            source_checksum == destination_checksum
        }
    };

    debug!(
        logical_path,
        source_resource,
        destination_resource,
        %mode,
        verified,
        "replica verification"
    );
    Ok(verified)
}

async fn checksum_or_compute(
    services: &Services,
    logical_path: &str,
    resource: &str,
    cached: String,
) -> Result<String, VerificationError> {
    if !cached.is_empty() {
        return Ok(cached);
    }
    Ok(services.storage.checksum(logical_path, resource).await?)
}
