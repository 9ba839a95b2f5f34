//! Collaborator abstractions the engine calls but never implements.
//!
//! The catalog, object storage, metadata store and resource manager belong to
//! the host server. The engine only sees these traits; tests supply in-memory
//! versions.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::split_logical_path;
use crate::error::ErrorCode;

/// One catalog result row, columns in `SELECT` order.
pub type Row = Vec<String>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The catalog found nothing for the query.
    #[error("no rows found for query [{query}]")]
    NoRowsFound {
        /// The executed query.
        query: String,
    },
    /// The catalog rejected or failed the query.
    #[error("query [{query}] failed: {detail}")]
    Query {
        /// The executed query.
        query: String,
        /// Collaborator-provided detail.
        detail: String,
    },
    /// An object-storage operation failed.
    #[error("{operation} failed for [{logical_path}]: {detail}")]
    Storage {
        /// Operation name, e.g. `replicate`.
        operation: &'static str,
        /// Object the operation targeted.
        logical_path: String,
        /// Collaborator-provided detail.
        detail: String,
    },
    /// A metadata read or write failed.
    #[error("metadata operation on [{target}] failed: {detail}")]
    Metadata {
        /// Entity the operation targeted.
        target: String,
        /// Collaborator-provided detail.
        detail: String,
    },
    /// The resource manager does not know the resource.
    #[error("unknown resource [{0}]")]
    UnknownResource(String),
}

impl ServiceError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoRowsFound { .. } => ErrorCode::NoRowsFound,
            Self::Query { .. } => ErrorCode::CatalogFailure,
            Self::Storage { .. } => ErrorCode::StorageFailure,
            Self::Metadata { .. } => ErrorCode::MetadataFailure,
            Self::UnknownResource(_) => ErrorCode::InvalidResource,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Catalog query flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Free-form general query.
    #[default]
    General,
    /// Named query registered with the catalog.
    Specific,
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "general" => Ok(Self::General),
            "specific" => Ok(Self::Specific),
            other => Err(format!("unknown query type [{other}]")),
        }
    }
}

/// Read access to the metadata catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Execute `query`, returning at most `limit` rows (`0` = unlimited).
    ///
    /// Implementations may report an empty result either as `Ok(vec![])` or as
    /// [`ServiceError::NoRowsFound`]; callers treat both the same.
    async fn query(
        &self,
        query: &str,
        limit: u32,
        query_type: QueryType,
    ) -> Result<Vec<Row>, ServiceError>;
}

/// Run a query and treat "no rows found" as an empty result.
pub async fn query_rows(
    catalog: &dyn Catalog,
    query: &str,
    limit: u32,
    query_type: QueryType,
) -> Result<Vec<Row>, ServiceError> {
    match catalog.query(query, limit, query_type).await {
        Ok(rows) => Ok(rows),
        Err(ServiceError::NoRowsFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// What a logical path names in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A data object.
    DataObject,
    /// A collection.
    Collection,
    /// Nothing registered at the path.
    Missing,
}

/// Ask the catalog whether a logical path is a data object or a collection.
pub async fn object_kind(
    catalog: &dyn Catalog,
    logical_path: &str,
) -> Result<ObjectKind, ServiceError> {
    let (collection, data_name) = split_logical_path(logical_path);
    if !data_name.is_empty() {
        let query = format!(
            "SELECT DATA_ID WHERE COLL_NAME = '{collection}' AND DATA_NAME = '{data_name}'"
        );
        if !query_rows(catalog, &query, 1, QueryType::General).await?.is_empty() {
            return Ok(ObjectKind::DataObject);
        }
    }
    let query = format!("SELECT COLL_ID WHERE COLL_NAME = '{logical_path}'");
    if !query_rows(catalog, &query, 1, QueryType::General).await?.is_empty() {
        return Ok(ObjectKind::Collection);
    }
    Ok(ObjectKind::Missing)
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Replicate one object between two resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRequest {
    /// User the operation runs as.
    pub user_name: String,
    /// Object to replicate.
    pub logical_path: String,
    /// Resource holding the good replica.
    pub source_resource: String,
    /// Resource receiving the new replica.
    pub destination_resource: String,
}

/// Recompute a checksum at a replica's storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChecksumRequest {
    /// Host that serves the replica.
    pub location: String,
    /// Physical path of the replica.
    pub physical_path: String,
    /// Full resource hierarchy of the replica.
    pub hierarchy: String,
    /// Logical path of the object.
    pub logical_path: String,
    /// Catalog size in bytes.
    pub data_size: u64,
}

/// Block counts for the filesystem under a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemStats {
    /// Blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total blocks.
    pub total_blocks: u64,
}

/// Object-storage operations.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a replica on the destination resource.
    async fn replicate(&self, request: &ReplicaRequest) -> Result<(), ServiceError>;
    /// Remove the replica on one resource.
    async fn trim(
        &self,
        user_name: &str,
        logical_path: &str,
        resource: &str,
    ) -> Result<(), ServiceError>;
    /// Remove the object and every replica.
    async fn unlink(&self, user_name: &str, logical_path: &str) -> Result<(), ServiceError>;
    /// Compute and register a checksum for the replica on `resource`.
    async fn checksum(&self, logical_path: &str, resource: &str) -> Result<String, ServiceError>;
    /// Size in bytes of the physical file behind a replica.
    async fn stat(
        &self,
        logical_path: &str,
        hierarchy: &str,
        physical_path: &str,
    ) -> Result<u64, ServiceError>;
    /// Filesystem statistics for the nearest existing directory at or above `vault_path`.
    async fn filesystem_stats(&self, vault_path: &str) -> Result<FilesystemStats, ServiceError>;
    /// Recompute a checksum without registering it.
    async fn file_checksum(&self, request: &FileChecksumRequest) -> Result<String, ServiceError>;
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Kind of entity metadata is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A data object, addressed by logical path.
    DataObject,
    /// A collection, addressed by logical path.
    Collection,
    /// A user, addressed by name.
    User,
    /// A resource, addressed by name.
    Resource,
}

impl EntityType {
    /// Native command-line option for this entity.
    pub fn option(self) -> &'static str {
        match self {
            Self::DataObject => "-d",
            Self::Collection => "-C",
            Self::User => "-u",
            Self::Resource => "-R",
        }
    }

    /// Parse a native command-line option; `-r`/`-R` both mean resource.
    pub fn from_option(option: &str) -> Option<Self> {
        match option {
            "-d" => Some(Self::DataObject),
            "-C" | "-c" => Some(Self::Collection),
            "-u" => Some(Self::User),
            "-R" | "-r" => Some(Self::Resource),
            _ => None,
        }
    }

    /// Name used in event records and conditionals.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataObject => "data_object",
            Self::Collection => "collection",
            Self::User => "user",
            Self::Resource => "resource",
        }
    }
}

/// Attribute/value/units triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avu {
    /// Attribute name.
    pub attribute: String,
    /// Value.
    pub value: String,
    /// Units, often empty.
    #[serde(default)]
    pub units: String,
}

impl Avu {
    /// Build a triple.
    pub fn new(
        attribute: impl Into<String>,
        value: impl Into<String>,
        units: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
            units: units.into(),
        }
    }
}

/// How an [`AvuOperation`] changes the entity's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvuAction {
    /// Replace every value of the attribute.
    Set,
    /// Add a triple.
    Add,
    /// Remove a triple.
    Remove,
}

/// One metadata write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvuOperation {
    /// Kind of change.
    pub action: AvuAction,
    /// Kind of entity.
    pub entity_type: EntityType,
    /// Logical path or name of the entity.
    pub target: String,
    /// Triple to write.
    pub avu: Avu,
    /// Run as this user instead of the session user.
    pub as_user: Option<String>,
}

/// Metadata reads and writes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Apply one metadata write.
    async fn modify(&self, operation: &AvuOperation) -> Result<(), ServiceError>;
    /// All triples attached to an entity.
    async fn metadata_for(
        &self,
        entity_type: EntityType,
        target: &str,
    ) -> Result<Vec<Avu>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Resource hierarchy lookups.
pub trait ResourceManager: Send + Sync {
    /// Ids of every leaf beneath a resource (the resource itself if it is a leaf).
    fn leaf_bundle(&self, resource: &str) -> Result<Vec<i64>, ServiceError>;
    /// Vault path of a storage resource.
    fn vault_path(&self, resource: &str) -> Result<String, ServiceError>;
    /// Host serving the leaf of a hierarchy.
    fn location(&self, hierarchy: &str) -> Result<String, ServiceError>;
}

/// Handles to every collaborator, shared by all policies.
#[derive(Clone)]
pub struct Services {
    /// Catalog queries.
    pub catalog: Arc<dyn Catalog>,
    /// Object storage.
    pub storage: Arc<dyn Storage>,
    /// Metadata reads and writes.
    pub metadata: Arc<dyn MetadataStore>,
    /// Resource hierarchy lookups.
    pub resources: Arc<dyn ResourceManager>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
