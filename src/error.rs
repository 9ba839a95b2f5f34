//! Status codes and the `(code, message)` pair returned across the host boundary.
//!
//! Every library error enum maps onto an [`ErrorCode`]. The host only ever
//! sees a [`HostError`], never the typed enums.

use serde::Serialize;

/// Stable status codes reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or malformed input: parameters, modes, conditionals.
    InvalidInputParam,
    /// The interception point is not handled by the classifier.
    UnsupportedInterceptionPoint,
    /// A replica lookup found nothing on the requested resource.
    ReplicaDoesNotExist,
    /// A verification compared two replicas and found them different.
    VerificationMismatch,
    /// A recomputed checksum disagrees with the catalog.
    ChecksumMismatch,
    /// The catalog returned no rows where rows were required.
    NoRowsFound,
    /// A catalog query failed.
    CatalogFailure,
    /// An object-storage operation failed.
    StorageFailure,
    /// A metadata write or read failed.
    MetadataFailure,
    /// A resource name could not be resolved.
    InvalidResource,
    /// One or more isolated invocations failed and were aggregated.
    AggregatedFailure,
    /// Anything else, including panicked workers.
    Internal,
}

impl ErrorCode {
    /// Numeric value handed to the host.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::InvalidInputParam => -130_000,
            Self::UnsupportedInterceptionPoint => -130_100,
            Self::ReplicaDoesNotExist => -164_000,
            Self::VerificationMismatch => -319_000,
            Self::ChecksumMismatch => -314_000,
            Self::NoRowsFound => -808_000,
            Self::CatalogFailure => -806_000,
            Self::StorageFailure => -510_000,
            Self::MetadataFailure => -817_000,
            Self::InvalidResource => -78_000,
            Self::AggregatedFailure => -1_110_000,
            Self::Internal => -154_000,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Error as seen by the host: a numeric code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct HostError {
    /// Numeric status code (see [`ErrorCode::as_i32`]).
    pub code: i32,
    /// Contextual message.
    pub message: String,
}

impl HostError {
    /// Build a host error from a typed code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            message: message.into(),
        }
    }
}
