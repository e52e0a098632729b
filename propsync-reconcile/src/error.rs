//! Error types for propsync-reconcile.

use std::path::PathBuf;

use thiserror::Error;

use propsync_core::{ConfigError, EntityId, PropertyName};

/// A source adapter could not produce desired state.
///
/// Fatal to the property being fetched; other properties in the run carry on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The system of record was unreachable or refused the request.
    #[error("source '{source_id}' unavailable: {reason}")]
    Unavailable { source_id: String, reason: String },

    /// The system of record answered with data that is not an `{entity: value}` map.
    #[error("source '{source_id}' returned malformed data: {reason}")]
    Malformed { source_id: String, reason: String },
}

/// Failures talking to the managed system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport or auth failure; the entity list cannot be obtained.
    #[error("remote unavailable: {reason}")]
    Unavailable { reason: String },

    /// Reading one entity's property failed (including timeouts).
    #[error("failed to read {property} for {entity}: {reason}")]
    EntityRead {
        entity: EntityId,
        property: PropertyName,
        reason: String,
    },

    /// Writing one entity's property failed (including timeouts).
    #[error("failed to write {property} for {entity}: {reason}")]
    EntityWrite {
        entity: EntityId,
        property: PropertyName,
        reason: String,
    },
}

/// Errors that end a reconciliation run without a report.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Invalid flag combination or registry lookup failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The entity list could not be enumerated.
    #[error("cannot enumerate entities: {0}")]
    RemoteUnavailable(#[source] RemoteError),

    /// A blocking worker died before returning.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (report).
    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`ReconcileError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReconcileError {
    ReconcileError::Io {
        path: path.into(),
        source,
    }
}
