//! Error types for navgraph-core operations.
//!
//! Storage failures and configuration problems are the only faults the
//! engine knows about. Cycle-guard rejections and filtered events are policy
//! outcomes and never show up here.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Storage Collaborator Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors a [`crate::storage::Storage`] implementation may return.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend failed: {context}: {details}")]
    Backend { context: String, details: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl StorageError {
    pub fn backend(context: impl Into<String>, details: impl ToString) -> Self {
        StorageError::Backend {
            context: context.into(),
            details: details.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised outside event handling. Per-event storage failures are
/// reported through [`crate::engine::EventOutcome::Failed`] instead.
#[derive(Debug, thiserror::Error)]
pub enum NavGraphError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file unreadable: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Convenience type alias for Results using NavGraphError.
pub type Result<T> = std::result::Result<T, NavGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_carries_context_and_details() {
        let err = StorageError::backend("Failed to update record", "disk full");
        assert_eq!(
            err.to_string(),
            "Storage backend failed: Failed to update record: disk full"
        );
        assert_eq!(
            StorageError::SessionNotFound("s9".to_string()).to_string(),
            "Session not found: s9"
        );
    }
}
