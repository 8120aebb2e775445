//! Error types for the metagame collaborators.

/// Enumeration of possible metagame errors.
///
/// Callers in the protocol engine treat every variant as non-fatal: a failed
/// store write is logged and the connection continues with in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum MetagameError {
    /// Filesystem-level failures while reading or writing persisted state
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failures for persisted career records
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
