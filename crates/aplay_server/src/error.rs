//! Error types and handling for the session protocol engine.
//!
//! Only two failure classes ever surface as errors: network problems and
//! internal invariant breaks. Malformed client input is not an error at this
//! level; decoders return `None`/partial results and the dispatcher drops
//! the offending message.

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Network(e.to_string())
    }
}
