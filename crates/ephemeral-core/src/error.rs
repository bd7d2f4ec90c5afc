//! Error taxonomy shared by ephemeral store backends

use thiserror::Error;

/// Failures surfaced by ephemeral store operations.
///
/// Absence of an attribute is never an error; lookups report it through
/// [`StoreResult`](crate::types::StoreResult) instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed backend URL, illegal key segment, or unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend unreachable or a backend operation failed, including after the
    /// single pool-rebuild retry.
    #[error("backend connection error: {0}")]
    Connection(String),

    /// An encoded key that does not split into its three-or-four segments.
    #[error("unable to parse ephemeral key '{0}'")]
    KeyParse(String),

    /// Operation issued after the store was shut down.
    #[error("ephemeral store has been shut down")]
    Closed,
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
