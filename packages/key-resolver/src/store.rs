//! Store capability interface.
//!
//! The resolver only ever reads through [`KeyStore`]. Each capability is
//! independently degradable: a backend that lacks one answers with
//! [`StoreError::Unsupported`] and the caller moves on.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors a store backend can report for a single command
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend does not provide this query form (e.g. no JSON module loaded)
    #[error("capability not supported: {0}")]
    Unsupported(String),

    /// Network or connection failure talking to the backend
    #[error("transport failure: {0}")]
    Transport(String),

    /// Command did not complete within the configured bound
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Key exists but holds a different representation
    #[error("wrong value type: {0}")]
    WrongType(String),

    /// Reply could not be interpreted (bad encoding, unexpected shape, server error)
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Short label used for log fields and metric attributes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::WrongType(_) => "wrong_type",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Result type for store commands
pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only view of a key-value store, one method per stored representation.
///
/// Implementations must be safe to share across concurrent requests; any
/// pooling or locking lives inside the implementation.
pub trait KeyStore: Send + Sync {
    /// Fetch the key as a native JSON document (serialized JSON text)
    ///
    /// Returns `Ok(None)` when the key is absent.
    fn get_document(
        &self,
        key: &str,
    ) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Fetch the key as a plain string
    fn get_string(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Fetch the key as an ordered list of strings (empty when absent)
    fn get_sequence(&self, key: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Fetch the key as an unordered set of strings (empty when absent)
    fn get_set(&self, key: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Fetch the key as a field/value mapping (empty when absent)
    fn get_mapping(
        &self,
        key: &str,
    ) -> impl Future<Output = StoreResult<BTreeMap<String, String>>> + Send;

    /// List key names matching a glob pattern
    fn list_keys(&self, pattern: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Check connectivity
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Release backend resources; later commands may fail
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Name of the backend, for logs
    fn backend_name(&self) -> &'static str;
}
