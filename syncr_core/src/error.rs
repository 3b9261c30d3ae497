//! Shared error type for the drop sync engine.
//!
//! Every crate above `syncr_core` returns `Result<T, SyncrError>` (or wraps
//! it in `anyhow::Error` at its own public boundary) instead of inventing a
//! parallel error hierarchy per crate. The variants mirror the error policy
//! in spec.md section 7 exactly: verification and peer failures are retried
//! against alternate sources by the caller, not-found triggers a network
//! fallback, configuration and permission errors are surfaced, and I/O
//! errors propagate with path context.

use std::path::PathBuf;

/// The error kinds a caller in this workspace needs to distinguish.
#[derive(Debug, thiserror::Error)]
pub enum SyncrError {
    /// A hash or signature mismatch. The caller must not trust the datum
    /// and should try another peer or source.
    #[error("verification failed: {0}")]
    Verification(String),

    /// A peer connect error, timeout, decode error, or semantic `ERROR`
    /// response. The caller should advance to the next peer.
    #[error("peer failure: {0}")]
    PeerFailure(String),

    /// Locally missing metadata or absent peer records.
    #[error("not found: {0}")]
    NotFound(String),

    /// A missing or incomplete configuration file. Fatal to the process.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A non-owner attempted to publish, or similar authorization failure.
    /// Fatal to the operation, not the process.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A filesystem error, with path context.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncrError {
    pub fn verification(msg: impl Into<String>) -> Self {
        SyncrError::Verification(msg.into())
    }

    pub fn peer_failure(msg: impl Into<String>) -> Self {
        SyncrError::PeerFailure(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        SyncrError::NotFound(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        SyncrError::Configuration(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        SyncrError::Permission(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncrError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the kinds that mean "try the next peer", per spec.md section 7.
    pub fn is_retryable_against_peers(&self) -> bool {
        matches!(
            self,
            SyncrError::Verification(_) | SyncrError::PeerFailure(_)
        )
    }
}

pub type SyncrResult<T> = std::result::Result<T, SyncrError>;
