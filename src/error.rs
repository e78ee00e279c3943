//! Error taxonomy shared by every layer of the framework.
//!
//! Mirrors the exception hierarchy a request/response framework like this
//! has historically used (socket failures, protocol invariant violations,
//! application callback rejections, ...), collapsed into a single
//! [`thiserror`] enum so it composes with `?` instead of a class hierarchy.

use std::io;

/// The kind of failure that occurred at any layer of the framework.
///
/// Handlers registered with a [`crate::registry::HandlerRegistry`] return
/// `Result<(), ErrorKind>`. Only [`ErrorKind::Callback`] is interpreted
/// specially by the dispatcher (it is turned into a `Reject` acknowledgement
/// sent back to the peer); every other variant aborts the connection worker.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// A transport-level failure (connection reset, read/write error, select
    /// failure, ...). Carries the underlying `io::Error`.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// A protocol invariant was violated, e.g. a packet was built for the
    /// wrong control-code group.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// An application handler rejected the request. The dispatcher turns
    /// this into a `Reject` acknowledgement rather than tearing down the
    /// connection.
    #[error("callback rejected request: {0}")]
    Callback(String),

    /// The peer (or a blocking client retry loop) observed a rejection that
    /// it chooses to retry.
    #[error("rejected: {0}")]
    Reject(String),

    /// A non-retriable failure reported by the peer.
    #[error("failed: {0}")]
    Failure(String),

    /// Reserved for filesystem-related failures. Not produced by the core;
    /// kept so application code built on this crate has a slot for it
    /// without inventing its own error enum.
    #[error("file error: {0}")]
    File(String),

    /// A caller passed an invalid parameter (e.g. an empty buffer where one
    /// is required, or a control code with no group bit set).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

impl ErrorKind {
    /// True if a blocking client retry loop should retry this error rather
    /// than propagate it immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Reject(_))
    }
}

/// Convenience alias used throughout the framework's internals.
pub type Result<T> = std::result::Result<T, ErrorKind>;
