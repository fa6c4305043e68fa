//! Error types for entropy coder construction and worker dispatch.
//!
//! The coding hot paths never fail; only the checked constructors and the
//! worker pool surface these.

use thiserror::Error;

/// Error variants for coder setup and tile dispatch.
#[derive(Debug, Error)]
pub enum Error {
    /// Probability outside `[1, SCALE - 1]`.
    #[error("invalid probability: {0}")]
    InvalidProbability(u32),

    /// CDF is empty, too long, non-monotone or does not close at the scale.
    #[error("invalid cdf: {0}")]
    InvalidCdf(String),

    /// Symbol tree is structurally unusable.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// A stream header or trailer cannot have come from the matching writer.
    #[error("invalid stream")]
    InvalidStream,

    /// Backend name not recognised.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A worker hook reported failure.
    #[error("worker {0} failed")]
    WorkerFailed(usize),

    /// Thread spawn or other I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for entropy coder operations.
pub type Result<T> = std::result::Result<T, Error>;
