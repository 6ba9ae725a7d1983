use thiserror::Error;

/// Errors surfaced by control-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path does not exist.
    #[error("store path not found: {path}")]
    NotFound { path: String },

    /// The value at a path did not parse as the requested type.
    #[error("value {value:?} at {path} is not a valid {expected}")]
    Parse {
        path: String,
        expected: &'static str,
        value: String,
    },

    /// The underlying store session failed.
    #[error("store backend error: {reason}")]
    Backend { reason: String },

    /// The session's watch dispatcher has shut down; no new watches can be
    /// registered.
    #[error("store session closed")]
    Closed,

    /// A watch could not be armed on the session.
    #[error("failed to arm watch on {path}: {reason}")]
    WatchSetup { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
