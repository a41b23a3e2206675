//! Error types for Synclane Core

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the replication engine
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol layer errors (versions, migrations, serdes)
    #[error("Protocol error: {0}")]
    Protocol(#[from] synclane_protocol::Error),

    /// I/O errors from connector pipes and job files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors from job files and connector configs
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic worker failures
    #[error("Worker error: {0}")]
    Worker(String),

    /// A connector exited with a non-zero, non-ignored code
    #[error("{role} process exited with non-zero exit code {code}")]
    ProcessExit {
        /// "source" or "destination"
        role: &'static str,
        /// Exit code as reported by the OS
        code: i32,
    },

    /// The source stopped producing output for longer than the freshness window
    #[error("Heartbeat timeout: no source output for {}s", .0.as_secs())]
    HeartbeatTimeout(Duration),

    /// State delta ledger overflow or duplicate commit
    #[error("State tracker error: {0}")]
    StateTracker(String),

    /// A record did not match its stream schema
    #[error("Schema validation error on stream {stream}: {errors}")]
    SchemaValidation {
        /// Stream the record belongs to
        stream: String,
        /// Joined validation messages
        errors: String,
    },

    /// Invalid worker or job configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure attributed to the source side
    #[error("Source error: {message}: {cause}")]
    Source {
        /// What the pump was doing
        message: String,
        /// Underlying failure
        #[source]
        cause: Box<Error>,
    },

    /// Failure attributed to the destination side
    #[error("Destination error: {message}: {cause}")]
    Destination {
        /// What the pump was doing
        message: String,
        /// Underlying failure
        #[source]
        cause: Box<Error>,
    },
}

impl Error {
    /// Create a worker error
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Create a state tracker error
    pub fn state_tracker(msg: impl Into<String>) -> Self {
        Self::StateTracker(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Tag `cause` as coming from the source
    pub fn source_failure(msg: impl Into<String>, cause: Error) -> Self {
        Self::Source {
            message: msg.into(),
            cause: Box::new(cause),
        }
    }

    /// Tag `cause` as coming from the destination
    pub fn destination_failure(msg: impl Into<String>, cause: Error) -> Self {
        Self::Destination {
            message: msg.into(),
            cause: Box::new(cause),
        }
    }

    /// Whether this failure is already tagged with an origin
    pub fn has_origin(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::Destination { .. })
    }

    /// Innermost untagged error
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Source { cause, .. } | Self::Destination { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
