//! Error types for the Synclane protocol layer

use thiserror::Error;

/// Result type alias using the protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// A version string could not be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Two registrations claimed the same major version
    #[error("Registration collision: {kind} already registered for major version {major}")]
    RegistrationCollision {
        /// What was being registered (message migration, serializer, ...)
        kind: &'static str,
        /// The colliding major version key
        major: String,
    },

    /// The registered edges do not form a valid chain
    #[error("Invalid migration chain: {0}")]
    InvalidChain(String),

    /// A container was queried before `initialize()`
    #[error("{0} used before initialize()")]
    NotInitialized(&'static str),

    /// Upgrade/downgrade requested past the known chain
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// A migration edge received a value of the wrong concrete type
    #[error("Type mismatch in migration chain: expected {expected}")]
    TypeMismatch {
        /// Name of the type the edge expected
        expected: &'static str,
    },

    /// A migration could not transform a message
    #[error("Migration error: {0}")]
    Migration(String),

    /// Schema or structural validation failures
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors from readers and writers
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid version error
    pub fn invalid_version(msg: impl Into<String>) -> Self {
        Self::InvalidVersion(msg.into())
    }

    /// Create a registration collision error
    pub fn collision(kind: &'static str, major: impl Into<String>) -> Self {
        Self::RegistrationCollision {
            kind,
            major: major.into(),
        }
    }

    /// Create an invalid chain error
    pub fn invalid_chain(msg: impl Into<String>) -> Self {
        Self::InvalidChain(msg.into())
    }

    /// Create an unsupported version error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedVersion(msg.into())
    }

    /// Create a migration error
    pub fn migration(msg: impl Into<String>) -> Self {
        Self::Migration(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error reflects a startup-time configuration mistake
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::RegistrationCollision { .. } | Self::InvalidChain(_) | Self::NotInitialized(_)
        )
    }
}
