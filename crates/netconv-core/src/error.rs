//! Error types for the convergence engine
//!
//! Every failure the engine can surface maps onto one variant here, so the
//! HTTP layer (or any other embedding) can classify it without string matching.

use thiserror::Error;

/// Result type alias for netconv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the convergence engine
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed desired state or request, rejected before any device contact
    #[error("Validation error: {0}")]
    Validation(String),

    /// Template could not be loaded, parsed or rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Connection, authentication or read failure against a device
    #[error("Session error ({host}): {message}")]
    Session {
        /// Target host (`host:port`)
        host: String,
        /// Failure description
        message: String,
    },

    /// Device answered a command with an error marker
    #[error("Device {host} rejected command '{command}'")]
    DeviceRejected {
        /// Target host (`host:port`)
        host: String,
        /// The command that triggered the error marker
        command: String,
    },

    /// Identity key or record absent from the convergence store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence layer failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a session error for a host
    pub fn session(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a device rejection error
    pub fn device_rejected(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self::DeviceRejected {
            host: host.into(),
            command: command.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Json(_) | Self::Store(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<tera::Error> for Error {
    fn from(err: tera::Error) -> Self {
        // tera nests the useful detail in the source chain
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::Template(message)
    }
}
