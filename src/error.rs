//! Error types for lidar-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// lidar-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device reported a non-success status for a control command
    #[error("Protocol error: {message}")]
    Protocol {
        /// Human readable description
        message: String,
        /// Device error code, when the device returned one
        code: Option<i32>,
    },

    /// Checksum or magic mismatch on the data stream
    #[error("Frame integrity error: {0}")]
    FrameIntegrity(String),

    /// Transport failure that ended the session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation invoked in a state that does not allow it
    #[error("Invalid state: {0}")]
    State(String),

    /// Operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP transport error on the control plane
    #[error("HTTP error: {0}")]
    Http(String),

    /// Malformed JSON response
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A worker thread panicked
    #[error("Worker thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Protocol error without a device error code
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
            code: None,
        }
    }

    /// Protocol error carrying the device's error code
    pub fn protocol_with_code(message: impl Into<String>, code: i32) -> Self {
        Error::Protocol {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
