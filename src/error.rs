use thiserror::Error;

/// Error produced by application code: message validation, task construction
/// or task execution.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Generic error type for the worker library.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Error originating from the underlying `lapin` library.
    #[error("RabbitMQ communication error: {0}")]
    Lapin(#[from] lapin::Error),

    /// Error while encoding or decoding a JSON payload.
    #[error("Failed to (de)serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom messaging-related error.
    #[error("Messaging setup or configuration error: {message}")]
    MessagingError {
        message: String,
    },

    /// A task failed while running. The message it was built from stays unacknowledged.
    #[error("Task execution failed: {0}")]
    Task(#[source] TaskError),

    /// `trace` was called on a context that has no sink bound.
    #[error("No trace sink bound to the current trail context")]
    NoTraceSink,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// Allow converting from a string-like type into a MessagingError
impl From<&str> for WorkerError {
    fn from(s: &str) -> Self {
        WorkerError::MessagingError { message: s.to_string() }
    }
}

impl From<String> for WorkerError {
    fn from(s: String) -> Self {
        WorkerError::MessagingError { message: s }
    }
}
