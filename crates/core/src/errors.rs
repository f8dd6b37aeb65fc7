use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for kiln operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kiln operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A persisted cache record is corrupted or inconsistent. Fatal for the
    /// request that hit it; never retried.
    #[error("cache record at '{path}' is unusable: {message}")]
    CacheRecord { path: PathBuf, message: String },

    /// Malformed request input (bad conditional header, unknown group id, ...)
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Permission denied errors
    #[error("permission denied for {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    /// The transform toolchain failed for one stage
    #[error("transform stage '{stage}' failed: {message}")]
    Transform { stage: String, message: String },

    /// A runtime target could not be launched
    #[error("failed to launch runtime '{runtime}': {message}")]
    RuntimeLaunch { runtime: String, message: String },

    /// A runtime process exited before delivering a result
    #[error("{}", format_runtime_exit(.runtime, .code))]
    RuntimeExited {
        runtime: String,
        code: Option<i32>,
    },

    /// Envelope protocol violations on a runtime channel
    #[error("runtime protocol error: {message}")]
    Protocol { message: String },

    /// Operation timeout errors
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

fn format_runtime_exit(runtime: &str, code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("runtime '{runtime}' exited unexpectedly with code {code}"),
        None => format!("runtime '{runtime}' was killed before completing"),
    }
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a cache record error
    #[must_use]
    pub fn cache_record(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::CacheRecord {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    #[must_use]
    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PermissionDenied {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a transform stage error
    #[must_use]
    pub fn transform(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transform {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a runtime launch error
    #[must_use]
    pub fn runtime_launch(runtime: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RuntimeLaunch {
            runtime: runtime.into(),
            message: message.into(),
        }
    }

    /// Create an unexpected runtime exit error
    #[must_use]
    pub fn runtime_exited(runtime: impl Into<String>, code: Option<i32>) -> Self {
        Error::RuntimeExited {
            runtime: runtime.into(),
            code,
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Covers the transient filesystem classes (device busy, file table
    /// exhaustion, would-block). Everything else, including permission and
    /// not-found failures, is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::FileSystem { source, .. } => io_error_is_retryable(source),
            _ => false,
        }
    }

    /// Whether the error is a filesystem not-found, which cache loading
    /// treats as an absent (empty) result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::FileSystem { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[cfg(unix)]
fn io_error_is_retryable(error: &std::io::Error) -> bool {
    if error.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(
        error.raw_os_error(),
        Some(libc::EBUSY) | Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::EAGAIN)
    )
}

#[cfg(not(unix))]
fn io_error_is_retryable(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
}

// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a lazy message
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            Error::Configuration {
                message: format!("{}: {}", message.into(), base_error),
            }
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let base_error = e.into();
            Error::Configuration {
                message: format!("{}: {}", f(), base_error),
            }
        })
    }
}
