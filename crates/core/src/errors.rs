use std::path::PathBuf;

/// Result type alias for capbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// What a GUI/CLI collaborator is allowed to learn about a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call reached the broker and failed; retrying may help.
    Failed,
    /// No broker handle could be obtained.
    Unavailable,
}

/// Core error type for capbridge operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A well-known service is not registered or not answering
    #[error("service '{service}' is unavailable")]
    ServiceUnavailable { service: String },

    /// The remote object behind a handle has died
    #[error("remote object died during {operation}")]
    DeadObject { operation: String },

    /// The transport rejected or failed to deliver a call
    #[error("transaction {code:#010x} failed: {message}")]
    Transaction { code: u32, message: String },

    /// An exception propagated back from the remote side
    #[error("remote exception: {message}")]
    RemoteException { message: String },

    /// A reply or request did not have the expected shape
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Persistent storage errors
    #[error("storage {operation} failed: {message}")]
    Storage { operation: String, message: String },

    /// The persistent backend could not be opened for this process lifetime
    #[error("storage at '{path}' is unavailable")]
    StorageUnavailable { path: PathBuf },

    /// Permission denied errors
    #[error("permission denied for {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    /// The platform restart signal could not be issued
    #[error("escalation failed: {message}")]
    Escalation { message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

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

    /// Binary payload encoding errors
    #[error("encoding error: {message}")]
    Encoding { message: String },
}

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

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Encoding {
            message: error.to_string(),
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a service unavailable error
    #[must_use]
    pub fn service_unavailable(service: impl Into<String>) -> Self {
        Error::ServiceUnavailable {
            service: service.into(),
        }
    }

    /// Create a dead object error
    #[must_use]
    pub fn dead_object(operation: impl Into<String>) -> Self {
        Error::DeadObject {
            operation: operation.into(),
        }
    }

    /// Create a transaction failure error
    #[must_use]
    pub fn transaction(code: u32, message: impl Into<String>) -> Self {
        Error::Transaction {
            code,
            message: message.into(),
        }
    }

    /// Create a remote exception error
    #[must_use]
    pub fn remote_exception(message: impl Into<String>) -> Self {
        Error::RemoteException {
            message: message.into(),
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Create a storage error
    #[must_use]
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a storage unavailable error
    #[must_use]
    pub fn storage_unavailable(path: impl Into<PathBuf>) -> Self {
        Error::StorageUnavailable { path: path.into() }
    }

    /// Create a permission denied error
    #[must_use]
    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PermissionDenied {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an escalation error
    #[must_use]
    pub fn escalation(message: impl Into<String>) -> Self {
        Error::Escalation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

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

    /// Whether the failure is one of the transient unavailability kinds that
    /// rendezvous and locator paths retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ServiceUnavailable { .. }
                | Error::DeadObject { .. }
                | Error::Transaction { .. }
                | Error::RemoteException { .. }
                | Error::Protocol { .. }
        )
    }

    /// Collapse the error into what a user-facing collaborator may observe.
    pub fn outcome(&self) -> CallOutcome {
        match self {
            Error::ServiceUnavailable { .. } => CallOutcome::Unavailable,
            _ => CallOutcome::Failed,
        }
    }
}
