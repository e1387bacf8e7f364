//! Error types for storage operations.

use std::fmt;

use strum::{AsRefStr, Display};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for raw object API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// The storage operation an error or metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Exists,
    Save,
    Upload,
    Delete,
    Open,
    Size,
    ModifiedTime,
    CreatedTime,
    List,
    Url,
}

/// What went wrong in an object API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The server answered with a non-success HTTP status.
    Status(u16),
    /// No response was received (connect, timeout, ...).
    Transport,
    /// A request or response body could not be encoded or decoded.
    Decode,
    /// Credentials for the request could not be obtained.
    Auth,
}

/// Errors that can occur while talking to the object API.
///
/// This is the transport-level error: it knows the HTTP status (if any) but
/// nothing about which object or storage operation it belongs to.
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    message: String,
    source: Option<anyhow::Error>,
}

impl ApiError {
    /// Error returned by the server with an HTTP status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Status(status),
            message: message.into(),
            source: None,
        }
    }

    /// Error raised before a response was received (connect, timeout, ...).
    pub fn transport(source: anyhow::Error) -> Self {
        Self::with_source(ApiErrorKind::Transport, source)
    }

    /// A body that could not be encoded or understood.
    pub fn decode(source: anyhow::Error) -> Self {
        Self::with_source(ApiErrorKind::Decode, source)
    }

    /// The token provider failed; the request was never sent.
    pub fn auth(source: anyhow::Error) -> Self {
        Self::with_source(ApiErrorKind::Auth, source)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(404, message)
    }

    fn with_source(kind: ApiErrorKind, source: anyhow::Error) -> Self {
        Self {
            kind,
            message: format!("{:#}", source),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            ApiErrorKind::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::Status(404)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ApiErrorKind::Auth
    }

    /// Identifies failures worth retrying: server errors, throttling,
    /// request timeouts and failures with no response at all.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ApiErrorKind::Transport => true,
            ApiErrorKind::Status(status) => status >= 500 || status == 408 || status == 429,
            ApiErrorKind::Decode | ApiErrorKind::Auth => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ApiErrorKind::Status(status) => write!(f, "HTTP {}: {}", status, self.message),
            ApiErrorKind::Transport => write!(f, "transport error: {}", self.message),
            ApiErrorKind::Decode => write!(f, "malformed body: {}", self.message),
            ApiErrorKind::Auth => write!(f, "failed to obtain access token: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| -> &(dyn std::error::Error + 'static) { e.as_ref() })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self {
                kind: ApiErrorKind::Status(status.as_u16()),
                message: err.to_string(),
                source: Some(anyhow::Error::from(err)),
            },
            None if err.is_decode() => ApiError::decode(anyhow::Error::from(err)),
            None => ApiError::transport(anyhow::Error::from(err)),
        }
    }
}

/// Errors surfaced by the storage backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("failed to construct object store client: {source}")]
    Construction { source: anyhow::Error },

    #[error("invalid storage configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("cannot resolve name '{name}': {reason}")]
    NameResolution { name: String, reason: String },

    #[error("object not found during {operation}: {key}")]
    NotFound { key: String, operation: Operation },

    #[error("no available name for '{key}' after {attempts} attempts")]
    Collision { key: String, attempts: usize },

    #[error("{operation} of '{key}' failed after {attempts} attempts: {source}")]
    Transient {
        key: String,
        operation: Operation,
        attempts: u32,
        source: ApiError,
    },

    #[error("{operation} of '{key}' failed: {source}")]
    Permanent {
        key: String,
        operation: Operation,
        source: ApiError,
    },

    #[error("failed to flush '{key}' on close: {source}")]
    Flush {
        key: String,
        source: Box<StorageError>,
    },

    #[error("unsupported file mode '{mode}'")]
    InvalidMode { mode: String },

    #[error("I/O error on '{key}': {source}")]
    Io { key: String, source: std::io::Error },
}

impl StorageError {
    /// Classifies a failed API call for `key`.
    ///
    /// Credential failures surface as [`StorageError::Construction`]: the
    /// client cannot be used at all until they are fixed.
    pub fn from_api(operation: Operation, key: &str, attempts: u32, err: ApiError) -> Self {
        if err.is_auth() {
            StorageError::Construction {
                source: anyhow::Error::new(err),
            }
        } else if err.is_not_found() {
            StorageError::NotFound {
                key: key.to_string(),
                operation,
            }
        } else if err.is_transient() {
            StorageError::Transient {
                key: key.to_string(),
                operation,
                attempts,
                source: err,
            }
        } else {
            StorageError::Permanent {
                key: key.to_string(),
                operation,
                source: err,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// The object key the error refers to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            StorageError::NotFound { key, .. } |
            StorageError::Collision { key, .. } |
            StorageError::Transient { key, .. } |
            StorageError::Permanent { key, .. } |
            StorageError::Flush { key, .. } |
            StorageError::Io { key, .. } => Some(key),
            StorageError::NameResolution { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            return std::io::Error::new(std::io::ErrorKind::NotFound, err);
        }
        match err {
            StorageError::Io { source, .. } => source,
            other => std::io::Error::other(other),
        }
    }
}
