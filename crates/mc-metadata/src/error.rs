//! Error types for mcsync-metadata.

use crate::cache::LookupError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for an item-level validation failure.
    pub fn invalid_item(
        metadata_type: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::InvalidItem {
            metadata_type: metadata_type.into(),
            key: key.into(),
            message: message.into(),
        })
    }

    /// Shorthand for an operation a type does not implement.
    pub fn unsupported(metadata_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedOperation {
            metadata_type: metadata_type.into(),
            operation: operation.into(),
        })
    }

    /// Normalized message list for logging.
    ///
    /// Transport errors contribute the messages parsed from the REST or SOAP
    /// error body; everything else contributes its display text.
    pub fn messages(&self) -> Vec<String> {
        if let ErrorKind::Client(_) = self.kind {
            if let Some(client) = self
                .source
                .as_ref()
                .and_then(|s| s.downcast_ref::<mcsync_client::Error>())
            {
                return client.messages();
            }
        }
        vec![self.kind.to_string()]
    }

    /// Returns true for errors that must stop the whole run rather than a
    /// single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::MissingFile { .. } | ErrorKind::UnsupportedOperation { .. }
        )
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Transport error from the REST or SOAP API.
    #[error("API error: {0}")]
    Client(String),

    /// A code file expected next to an item's JSON is absent.
    #[error("File not found: {path}")]
    MissingFile { path: String },

    /// The type does not implement the requested operation.
    #[error("{metadata_type} does not support {operation}")]
    UnsupportedOperation {
        metadata_type: String,
        operation: String,
    },

    /// Template substitution failed for one file.
    #[error("Template error in {metadata_type} file {file}: {message}")]
    Template {
        metadata_type: String,
        file: String,
        message: String,
    },

    /// An item cannot be processed as-is.
    #[error("{metadata_type} {key}: {message}")]
    InvalidItem {
        metadata_type: String,
        key: String,
        message: String,
    },

    /// Cache lookup failed for a required reference.
    #[error("{0}")]
    Lookup(#[from] LookupError),

    /// No adapter is registered under this name.
    #[error("Unknown metadata type: {0}")]
    UnknownType(String),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<mcsync_client::Error> for Error {
    fn from(err: mcsync_client::Error) -> Self {
        Error::with_source(ErrorKind::Client(err.to_string()), err)
    }
}

impl From<LookupError> for Error {
    fn from(err: LookupError) -> Self {
        Error::new(ErrorKind::Lookup(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(ErrorKind::Io(err.to_string()), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}
