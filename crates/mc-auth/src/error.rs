//! Error types for mcsync-auth.
//!
//! Error messages are designed to avoid exposing credential values.

/// Result type alias for mcsync-auth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mcsync-auth operations.
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
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// OAuth error response from the token endpoint.
    #[error("OAuth error: {error} - {description}")]
    OAuth { error: String, description: String },

    /// Invalid credentials configuration.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Environment variable not set.
    #[error("Environment variable not set: {0}")]
    EnvVar(String),

    /// HTTP error during authentication.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Building the API client from a token failed.
    #[error("Client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let sanitized = if message.contains("client_secret") || message.contains("token") {
            "HTTP request failed (details redacted for security)".to_string()
        } else {
            message
        };
        Error::with_source(ErrorKind::Http(sanitized), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<mcsync_client::Error> for Error {
    fn from(err: mcsync_client::Error) -> Self {
        let message = err.to_string();
        let sanitized = if message.contains("Bearer") {
            "Client error (details redacted for security)".to_string()
        } else {
            message
        };
        Error::with_source(ErrorKind::Client(sanitized), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        let err = ErrorKind::OAuth {
            error: "invalid_client".to_string(),
            description: "Client authentication failed.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "OAuth error: invalid_client - Client authentication failed."
        );

        let err = ErrorKind::EnvVar("MCSYNC_CLIENT_ID".to_string());
        assert_eq!(
            err.to_string(),
            "Environment variable not set: MCSYNC_CLIENT_ID"
        );
    }
}
