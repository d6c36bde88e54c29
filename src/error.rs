// Error taxonomy shared by every part of the client. Each failure category
// gets its own variant so callers (and the CLI) can branch on it.

use reqwest::StatusCode;
use std::path::PathBuf;

use crate::archive::ArchiveError;
use crate::credentials::CredentialError;

/// Convenience alias used throughout the library.
pub type Result<T, E = LumaError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum LumaError {
    /// Missing, malformed or rejected API key.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Local validation failed before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("capture not found: {0}")]
    NotFound(String),
    /// Transferring the payload to the signed upload URL failed.
    #[error("upload failed: {message}")]
    Upload {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    #[error("request to the Luma API failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Luma API returned status {status}: {message}")]
    Server { status: StatusCode, message: String },
    /// The server answered, but not with the payload the client expects.
    #[error("malformed response from the Luma API: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error at {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LumaError {
    /// Whether this error came from the server rejecting the credential.
    pub fn is_authentication(&self) -> bool {
        matches!(self, LumaError::Authentication(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LumaError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_message_includes_status() {
        let err = LumaError::Server {
            status: StatusCode::BAD_GATEWAY,
            message: "upstream down".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("502"));
        assert!(rendered.contains("upstream down"));
    }

    #[test]
    fn upload_error_without_source_has_no_cause() {
        use std::error::Error as _;
        let err = LumaError::Upload {
            message: "rejected".into(),
            source: None,
        };
        assert!(err.source().is_none());
        assert!(!err.is_authentication());
    }
}
