//! Error types for CLI operations

use std::fmt;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Error from the session engine
    #[error(transparent)]
    Session(#[from] oidc_session::Error),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get user-friendly suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        use oidc_session::Error;

        match self {
            Self::Session(Error::NotSignedIn | Error::InvalidSession(_)) => vec![
                "Run `sign-in` to start a new session",
                "Check that --state points at the file used for sign-in",
            ],
            Self::Session(Error::RefreshFailed(_)) => vec![
                "The refresh token was rejected; sign in again",
            ],
            Self::Session(Error::InvalidAuthorizationCode { .. }) => vec![
                "Authorization codes are single-use; start a new sign-in",
                "Pass the full redirect URL to --callback",
            ],
            Self::Session(Error::Config(_) | Error::ConfigSource(_)) => vec![
                "Check the file given with --config",
                "Environment overrides use the OIDC_SESSION_ prefix",
            ],
            Self::Session(Error::MissingEndpoint(_)) => vec![
                "Run `endpoints --discover` to load the provider metadata",
            ],
            Self::Session(Error::Http(_)) => vec![
                "Check that server_origin is reachable",
                "Increase request_timeout_secs in the configuration",
            ],
            Self::InvalidArguments(_) => vec![
                "Parameters are passed as KEY=VALUE",
                "Use --help to see expected format",
            ],
            _ => vec![],
        }
    }

    /// Get the error category for colored output
    pub fn category(&self) -> ErrorCategory {
        use oidc_session::Error;

        match self {
            Self::Session(Error::Http(_)) => ErrorCategory::Connection,
            Self::Session(
                Error::NotSignedIn
                | Error::InvalidSession(_)
                | Error::RefreshFailed(_)
                | Error::InvalidAuthorizationCode { .. },
            ) => ErrorCategory::Session,
            Self::Session(
                Error::TokenExchangeFailed { .. }
                | Error::RevocationFailed { .. }
                | Error::GrantFailed { .. },
            ) => ErrorCategory::Provider,
            Self::Session(
                Error::InvalidIdToken(_) | Error::KeyNotFound { .. } | Error::MalformedToken(_),
            ) => ErrorCategory::Verification,
            Self::Session(Error::Config(_) | Error::ConfigSource(_) | Error::MissingEndpoint(_)) => {
                ErrorCategory::Config
            }
            Self::Session(Error::Storage(_)) | Self::Io(_) => ErrorCategory::System,
            Self::InvalidArguments(_) => ErrorCategory::User,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Session(_) => ErrorCategory::Other,
        }
    }
}

/// Error categories for colored output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Session,
    Provider,
    Verification,
    Config,
    System,
    User,
    Parsing,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "Connection"),
            Self::Session => write!(f, "Session"),
            Self::Provider => write!(f, "Identity Provider"),
            Self::Verification => write!(f, "Token Verification"),
            Self::Config => write!(f, "Configuration"),
            Self::System => write!(f, "System"),
            Self::User => write!(f, "User Input"),
            Self::Parsing => write!(f, "Parsing"),
            Self::Other => write!(f, "Error"),
        }
    }
}
