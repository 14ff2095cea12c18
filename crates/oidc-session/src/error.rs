//! Error types for the session engine
//!
//! Every failure a caller can observe is a variant of [`Error`]. The only
//! non-fatal condition, an unreachable discovery document, is reported through
//! [`DiscoveryUnavailable`] inside [`crate::metadata::InitOutcome`] instead.

use thiserror::Error;

use crate::storage::StorageError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the session engine
#[derive(Debug, Error)]
pub enum Error {
    /// A required endpoint is absent from the stored provider configuration
    #[error("Required endpoint `{0}` is not available in the provider configuration")]
    MissingEndpoint(&'static str),

    /// The token endpoint answered the code exchange with HTTP 400
    #[error("Authorization code was rejected by the token endpoint: {body}")]
    InvalidAuthorizationCode {
        /// Response body returned by the identity server
        body: String,
    },

    /// The token endpoint answered the code exchange with a non-200 status
    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchangeFailed {
        /// HTTP status code
        status: u16,
        /// Response body returned by the identity server
        body: String,
    },

    /// The ID token failed signature or claim verification
    #[error("Invalid id_token: {0}")]
    InvalidIdToken(String),

    /// The JWKS does not contain the key the ID token was signed with
    #[error("No JWK found for kid `{expected}` (available: [{}])", available.join(", "))]
    KeyNotFound {
        /// `kid` from the ID token header
        expected: String,
        /// `kid` values present in the JWKS
        available: Vec<String>,
    },

    /// A token could not be parsed at all
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The refresh grant failed; the local session has been cleared
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The revoke endpoint answered with a non-200 status
    #[error("Token revocation failed with status {status}: {body}")]
    RevocationFailed {
        /// HTTP status code
        status: u16,
        /// Response body returned by the identity server
        body: String,
    },

    /// No usable session exists; local session state has been cleared
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// The operation requires a signed-in user
    #[error("No user is signed in")]
    NotSignedIn,

    /// An authenticated request targeted a URL outside the allowed base URLs
    #[error("The provided URL is not allowed: {0}")]
    IllegalUrl(String),

    /// A custom grant was answered with a non-200 status
    #[error("Custom grant failed with status {status}: {body}")]
    GrantFailed {
        /// HTTP status code
        status: u16,
        /// Response body returned by the identity server
        body: String,
    },

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration source could not be read
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Storage backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Transport level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Response body was not the expected JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the identity server no longer accepts the
    /// authorization code, so a fresh authorization redirect is the recovery
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::InvalidAuthorizationCode { .. })
    }

    /// Whether the local session was cleared as part of raising this error
    pub fn clears_session(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::InvalidSession(_))
    }
}

/// The discovery document could not be fetched or parsed.
///
/// This is informational: default endpoints were installed instead and the
/// flow continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Discovery document unavailable at {url}: {reason}")]
pub struct DiscoveryUnavailable {
    /// The discovery URL that was queried
    pub url: String,
    /// Why the document could not be used
    pub reason: String,
}
