//! Session record and identity types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metadata::ProviderConfiguration;

/// Seconds before expiry at which a stored access token stops being handed out
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Current unix time in seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint response body
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Issued access token
    pub access_token: String,
    /// Issued ID token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Issued refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, `Bearer` when absent
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("has_id_token", &self.id_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Identity derived from ID token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// `preferred_username`, or `sub` when absent
    pub display_name: String,
    /// `email` claim
    pub email: Option<String>,
    /// `sub` claim
    pub username: String,
}

/// The durable unit of authentication state.
///
/// A record is only ever built from one token response and replaced as a
/// whole; fields the server did not return are empty, never carried over.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Access token
    pub access_token: String,
    /// ID token
    pub id_token: String,
    /// Refresh token, if the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type
    pub token_type: String,
    /// Space-delimited granted scope
    #[serde(default)]
    pub scope: String,
    /// Unix seconds at which the token response was received
    pub issued_at: i64,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Display name
    pub display_name: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Username (`sub`)
    pub username: String,
}

impl SessionRecord {
    /// Build a record from a verified token response
    pub fn from_token_response(
        tokens: TokenResponse,
        id_token: String,
        user: AuthenticatedUser,
        issued_at: i64,
    ) -> Self {
        Self {
            access_token: tokens.access_token,
            id_token,
            refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
            token_type: tokens.token_type,
            scope: tokens.scope.unwrap_or_default(),
            issued_at,
            expires_in: tokens.expires_in.unwrap_or(0),
            display_name: user.display_name,
            email: user.email,
            username: user.username,
        }
    }

    /// Whether every required token field is populated
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.id_token.is_empty() && !self.token_type.is_empty()
    }

    /// Seconds of access token validity left at `now`
    pub fn remaining_lifetime(&self, now: i64) -> i64 {
        self.issued_at + self.expires_in - now
    }

    /// Whether the access token is inside the refresh margin at `now`
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.remaining_lifetime(now) <= REFRESH_MARGIN_SECS
    }

    /// Identity part of the record
    pub fn user(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_record(access_token: &str, issued_at: i64, expires_in: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            id_token: "header.payload.signature".to_string(),
            refresh_token: Some("RT1".to_string()),
            token_type: "Bearer".to_string(),
            scope: "openid".to_string(),
            issued_at,
            expires_in,
            display_name: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            username: "alice".to_string(),
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("username", &self.username)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Signed-in user summary returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    /// Granted scope
    pub allowed_scopes: String,
    /// Authorization endpoint of the provider
    pub authorization_endpoint: Option<String>,
    /// Display name
    pub display_name: String,
    /// Email address
    pub email: Option<String>,
    /// Check-session iframe endpoint
    pub oidc_session_iframe: Option<String>,
    /// Username
    pub username: String,
}

impl UserInfo {
    /// Combine a session with the provider endpoints it was issued by
    pub fn from_session(record: &SessionRecord, provider: Option<&ProviderConfiguration>) -> Self {
        Self {
            allowed_scopes: record.scope.clone(),
            authorization_endpoint: provider.and_then(|p| p.authorization_endpoint.clone()),
            display_name: record.display_name.clone(),
            email: record.email.clone(),
            oidc_session_iframe: provider.and_then(|p| p.check_session_iframe.clone()),
            username: record.username.clone(),
        }
    }
}
