//! Custom grant execution
//!
//! Arbitrary grant types are POSTed to the token endpoint. Parameter values may
//! reference the current session through placeholders:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{{token}}` | current access token |
//! | `{{username}}` | stored username |
//! | `{{scope}}` | requested scope string |
//! | `{{clientID}}` | client ID |
//! | `{{clientSecret}}` | client secret |
//!
//! ```rust
//! use oidc_session::CustomGrantRequest;
//!
//! let request = CustomGrantRequest::new()
//!     .param("grant_type", "urn:example:delegate")
//!     .param("subject_token", "{{token}}")
//!     .attach_token(true);
//! assert_eq!(request.params.len(), 2);
//! ```

use serde::Serialize;
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::post_form;
use crate::id_token::IdTokenVerifier;
use crate::metadata::{Endpoint, MetadataResolver};
use crate::session::UserInfo;
use crate::storage::SessionStore;
use crate::token::establish_session;

/// Placeholder for the access token
pub const TOKEN_TAG: &str = "{{token}}";
/// Placeholder for the username
pub const USERNAME_TAG: &str = "{{username}}";
/// Placeholder for the requested scope
pub const SCOPE_TAG: &str = "{{scope}}";
/// Placeholder for the client ID
pub const CLIENT_ID_TAG: &str = "{{clientID}}";
/// Placeholder for the client secret
pub const CLIENT_SECRET_TAG: &str = "{{clientSecret}}";

/// Custom grant request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomGrantRequest {
    /// Form body parameters in send order
    pub params: Vec<(String, String)>,
    /// Send the access token as a bearer `Authorization` header
    pub attach_token: bool,
    /// The response carries tokens that replace the session
    pub returns_session: bool,
    /// Return the response (or the new user info) instead of a bare success
    pub return_response: bool,
    /// Fail with [`Error::NotSignedIn`] when no session exists
    pub sign_in_required: bool,
}

impl CustomGrantRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Attach the access token as a bearer header
    #[must_use]
    pub fn attach_token(mut self, attach: bool) -> Self {
        self.attach_token = attach;
        self
    }

    /// Treat the response as a new session
    #[must_use]
    pub fn returns_session(mut self, returns: bool) -> Self {
        self.returns_session = returns;
        self
    }

    /// Return the response to the caller
    #[must_use]
    pub fn return_response(mut self, ret: bool) -> Self {
        self.return_response = ret;
        self
    }

    /// Require a signed-in user
    #[must_use]
    pub fn sign_in_required(mut self, required: bool) -> Self {
        self.sign_in_required = required;
        self
    }

    /// Whether sending this request needs the access token
    pub fn uses_access_token(&self) -> bool {
        self.attach_token || self.params.iter().any(|(_, v)| v.contains(TOKEN_TAG))
    }
}

/// Account switch grant (`grant_type=account_switch`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSwitchRequest {
    /// User to switch to
    pub username: String,
    /// User store domain of that user
    pub userstore_domain: String,
    /// Tenant domain of that user
    pub tenant_domain: String,
}

impl AccountSwitchRequest {
    /// Create an account switch request
    pub fn new(
        username: impl Into<String>,
        userstore_domain: impl Into<String>,
        tenant_domain: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            userstore_domain: userstore_domain.into(),
            tenant_domain: tenant_domain.into(),
        }
    }

    /// The custom grant performing the switch
    pub fn into_grant(self) -> CustomGrantRequest {
        CustomGrantRequest::new()
            .param("grant_type", "account_switch")
            .param("username", self.username)
            .param("userstore-domain", self.userstore_domain)
            .param("tenant-domain", self.tenant_domain)
            .param("token", TOKEN_TAG)
            .param("scope", SCOPE_TAG)
            .param("client_id", CLIENT_ID_TAG)
            .returns_session(true)
            .return_response(true)
            .sign_in_required(true)
    }
}

/// Raw token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: String,
}

impl GrantResponse {
    /// Parse the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the body is not JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Result of a custom grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomGrantOutcome {
    /// The grant established a new session
    SignedIn(UserInfo),
    /// The raw response, as requested
    Response(GrantResponse),
    /// The grant succeeded and nothing was requested back
    Success,
}

/// Values substituted into placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateValues<'a> {
    /// `{{token}}`
    pub token: &'a str,
    /// `{{username}}`
    pub username: &'a str,
    /// `{{scope}}`
    pub scope: &'a str,
    /// `{{clientID}}`
    pub client_id: &'a str,
    /// `{{clientSecret}}`
    pub client_secret: &'a str,
}

/// Replace every placeholder occurrence in `value`
///
/// Substitution is a single pass over `value`: placeholder text inside a
/// substituted value is copied as is.
pub fn substitute(value: &str, values: &TemplateValues<'_>) -> String {
    let tags = [
        (TOKEN_TAG, values.token),
        (USERNAME_TAG, values.username),
        (SCOPE_TAG, values.scope),
        (CLIENT_ID_TAG, values.client_id),
        (CLIENT_SECRET_TAG, values.client_secret),
    ];

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        match tags.iter().find(|(tag, _)| rest.starts_with(tag)) {
            Some((tag, replacement)) => {
                out.push_str(replacement);
                rest = &rest[tag.len()..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Issues custom grants against the token endpoint
#[derive(Debug, Clone)]
pub struct CustomGrantExecutor {
    http: reqwest::Client,
    store: SessionStore,
    metadata: MetadataResolver,
    verifier: IdTokenVerifier,
}

impl CustomGrantExecutor {
    /// Create an executor over `store`
    pub fn new(http: reqwest::Client, store: SessionStore) -> Self {
        Self {
            metadata: MetadataResolver::new(http.clone(), store.clone()),
            verifier: IdTokenVerifier::new(http.clone()),
            http,
            store,
        }
    }

    /// Execute `request`
    ///
    /// `{{token}}` and the bearer header use the stored access token;
    /// [`AuthClient::custom_grant`](crate::AuthClient::custom_grant) refreshes
    /// it first when it is inside the refresh margin.
    ///
    /// # Errors
    ///
    /// * [`Error::NotSignedIn`] when a session is required or a token must be
    ///   attached but none is stored
    /// * [`Error::GrantFailed`] on a non-200 status
    /// * ID token errors when `returns_session` is set
    pub async fn execute(
        &self,
        config: &AuthConfig,
        request: &CustomGrantRequest,
    ) -> Result<CustomGrantOutcome> {
        let session = self.store.session()?;
        if (request.sign_in_required || request.attach_token) && session.is_none() {
            return Err(Error::NotSignedIn);
        }

        let token_endpoint = self.metadata.endpoint(Endpoint::Token)?;
        let scope = config.requested_scope();
        let values = TemplateValues {
            token: session.as_ref().map_or("", |s| s.access_token.as_str()),
            username: session.as_ref().map_or("", |s| s.username.as_str()),
            scope: &scope,
            client_id: &config.client_id,
            client_secret: config.client_secret().unwrap_or_default(),
        };

        let body: Vec<(String, String)> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), substitute(v, &values)))
            .collect();
        let params: Vec<(&str, &str)> = body
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let bearer = if request.attach_token {
            session.as_ref().map(|s| s.access_token.as_str())
        } else {
            None
        };

        debug!(
            token_endpoint = %token_endpoint,
            params = params.len(),
            attach_token = request.attach_token,
            "Executing custom grant"
        );
        let response = post_form(&self.http, &token_endpoint, config, &params, bearer).await?;

        if response.status != reqwest::StatusCode::OK {
            return Err(Error::GrantFailed {
                status: response.status.as_u16(),
                body: response.body,
            });
        }

        if request.returns_session {
            let record =
                establish_session(&self.verifier, &self.store, config, &response.body).await?;
            info!(username = %record.username, "Custom grant established a new session");
            if request.return_response {
                let provider = self.store.provider_config()?;
                return Ok(CustomGrantOutcome::SignedIn(UserInfo::from_session(
                    &record,
                    provider.as_ref(),
                )));
            }
            return Ok(CustomGrantOutcome::Success);
        }

        if request.return_response {
            let headers = response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            return Ok(CustomGrantOutcome::Response(GrantResponse {
                status: response.status.as_u16(),
                headers,
                body: response.body,
            }));
        }

        Ok(CustomGrantOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_substitutes_every_occurrence() {
        let values = TemplateValues {
            token: "AT1",
            username: "alice",
            scope: "openid profile",
            client_id: "abc123",
            client_secret: "",
        };
        assert_eq!(
            substitute("{{token}}:{{token}}|{{username}}|{{clientID}}{{clientSecret}}", &values),
            "AT1:AT1|alice|abc123"
        );
        assert_eq!(substitute("{{scope}}", &values), "openid profile");
        assert_eq!(substitute("{{unknown}}", &values), "{{unknown}}");
        assert_eq!(substitute("{{{token}}}", &values), "{AT1}");
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let values = TemplateValues {
            token: "AT1",
            username: "{{clientSecret}}",
            scope: "openid",
            client_id: "{{token}}",
            client_secret: "s3cr3t",
        };
        assert_eq!(
            substitute("user={{username}}&client={{clientID}}", &values),
            "user={{clientSecret}}&client={{token}}"
        );
    }

    #[test]
    fn test_uses_access_token() {
        assert!(!CustomGrantRequest::new().param("grant_type", "x").uses_access_token());
        assert!(
            CustomGrantRequest::new()
                .param("assertion", "prefix-{{token}}")
                .uses_access_token()
        );
        assert!(CustomGrantRequest::new().attach_token(true).uses_access_token());
    }

    #[test]
    fn test_account_switch_grant_shape() {
        let grant = AccountSwitchRequest::new("bob", "PRIMARY", "wso2.com").into_grant();
        let keys: Vec<&str> = grant.params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "grant_type",
                "username",
                "userstore-domain",
                "tenant-domain",
                "token",
                "scope",
                "client_id"
            ]
        );
        assert_eq!(grant.params[0].1, "account_switch");
        assert!(grant.returns_session);
        assert!(grant.sign_in_required);
        assert!(!grant.attach_token);
    }

    #[tokio::test]
    async fn test_sign_in_required_without_session() {
        use crate::storage::MemoryStorage;
        use std::sync::Arc;

        let store = SessionStore::for_client(Arc::new(MemoryStorage::new()), None, "abc123");
        let executor = CustomGrantExecutor::new(reqwest::Client::new(), store);
        let config = AuthConfig::new("abc123", "https://app.example/cb", "https://idp.example");

        let request = CustomGrantRequest::new()
            .param("grant_type", "x")
            .sign_in_required(true);
        assert!(matches!(
            executor.execute(&config, &request).await,
            Err(Error::NotSignedIn)
        ));
    }
}
