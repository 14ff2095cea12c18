//! OpenID provider metadata resolution
//!
//! The [`MetadataResolver`] makes sure a valid [`ProviderConfiguration`] is in
//! the session store before any flow needs an endpoint. Discovery is fetched
//! from `{origin}/.well-known/openid-configuration`; when that fails the
//! resolver installs endpoints at fixed paths under the origin and reports
//! [`InitOutcome::DefaultEndpoints`] so the flow can continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::{DiscoveryUnavailable, Error, Result};
use crate::storage::SessionStore;

/// Path of the discovery document under the server origin
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

const DEFAULT_AUTHORIZE_PATH: &str = "/oauth2/authorize";
const DEFAULT_TOKEN_PATH: &str = "/oauth2/token";
const DEFAULT_REVOKE_PATH: &str = "/oauth2/revoke";
const DEFAULT_LOGOUT_PATH: &str = "/oidc/logout";
const DEFAULT_JWKS_PATH: &str = "/oauth2/jwks";
const DEFAULT_CHECK_SESSION_PATH: &str = "/oidc/checksession";

/// Endpoints and issuer of the identity provider, bound to one client ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    /// Authorization endpoint
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Revocation endpoint
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    /// End-session (logout) endpoint
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    /// JWKS endpoint
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Check-session iframe endpoint
    #[serde(default)]
    pub check_session_iframe: Option<String>,
    /// Expected `iss` of ID tokens
    #[serde(default)]
    pub issuer: String,
    /// Client ID this configuration was resolved for
    #[serde(default)]
    pub client_id: String,
    /// Whether resolution completed
    #[serde(default)]
    pub initiated: bool,
}

impl ProviderConfiguration {
    /// Valid only when resolved and bound to `client_id`
    pub fn is_valid_for(&self, client_id: &str) -> bool {
        self.initiated && self.client_id == client_id
    }

    /// Look up an endpoint that may be absent
    pub fn get(&self, endpoint: Endpoint) -> Option<&str> {
        let value = match endpoint {
            Endpoint::Authorization => &self.authorization_endpoint,
            Endpoint::Token => &self.token_endpoint,
            Endpoint::Revocation => &self.revocation_endpoint,
            Endpoint::EndSession => &self.end_session_endpoint,
            Endpoint::Jwks => &self.jwks_uri,
            Endpoint::CheckSession => &self.check_session_iframe,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Look up a required endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEndpoint`] if the endpoint is absent or empty.
    pub fn require(&self, endpoint: Endpoint) -> Result<&str> {
        self.get(endpoint)
            .ok_or(Error::MissingEndpoint(endpoint.as_str()))
    }

    /// Configuration built from fixed paths under the server origin
    pub fn defaults(config: &AuthConfig) -> Self {
        let origin = config.origin();
        Self {
            authorization_endpoint: Some(format!("{origin}{DEFAULT_AUTHORIZE_PATH}")),
            token_endpoint: Some(format!("{origin}{DEFAULT_TOKEN_PATH}")),
            revocation_endpoint: Some(format!("{origin}{DEFAULT_REVOKE_PATH}")),
            end_session_endpoint: Some(format!("{origin}{DEFAULT_LOGOUT_PATH}")),
            jwks_uri: Some(format!("{origin}{DEFAULT_JWKS_PATH}")),
            check_session_iframe: Some(format!("{origin}{DEFAULT_CHECK_SESSION_PATH}")),
            issuer: default_issuer(config),
            client_id: config.client_id.clone(),
            initiated: true,
        }
    }

    fn from_document(doc: DiscoveryDocument, config: &AuthConfig) -> Self {
        let revocation_endpoint = doc.revocation_endpoint.or_else(|| {
            doc.token_endpoint
                .as_deref()
                .map(|token| derive_revocation_endpoint(token, config))
        });

        Self {
            authorization_endpoint: doc.authorization_endpoint,
            token_endpoint: doc.token_endpoint,
            revocation_endpoint,
            end_session_endpoint: doc.end_session_endpoint,
            jwks_uri: doc.jwks_uri,
            check_session_iframe: doc.check_session_iframe,
            issuer: doc
                .issuer
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| default_issuer(config)),
            client_id: config.client_id.clone(),
            initiated: true,
        }
    }
}

/// Issuer assumed when the provider does not announce one
pub fn default_issuer(config: &AuthConfig) -> String {
    format!("{}{DEFAULT_TOKEN_PATH}", config.origin())
}

/// Revocation endpoint next to a token endpoint (`.../token` -> `.../revoke`)
pub fn derive_revocation_endpoint(token_endpoint: &str, config: &AuthConfig) -> String {
    match token_endpoint.strip_suffix("token") {
        Some(base) => format!("{base}revoke"),
        None => format!("{}{DEFAULT_REVOKE_PATH}", config.origin()),
    }
}

/// Provider endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `authorization_endpoint`
    Authorization,
    /// `token_endpoint`
    Token,
    /// `revocation_endpoint`
    Revocation,
    /// `end_session_endpoint`
    EndSession,
    /// `jwks_uri`
    Jwks,
    /// `check_session_iframe`
    CheckSession,
}

impl Endpoint {
    /// Every endpoint, in discovery document order
    pub const ALL: [Endpoint; 6] = [
        Self::Authorization,
        Self::Token,
        Self::Revocation,
        Self::EndSession,
        Self::Jwks,
        Self::CheckSession,
    ];

    /// Discovery document field name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization_endpoint",
            Self::Token => "token_endpoint",
            Self::Revocation => "revocation_endpoint",
            Self::EndSession => "end_session_endpoint",
            Self::Jwks => "jwks_uri",
            Self::CheckSession => "check_session_iframe",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    revocation_endpoint: Option<String>,
    #[serde(default)]
    end_session_endpoint: Option<String>,
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(default)]
    check_session_iframe: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
}

/// Result of [`MetadataResolver::ensure_initialized`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// A valid stored configuration was reused without network I/O
    Cached,
    /// The discovery document was fetched and stored
    Discovered,
    /// Discovery failed; default endpoints were stored instead
    DefaultEndpoints(DiscoveryUnavailable),
}

impl InitOutcome {
    /// Whether a network round-trip was made
    pub fn fetched(&self) -> bool {
        !matches!(self, Self::Cached)
    }
}

/// Resolves and caches provider metadata in a session store
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    http: reqwest::Client,
    store: SessionStore,
}

impl MetadataResolver {
    /// Create a resolver over `store`
    pub fn new(http: reqwest::Client, store: SessionStore) -> Self {
        Self { http, store }
    }

    /// Make sure a valid provider configuration is stored.
    ///
    /// Without `force`, a configuration that is valid for `config.client_id`
    /// is reused and no request is made.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors; an unreachable discovery document
    /// yields [`InitOutcome::DefaultEndpoints`].
    pub async fn ensure_initialized(&self, config: &AuthConfig, force: bool) -> Result<InitOutcome> {
        if !force && self.is_valid(config)? {
            debug!(client_id = %config.client_id, "Using stored provider configuration");
            return Ok(InitOutcome::Cached);
        }

        let url = format!("{}{DISCOVERY_PATH}", config.origin());
        match self.discover(&url).await {
            Ok(doc) => {
                let provider = ProviderConfiguration::from_document(doc, config);
                self.store.replace_provider_config(&provider)?;
                info!(
                    discovery_url = %url,
                    issuer = %provider.issuer,
                    "Resolved provider configuration"
                );
                Ok(InitOutcome::Discovered)
            }
            Err(reason) => {
                let provider = ProviderConfiguration::defaults(config);
                self.store.replace_provider_config(&provider)?;
                warn!(
                    discovery_url = %url,
                    reason = %reason,
                    "Discovery unavailable, using default endpoints"
                );
                Ok(InitOutcome::DefaultEndpoints(DiscoveryUnavailable {
                    url,
                    reason,
                }))
            }
        }
    }

    async fn discover(&self, url: &str) -> std::result::Result<DiscoveryDocument, String> {
        debug!(discovery_url = %url, "Fetching discovery document");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        response
            .json::<DiscoveryDocument>()
            .await
            .map_err(|e| format!("invalid discovery document: {e}"))
    }

    /// Delete the stored provider configuration
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn reset(&self) -> Result<()> {
        self.store.clear_provider_config()?;
        debug!("Provider configuration reset");
        Ok(())
    }

    /// Whether the stored configuration is resolved and bound to this client
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn is_valid(&self, config: &AuthConfig) -> Result<bool> {
        Ok(self
            .store
            .provider_config()?
            .is_some_and(|p| p.is_valid_for(&config.client_id)))
    }

    /// Stored provider configuration
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn service_endpoints(&self) -> Result<Option<ProviderConfiguration>> {
        Ok(self.store.provider_config()?)
    }

    /// Required endpoint from the stored configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEndpoint`] if nothing is stored or the endpoint
    /// is absent.
    pub fn endpoint(&self, endpoint: Endpoint) -> Result<String> {
        let provider = self
            .store
            .provider_config()?
            .ok_or(Error::MissingEndpoint(endpoint.as_str()))?;
        provider.require(endpoint).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn config() -> AuthConfig {
        AuthConfig::new("abc123", "https://app.example/callback", "https://idp.example")
    }

    #[test]
    fn test_defaults_under_origin() {
        let provider = ProviderConfiguration::defaults(&config());
        assert_eq!(
            provider.authorization_endpoint.as_deref(),
            Some("https://idp.example/oauth2/authorize")
        );
        assert_eq!(
            provider.check_session_iframe.as_deref(),
            Some("https://idp.example/oidc/checksession")
        );
        assert_eq!(provider.issuer, "https://idp.example/oauth2/token");
        assert!(provider.is_valid_for("abc123"));
    }

    #[test]
    fn test_client_binding() {
        let mut provider = ProviderConfiguration::defaults(&config());
        assert!(!provider.is_valid_for("other"));
        provider.initiated = false;
        assert!(!provider.is_valid_for("abc123"));
    }

    #[test]
    fn test_revocation_derived_from_token_endpoint() {
        assert_eq!(
            derive_revocation_endpoint("https://idp.example/t/wso2.com/oauth2/token", &config()),
            "https://idp.example/t/wso2.com/oauth2/revoke"
        );
        assert_eq!(
            derive_revocation_endpoint("https://idp.example/connect/tok", &config()),
            "https://idp.example/oauth2/revoke"
        );
    }

    #[test]
    fn test_missing_endpoint() {
        let provider = ProviderConfiguration {
            end_session_endpoint: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            provider.require(Endpoint::EndSession),
            Err(Error::MissingEndpoint("end_session_endpoint"))
        ));

        let store = SessionStore::for_client(Arc::new(MemoryStorage::new()), None, "abc123");
        let resolver = MetadataResolver::new(reqwest::Client::new(), store);
        assert!(matches!(
            resolver.endpoint(Endpoint::Token),
            Err(Error::MissingEndpoint("token_endpoint"))
        ));
    }
}
