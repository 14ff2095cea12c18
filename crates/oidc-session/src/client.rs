//! Session facade
//!
//! [`AuthClient`] composes metadata resolution, the token manager and the
//! custom grant executor behind the sign-in / sign-out surface. Hosts that can
//! navigate get redirects through their [`Navigator`]; the isolated
//! [`StorageKind::WebWorker`](crate::StorageKind::WebWorker) backend receives
//! the URLs back instead.

use futures::future::try_join_all;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::grant::{
    AccountSwitchRequest, CustomGrantExecutor, CustomGrantOutcome, CustomGrantRequest,
};
use crate::http::build_client;
use crate::metadata::{Endpoint, InitOutcome, ProviderConfiguration};
use crate::navigator::Navigator;
use crate::pkce::{CODE_CHALLENGE_METHOD, code_challenge, code_verifier};
use crate::session::{SessionRecord, UserInfo};
use crate::storage::{SessionStore, Storage};
use crate::token::TokenManager;

/// Result of [`AuthClient::sign_in`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// A session exists (reused or just established)
    SignedIn(UserInfo),
    /// The navigator was sent to the authorization endpoint
    Redirected(Url),
    /// The caller must navigate to `url` itself
    AuthorizationRequired {
        /// Authorization request URL
        url: Url,
        /// PKCE verifier bound to the request, if PKCE is enabled
        code_verifier: Option<String>,
    },
}

/// Result of [`AuthClient::sign_out`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutOutcome {
    /// The navigator was sent to the end-session endpoint
    Redirected(Url),
    /// The caller must navigate to this end-session URL itself
    LogoutUrl(Url),
}

/// Build the authorization request URL.
///
/// Parameters are appended in a fixed order: `response_type`, `client_id`,
/// `scope`, `redirect_uri`, `response_mode`, `code_challenge_method`,
/// `code_challenge`, `prompt`. Optional ones are omitted when unset.
///
/// # Errors
///
/// Returns [`Error::Url`] if `authorize_endpoint` is not a valid URL.
pub fn authorization_url(
    authorize_endpoint: &str,
    config: &AuthConfig,
    challenge: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(authorize_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("scope", &config.requested_scope());
        if !config.callback_url.is_empty() {
            query.append_pair("redirect_uri", &config.callback_url);
        }
        if let Some(mode) = config.response_mode {
            query.append_pair("response_mode", mode.as_str());
        }
        if let Some(challenge) = challenge {
            query
                .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD)
                .append_pair("code_challenge", challenge);
        }
        if let Some(prompt) = config.prompt.as_deref().filter(|p| !p.is_empty()) {
            query.append_pair("prompt", prompt);
        }
    }
    Ok(url)
}

/// Same origin, and the path is the base path or lies below it on a segment boundary
fn is_under(url: &Url, base: &Url) -> bool {
    if url.origin() != base.origin() {
        return false;
    }
    let path = url.path();
    let prefix = base.path();
    if prefix.ends_with('/') {
        return path.starts_with(prefix);
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Builder for [`AuthClient`]
#[derive(Debug)]
pub struct AuthClientBuilder {
    config: AuthConfig,
    storage: Option<Arc<dyn Storage>>,
    http: Option<reqwest::Client>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl AuthClientBuilder {
    /// Start from a configuration
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            storage: None,
            http: None,
            navigator: None,
        }
    }

    /// Use `storage` instead of opening the backend named by the configuration
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Navigator for authorize and end-session redirects
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or a
    /// navigating backend was selected without a navigator, and storage errors
    /// if the durable backend cannot be opened.
    pub fn build(self) -> Result<AuthClient> {
        self.config.validate()?;
        if self.config.storage.can_navigate() && self.navigator.is_none() {
            return Err(Error::Config(format!(
                "{} storage performs redirects and requires a navigator",
                self.config.storage
            )));
        }

        let storage = match self.storage {
            Some(storage) => storage,
            None => self
                .config
                .storage
                .open(self.config.storage_path.as_deref())?,
        };
        let http = match self.http {
            Some(http) => http,
            None => build_client(self.config.request_timeout())?,
        };

        let store = SessionStore::for_client(
            storage,
            self.config.tenant.as_deref(),
            &self.config.client_id,
        );
        debug!(scope = %store.namespace(), storage = %self.config.storage, "Session store ready");

        Ok(AuthClient {
            tokens: TokenManager::new(http.clone(), store.clone()),
            grants: CustomGrantExecutor::new(http.clone(), store.clone()),
            config: self.config,
            http,
            store,
            navigator: self.navigator,
        })
    }
}

/// OIDC session client for one (tenant, client) scope
#[derive(Debug)]
pub struct AuthClient {
    config: AuthConfig,
    http: reqwest::Client,
    store: SessionStore,
    tokens: TokenManager,
    grants: CustomGrantExecutor,
    navigator: Option<Arc<dyn Navigator>>,
}

impl AuthClient {
    /// Start building a client
    pub fn builder(config: AuthConfig) -> AuthClientBuilder {
        AuthClientBuilder::new(config)
    }

    /// Configuration of this client
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Token manager of this client
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    fn user_info(&self, record: &SessionRecord) -> Result<UserInfo> {
        let provider = self.store.provider_config()?;
        Ok(UserInfo::from_session(record, provider.as_ref()))
    }

    fn navigate(&self, url: &Url) -> Result<()> {
        let navigator = self
            .navigator
            .as_ref()
            .ok_or_else(|| Error::Config("no navigator configured".to_string()))?;
        navigator.navigate(url)
    }

    /// Sign the user in.
    ///
    /// * A stored session with a provider configuration bound to this client
    ///   is reused without network I/O.
    /// * A configuration bound to another client is destroyed together with
    ///   the session and discovery is forced.
    /// * With an authorization code in `location` (or relayed through
    ///   storage) the code is exchanged; a code rejected with HTTP 400 falls
    ///   back to a new authorization request.
    /// * Otherwise an authorization request is issued.
    ///
    /// # Errors
    ///
    /// Propagates exchange, verification, storage and transport errors.
    pub async fn sign_in(&self, location: Option<&Url>) -> Result<SignInOutcome> {
        let metadata = self.tokens.metadata();
        let provider_valid = metadata.is_valid(&self.config)?;

        let session = self.store.session()?;

        if provider_valid && let Some(session) = &session {
            debug!(username = %session.username, "Reusing stored session");
            return Ok(SignInOutcome::SignedIn(self.user_info(session)?));
        }

        let stale = !provider_valid
            && (session.is_some() || self.store.provider_config()?.is_some());
        if stale {
            warn!(
                client_id = %self.config.client_id,
                "Stored provider configuration is not valid for this client, resetting"
            );
            self.store.clear_session()?;
            metadata.reset()?;
        }

        if let InitOutcome::DefaultEndpoints(reason) =
            metadata.ensure_initialized(&self.config, stale).await?
        {
            debug!(reason = %reason, "Continuing sign-in with default endpoints");
        }

        if self.tokens.has_authorization_code(location)? {
            match self.tokens.exchange_code(&self.config, location).await {
                Ok(record) => return Ok(SignInOutcome::SignedIn(self.user_info(&record)?)),
                Err(e) if e.requires_reauthorization() => {
                    warn!(error = %e, "Authorization code unusable, requesting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        self.request_authorization()
    }

    fn request_authorization(&self) -> Result<SignInOutcome> {
        let authorize = self.tokens.metadata().endpoint(Endpoint::Authorization)?;

        let verifier = self.config.enable_pkce.then(code_verifier);
        let challenge = verifier.as_deref().map(code_challenge);
        let url = authorization_url(&authorize, &self.config, challenge.as_deref())?;
        if let Some(verifier) = verifier.as_deref() {
            self.store.set_code_verifier(verifier)?;
        }

        info!(authorize_endpoint = %authorize, "Authorization required");
        if self.config.storage.can_navigate() {
            self.navigate(&url)?;
            Ok(SignInOutcome::Redirected(url))
        } else {
            Ok(SignInOutcome::AuthorizationRequired {
                url,
                code_verifier: verifier,
            })
        }
    }

    /// Sign the user out.
    ///
    /// Local session and provider configuration are cleared before the
    /// end-session URL is built.
    ///
    /// # Errors
    ///
    /// Fails before touching any state with [`Error::MissingEndpoint`] when no
    /// end-session endpoint is known, [`Error::NotSignedIn`] without an ID
    /// token, or [`Error::Config`] without a redirect URL.
    pub async fn sign_out(&self) -> Result<SignOutOutcome> {
        let end_session = self
            .store
            .provider_config()?
            .as_ref()
            .and_then(|p| p.get(Endpoint::EndSession).map(str::to_string))
            .ok_or(Error::MissingEndpoint(Endpoint::EndSession.as_str()))?;
        let session = self.store.session()?.ok_or(Error::NotSignedIn)?;
        let redirect = self.config.sign_out_redirect();
        if redirect.is_empty() {
            return Err(Error::Config(
                "a sign-out redirect URL is required".to_string(),
            ));
        }

        let mut url = Url::parse(&end_session)?;
        url.query_pairs_mut()
            .append_pair("id_token_hint", &session.id_token)
            .append_pair("post_logout_redirect_uri", redirect);

        self.store.clear_all()?;
        info!(username = %session.username, "Signed out");

        if self.config.storage.can_navigate() {
            self.navigate(&url)?;
            Ok(SignOutOutcome::Redirected(url))
        } else {
            Ok(SignOutOutcome::LogoutUrl(url))
        }
    }

    /// Access token valid beyond the refresh margin
    ///
    /// # Errors
    ///
    /// See [`TokenManager::current_access_token`].
    pub async fn get_access_token(&self) -> Result<String> {
        self.tokens.current_access_token(&self.config).await
    }

    /// Signed-in user summary
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSignedIn`] without a session.
    pub async fn get_user_info(&self) -> Result<UserInfo> {
        let session = self.store.session()?.ok_or(Error::NotSignedIn)?;
        self.user_info(&session)
    }

    /// Whether a session is stored
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn is_signed_in(&self) -> Result<bool> {
        Ok(self.store.session()?.is_some())
    }

    /// Execute a custom grant
    ///
    /// When the request uses the access token and a session exists, the token
    /// is refreshed first if it is inside the refresh margin.
    ///
    /// # Errors
    ///
    /// See [`CustomGrantExecutor::execute`] and
    /// [`TokenManager::current_access_token`].
    pub async fn custom_grant(&self, request: &CustomGrantRequest) -> Result<CustomGrantOutcome> {
        self.tokens
            .metadata()
            .ensure_initialized(&self.config, false)
            .await?;
        if request.uses_access_token() && self.is_signed_in()? {
            self.tokens.current_access_token(&self.config).await?;
        }
        self.grants.execute(&self.config, request).await
    }

    /// Switch the session to another account
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSignedIn`] without a session and grant errors
    /// otherwise.
    pub async fn switch_account(&self, request: AccountSwitchRequest) -> Result<UserInfo> {
        match self.custom_grant(&request.into_grant()).await? {
            CustomGrantOutcome::SignedIn(info) => Ok(info),
            _ => self.get_user_info().await,
        }
    }

    /// Revoke the access token, then clear all local session state
    ///
    /// # Errors
    ///
    /// Returns [`Error::RevocationFailed`] (with local state kept) when the
    /// provider rejects the revocation.
    pub async fn end_user_session(&self) -> Result<()> {
        self.tokens.revoke(&self.config).await?;
        self.store.clear_all()?;
        Ok(())
    }

    /// Stored provider endpoints
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn service_endpoints(&self) -> Result<Option<ProviderConfiguration>> {
        self.tokens.metadata().service_endpoints()
    }

    /// Store an authorization code delivered outside the callback URL
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn store_authorization_code(&self, code: &str, session_state: Option<&str>) -> Result<()> {
        self.store.set_authorization_code(code, session_state)?;
        Ok(())
    }

    fn check_allowed(&self, url: &Url) -> Result<()> {
        // Without configured base URLs only the identity server itself is reachable
        let allowed = if self.config.base_urls.is_empty() {
            is_under(url, &Url::parse(self.config.origin())?)
        } else {
            self.config
                .base_urls
                .iter()
                .filter_map(|b| Url::parse(b).ok())
                .any(|base| is_under(url, &base))
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::IllegalUrl(url.to_string()))
        }
    }

    async fn send_with_token(
        &self,
        mut request: reqwest::Request,
        token: &str,
    ) -> Result<reqwest::Response> {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            Error::InvalidSession("access token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(self.http.execute(request).await?)
    }

    /// Send `request` with the access token attached.
    ///
    /// The URL must lie under one of the configured base URLs, or under the
    /// server origin when none are configured. An HTTP 401 triggers one
    /// forced refresh and one retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalUrl`] for other URLs, token errors, and
    /// transport errors.
    pub async fn http_request(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.check_allowed(request.url())?;

        let token = self.get_access_token().await?;
        let retry = request.try_clone();
        let response = self.send_with_token(request, &token).await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(retry) = retry else {
            return Ok(response);
        };

        warn!(url = %retry.url(), "Request unauthorized, refreshing access token");
        let fresh = self.tokens.force_refresh(&self.config, &token).await?;
        self.send_with_token(retry, &fresh).await
    }

    /// Send several authenticated requests concurrently
    ///
    /// # Errors
    ///
    /// Fails with the first error of any request.
    pub async fn http_request_all(
        &self,
        requests: Vec<reqwest::Request>,
    ) -> Result<Vec<reqwest::Response>> {
        try_join_all(requests.into_iter().map(|r| self.http_request(r))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use crate::navigator::RecordingNavigator;
    use crate::storage::StorageKind;
    use pretty_assertions::assert_eq;

    fn config() -> AuthConfig {
        AuthConfig::new("abc123", "https://app.example/callback", "https://idp.example")
            .with_scope(["internal_login"])
    }

    fn pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_authorization_url_parameter_order() {
        let config = config()
            .with_response_mode(ResponseMode::FormPost)
            .with_prompt("login");
        let url =
            authorization_url("https://idp.example/oauth2/authorize", &config, Some("CH")).unwrap();

        let keys: Vec<String> = pairs(&url).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "response_type",
                "client_id",
                "scope",
                "redirect_uri",
                "response_mode",
                "code_challenge_method",
                "code_challenge",
                "prompt"
            ]
        );
        assert!(pairs(&url).contains(&("scope".into(), "openid internal_login".into())));
    }

    #[test]
    fn test_navigating_backend_requires_navigator() {
        assert!(matches!(
            AuthClient::builder(config()).build(),
            Err(Error::Config(_))
        ));
        assert!(
            AuthClient::builder(config().with_storage(StorageKind::WebWorker))
                .build()
                .is_ok()
        );
        assert!(
            AuthClient::builder(config())
                .navigator(Arc::new(RecordingNavigator::new()))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_base_url_restriction() {
        let client = AuthClient::builder(
            config()
                .with_storage(StorageKind::WebWorker)
                .with_base_urls(["https://api.example/v2/"]),
        )
        .build()
        .unwrap();

        let allowed = [
            "https://api.example/v2/roles",
            "https://api.example/v2/",
        ];
        for url in allowed {
            assert!(client.check_allowed(&Url::parse(url).unwrap()).is_ok(), "{url}");
        }

        let denied = [
            "https://api.example/v1/roles",
            "https://api.example/v2-internal/admin",
            "https://api.example/v2",
            "https://api.example.evil/v2/roles",
            // configured base URLs replace the server origin
            "https://idp.example/api/users",
        ];
        for url in denied {
            assert!(
                matches!(
                    client.check_allowed(&Url::parse(url).unwrap()),
                    Err(Error::IllegalUrl(_))
                ),
                "{url}"
            );
        }
    }

    #[test]
    fn test_base_url_without_trailing_slash_matches_whole_segments() {
        let client = AuthClient::builder(
            config()
                .with_storage(StorageKind::WebWorker)
                .with_base_urls(["https://api.example/v2"]),
        )
        .build()
        .unwrap();

        for url in ["https://api.example/v2", "https://api.example/v2/roles"] {
            assert!(client.check_allowed(&Url::parse(url).unwrap()).is_ok(), "{url}");
        }
        assert!(
            client
                .check_allowed(&Url::parse("https://api.example/v2-internal/admin").unwrap())
                .is_err()
        );
    }

    #[test]
    fn test_server_origin_allowed_without_base_urls() {
        let client = AuthClient::builder(config().with_storage(StorageKind::WebWorker))
            .build()
            .unwrap();

        assert!(
            client
                .check_allowed(&Url::parse("https://idp.example/api/users").unwrap())
                .is_ok()
        );
        assert!(
            client
                .check_allowed(&Url::parse("http://idp.example/api/users").unwrap())
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_sign_out_fails_fast_without_endpoint() {
        let client = AuthClient::builder(config().with_storage(StorageKind::WebWorker))
            .build()
            .unwrap();
        client.store.set_code_verifier("kept").unwrap();

        assert!(matches!(
            client.sign_out().await,
            Err(Error::MissingEndpoint("end_session_endpoint"))
        ));
        assert_eq!(client.store.take_code_verifier().unwrap().as_deref(), Some("kept"));
    }
}
