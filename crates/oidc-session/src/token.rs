//! Token lifecycle: code exchange, single-flight refresh and revocation
//!
//! One [`TokenManager`] owns one refresh gate (a semaphore with a single
//! permit). Callers that find the access token inside the refresh margin queue
//! on the gate; the first one through performs the refresh and the others pick
//! up its result from the session store instead of sending their own request.

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::post_form;
use crate::id_token::IdTokenVerifier;
use crate::metadata::{Endpoint, MetadataResolver};
use crate::session::{SessionRecord, TokenResponse, now_secs};
use crate::storage::{SessionStore, StoredRequestParams};

/// Query parameter carrying the authorization code
pub const CODE_PARAM: &str = "code";
/// Query parameter carrying the OP session state
pub const SESSION_STATE_PARAM: &str = "session_state";

fn query_param(location: Option<&Url>, name: &str) -> Option<String> {
    location?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Verify the ID token of a successful token response and replace the session.
///
/// Nothing is written unless verification succeeds.
pub(crate) async fn establish_session(
    verifier: &IdTokenVerifier,
    store: &SessionStore,
    config: &AuthConfig,
    body: &str,
) -> Result<SessionRecord> {
    let tokens: TokenResponse = serde_json::from_str(body)?;
    let id_token = tokens
        .id_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidIdToken("token response has no id_token".to_string()))?;

    let provider = store
        .provider_config()?
        .ok_or(Error::MissingEndpoint(Endpoint::Jwks.as_str()))?;
    let user = verifier.validate(&id_token, &provider, config).await?;

    let record = SessionRecord::from_token_response(tokens, id_token, user, now_secs());
    store.replace_session(&record)?;
    Ok(record)
}

/// Drives the token endpoint on behalf of one storage scope
#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    store: SessionStore,
    metadata: MetadataResolver,
    verifier: IdTokenVerifier,
    refresh_gate: Semaphore,
}

impl TokenManager {
    /// Create a manager over `store`
    pub fn new(http: reqwest::Client, store: SessionStore) -> Self {
        Self {
            metadata: MetadataResolver::new(http.clone(), store.clone()),
            verifier: IdTokenVerifier::new(http.clone()),
            http,
            store,
            refresh_gate: Semaphore::new(1),
        }
    }

    /// Metadata resolver sharing this manager's store
    pub fn metadata(&self) -> &MetadataResolver {
        &self.metadata
    }

    /// Session store of this manager
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Whether an authorization code is in `location` or relayed through storage
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn has_authorization_code(&self, location: Option<&Url>) -> Result<bool> {
        if query_param(location, CODE_PARAM).is_some() {
            return Ok(true);
        }
        Ok(self.store.has_authorization_code()?)
    }

    /// Exchange the authorization code for tokens and store the new session.
    ///
    /// The code and PKCE verifier are removed from storage before the request
    /// is sent, so they are used at most once whatever the outcome.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAuthorizationCode`] on HTTP 400 or when no code exists
    /// * [`Error::TokenExchangeFailed`] on any other non-200 status
    /// * [`Error::KeyNotFound`] / [`Error::InvalidIdToken`] when the ID token
    ///   does not verify; no session is written in that case
    pub async fn exchange_code(
        &self,
        config: &AuthConfig,
        location: Option<&Url>,
    ) -> Result<SessionRecord> {
        let stored_code = self.store.take_authorization_code()?;
        let code = query_param(location, CODE_PARAM)
            .or(stored_code)
            .ok_or_else(|| Error::InvalidAuthorizationCode {
                body: "no authorization code present".to_string(),
            })?;

        if let Some(state) = query_param(location, SESSION_STATE_PARAM) {
            self.store.set_session_state(&state)?;
        }

        let code_verifier = if config.enable_pkce {
            self.store.take_code_verifier()?
        } else {
            None
        };
        if config.enable_pkce && code_verifier.is_none() {
            warn!(client_id = %config.client_id, "PKCE enabled but no code verifier stored");
        }

        let token_endpoint = self.metadata.endpoint(Endpoint::Token)?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id.as_str()),
        ];
        if let Some(secret) = config.client_secret() {
            params.push(("client_secret", secret));
        }
        params.push(("code", code.as_str()));
        params.push(("redirect_uri", config.callback_url.as_str()));
        if let Some(verifier) = code_verifier.as_deref() {
            params.push(("code_verifier", verifier));
        }

        debug!(
            token_endpoint = %token_endpoint,
            pkce = code_verifier.is_some(),
            "Exchanging authorization code"
        );
        let response = post_form(&self.http, &token_endpoint, config, &params, None).await?;

        match response.status.as_u16() {
            200 => {}
            400 => {
                warn!(token_endpoint = %token_endpoint, "Authorization code rejected");
                return Err(Error::InvalidAuthorizationCode {
                    body: response.body,
                });
            }
            status => {
                return Err(Error::TokenExchangeFailed {
                    status,
                    body: response.body,
                });
            }
        }

        let record =
            establish_session(&self.verifier, &self.store, config, &response.body).await?;
        self.store.set_request_params(&StoredRequestParams {
            client_id: config.client_id.clone(),
            callback_url: config.callback_url.clone(),
            scope: config.scope.clone(),
            enable_pkce: config.enable_pkce,
            client_host: config.client_host.clone(),
        })?;

        info!(username = %record.username, expires_in = record.expires_in, "Signed in");
        Ok(record)
    }

    /// Access token that is valid beyond the refresh margin.
    ///
    /// Refreshes through the single-flight gate when the stored token is inside
    /// the margin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] and clears all session storage when
    /// there is no session, or the token needs refreshing and no refresh token
    /// is stored.
    pub async fn current_access_token(&self, config: &AuthConfig) -> Result<String> {
        let Some(session) = self.store.session()? else {
            self.store.clear_all()?;
            return Err(Error::InvalidSession("no session is stored".to_string()));
        };

        if !session.needs_refresh(now_secs()) {
            return Ok(session.access_token);
        }

        if session.refresh_token.is_none() {
            self.store.clear_all()?;
            return Err(Error::InvalidSession(
                "access token expired and no refresh token is available".to_string(),
            ));
        }

        self.refresh_gated(config, Some(session.access_token), false)
            .await
    }

    /// Refresh the session now and return the new access token
    ///
    /// # Errors
    ///
    /// See [`TokenManager::current_access_token`]; additionally
    /// [`Error::RefreshFailed`] when the token endpoint rejects the refresh.
    pub async fn refresh(&self, config: &AuthConfig) -> Result<String> {
        let observed = self.store.session()?.map(|s| s.access_token);
        self.refresh_gated(config, observed, true).await
    }

    /// Refresh after `stale_token` was rejected by a resource server.
    ///
    /// If another caller already replaced the token while this one waited, the
    /// replacement is returned without a second request.
    ///
    /// # Errors
    ///
    /// See [`TokenManager::refresh`].
    pub async fn force_refresh(&self, config: &AuthConfig, stale_token: &str) -> Result<String> {
        self.refresh_gated(config, Some(stale_token.to_string()), true)
            .await
    }

    async fn refresh_gated(
        &self,
        config: &AuthConfig,
        stale: Option<String>,
        force: bool,
    ) -> Result<String> {
        let _permit = self
            .refresh_gate
            .acquire()
            .await
            .map_err(|_| Error::RefreshFailed("refresh gate closed".to_string()))?;

        if let Some(current) = self.store.session()? {
            let replaced = stale
                .as_deref()
                .is_some_and(|stale| stale != current.access_token);
            if replaced || (!force && !current.needs_refresh(now_secs())) {
                debug!("Using access token refreshed by a concurrent caller");
                return Ok(current.access_token);
            }
        }

        self.refresh_locked(config).await
    }

    async fn refresh_locked(&self, config: &AuthConfig) -> Result<String> {
        let refresh_token = self
            .store
            .session()?
            .and_then(|s| s.refresh_token)
            .filter(|t| !t.is_empty());
        let Some(refresh_token) = refresh_token else {
            self.store.clear_all()?;
            return Err(Error::InvalidSession(
                "no refresh token is available".to_string(),
            ));
        };

        let token_endpoint = self.metadata.endpoint(Endpoint::Token)?;
        let params = [
            ("client_id", config.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        debug!(token_endpoint = %token_endpoint, "Refreshing access token");
        let response = post_form(&self.http, &token_endpoint, config, &params, None).await?;

        if response.status != reqwest::StatusCode::OK {
            self.store.clear_session()?;
            warn!(status = %response.status, "Refresh rejected, session cleared");
            return Err(Error::RefreshFailed(format!(
                "token endpoint returned HTTP {}: {}",
                response.status.as_u16(),
                response.body
            )));
        }

        let established =
            establish_session(&self.verifier, &self.store, config, &response.body).await;
        let record = match established {
            Ok(record) => record,
            Err(e) => {
                self.store.clear_session()?;
                return Err(e);
            }
        };

        info!(username = %record.username, expires_in = record.expires_in, "Access token refreshed");
        Ok(record.access_token)
    }

    /// Revoke the stored access token at the provider.
    ///
    /// Local session state is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSignedIn`] without a session and
    /// [`Error::RevocationFailed`] on a non-200 status.
    pub async fn revoke(&self, config: &AuthConfig) -> Result<()> {
        let session = self.store.session()?.ok_or(Error::NotSignedIn)?;
        let revoke_endpoint = self.metadata.endpoint(Endpoint::Revocation)?;

        let params = [
            ("client_id", config.client_id.as_str()),
            ("token", session.access_token.as_str()),
            ("token_type_hint", "access_token"),
        ];

        let response = post_form(&self.http, &revoke_endpoint, config, &params, None).await?;
        if response.status != reqwest::StatusCode::OK {
            return Err(Error::RevocationFailed {
                status: response.status.as_u16(),
                body: response.body,
            });
        }

        info!(revoke_endpoint = %revoke_endpoint, "Access token revoked");
        Ok(())
    }
}
