//! Namespaced, typed view over a storage backend

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Storage, StorageError};
use crate::metadata::ProviderConfiguration;
use crate::session::SessionRecord;

/// Key names used inside a storage scope
pub mod keys {
    /// Serialized [`crate::session::SessionRecord`]
    pub const SESSION: &str = "session";
    /// Serialized [`crate::metadata::ProviderConfiguration`]
    pub const OP_CONFIG: &str = "op_config";
    /// PKCE code verifier of the pending authorization round-trip
    pub const PKCE_CODE_VERIFIER: &str = "pkce_code_verifier";
    /// Authorization code relayed through storage (form_post response mode)
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    /// `session_state` returned with the authorization code
    pub const SESSION_STATE: &str = "session_state";
    /// Serialized [`super::StoredRequestParams`]
    pub const REQUEST_PARAMS: &str = "request_params";

    /// Every key the engine writes
    pub const ALL: [&str; 6] = [
        SESSION,
        OP_CONFIG,
        PKCE_CODE_VERIFIER,
        AUTHORIZATION_CODE,
        SESSION_STATE,
        REQUEST_PARAMS,
    ];
}

/// Non-secret request parameters persisted next to the session for refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRequestParams {
    /// OAuth client ID
    pub client_id: String,
    /// Redirect URI used for the exchange
    pub callback_url: String,
    /// Requested scopes
    pub scope: Vec<String>,
    /// Whether PKCE was used
    pub enable_pkce: bool,
    /// Client host sent as `Access-Control-Allow-Origin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_host: Option<String>,
}

/// Storage scope: a backend plus a key namespace.
///
/// Records are always read and written as one serialized value, so replacing
/// a session or provider configuration is a single `set`.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn Storage>,
    namespace: String,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a scope with an explicit namespace
    pub fn new(backend: Arc<dyn Storage>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Create the scope for one (tenant, client) pair
    pub fn for_client(backend: Arc<dyn Storage>, tenant: Option<&str>, client_id: &str) -> Self {
        let tenant = tenant.filter(|t| !t.is_empty()).unwrap_or("default");
        Self::new(backend, format!("oidc:{tenant}:{client_id}"))
    }

    /// Namespace prefix of this scope
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(&self.key(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.backend.set(&self.key(name), value)
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.key(name))
    }

    fn take(&self, name: &str) -> Result<Option<String>, StorageError> {
        let value = self.get(name)?;
        if value.is_some() {
            self.remove(name)?;
        }
        Ok(value)
    }

    fn read_record<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.get(name)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(key = name, error = %e, "Discarding unreadable stored record");
                self.remove(name)?;
                Ok(None)
            }
        }
    }

    fn write_record<T: Serialize>(&self, name: &str, record: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(record)?;
        self.set(name, &raw)
    }

    /// Stored session, if a complete one exists.
    ///
    /// An unreadable or partial record resets the whole session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn session(&self) -> Result<Option<SessionRecord>, StorageError> {
        match self.read_record::<SessionRecord>(keys::SESSION)? {
            Some(record) if record.is_complete() => Ok(Some(record)),
            Some(_) => {
                warn!(scope = %self.namespace, "Partial session record found, resetting session");
                self.clear_session()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Replace the session record as a unit
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn replace_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.write_record(keys::SESSION, record)
    }

    /// Delete the session record and its session state
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.remove(keys::SESSION)?;
        self.remove(keys::SESSION_STATE)
    }

    /// Stored provider configuration, if any
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn provider_config(&self) -> Result<Option<ProviderConfiguration>, StorageError> {
        self.read_record(keys::OP_CONFIG)
    }

    /// Replace the provider configuration as a unit
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn replace_provider_config(
        &self,
        config: &ProviderConfiguration,
    ) -> Result<(), StorageError> {
        self.write_record(keys::OP_CONFIG, config)
    }

    /// Delete the provider configuration
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn clear_provider_config(&self) -> Result<(), StorageError> {
        self.remove(keys::OP_CONFIG)
    }

    /// Remember the PKCE verifier of the pending authorization round-trip
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn set_code_verifier(&self, verifier: &str) -> Result<(), StorageError> {
        self.set(keys::PKCE_CODE_VERIFIER, verifier)
    }

    /// Read and delete the PKCE verifier
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn take_code_verifier(&self) -> Result<Option<String>, StorageError> {
        self.take(keys::PKCE_CODE_VERIFIER)
    }

    /// Store an authorization code relayed outside the callback URL
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn set_authorization_code(
        &self,
        code: &str,
        session_state: Option<&str>,
    ) -> Result<(), StorageError> {
        self.set(keys::AUTHORIZATION_CODE, code)?;
        if let Some(state) = session_state {
            self.set_session_state(state)?;
        }
        Ok(())
    }

    /// Whether a relayed authorization code is waiting
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn has_authorization_code(&self) -> Result<bool, StorageError> {
        Ok(self
            .get(keys::AUTHORIZATION_CODE)?
            .is_some_and(|c| !c.is_empty()))
    }

    /// Read and delete the relayed authorization code
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn take_authorization_code(&self) -> Result<Option<String>, StorageError> {
        self.take(keys::AUTHORIZATION_CODE)
    }

    /// Stored `session_state`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn session_state(&self) -> Result<Option<String>, StorageError> {
        self.get(keys::SESSION_STATE)
    }

    /// Store the `session_state` returned with the authorization code
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn set_session_state(&self, state: &str) -> Result<(), StorageError> {
        self.set(keys::SESSION_STATE, state)
    }

    /// Request parameters persisted by the last successful exchange
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn request_params(&self) -> Result<Option<StoredRequestParams>, StorageError> {
        self.read_record(keys::REQUEST_PARAMS)
    }

    /// Persist request parameters for later refresh use
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn set_request_params(&self, params: &StoredRequestParams) -> Result<(), StorageError> {
        self.write_record(keys::REQUEST_PARAMS, params)
    }

    /// Delete every key of this scope
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        for name in keys::ALL {
            self.remove(name)?;
        }
        debug!(scope = %self.namespace, "Cleared all session storage");
        Ok(())
    }
}
