//! Client configuration
//!
//! [`AuthConfig`] is the caller-supplied request configuration. It can be built
//! in code:
//!
//! ```rust
//! use oidc_session::{AuthConfig, StorageKind};
//!
//! let config = AuthConfig::new("abc123", "https://app.example/callback", "https://idp.example")
//!     .with_scope(["internal_login", "internal_humantask_view"])
//!     .with_storage(StorageKind::WebWorker);
//! assert_eq!(config.requested_scope(), "openid internal_login internal_humantask_view");
//! ```
//!
//! or loaded from a TOML, YAML or JSON file with `OIDC_SESSION_*` environment
//! overrides via [`AuthConfig::from_file`].

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::storage::StorageKind;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "OIDC_SESSION";

/// Scope that is always part of the authorization request
pub const OPENID_SCOPE: &str = "openid";

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// How the authorization server returns the authorization code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Code in the callback URL query string
    Query,
    /// Code POSTed to the callback and relayed through storage
    FormPost,
}

impl ResponseMode {
    /// Value of the `response_mode` authorize parameter
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::FormPost => "form_post",
        }
    }
}

/// Request configuration for one client
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// OAuth client ID
    pub client_id: String,
    /// Optional confidential client secret
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Redirect URI registered for the client
    pub callback_url: String,
    /// Post-logout redirect URI; defaults to `callback_url`
    #[serde(default)]
    pub sign_out_redirect_url: Option<String>,
    /// Origin sent as `Access-Control-Allow-Origin` on token requests
    #[serde(default)]
    pub client_host: Option<String>,
    /// Requested scopes; `openid` is added when missing
    #[serde(default)]
    pub scope: Vec<String>,
    /// Use PKCE (S256) for the code exchange
    #[serde(default = "default_true")]
    pub enable_pkce: bool,
    /// `response_mode` authorize parameter
    #[serde(default)]
    pub response_mode: Option<ResponseMode>,
    /// `prompt` authorize parameter
    #[serde(default)]
    pub prompt: Option<String>,
    /// Identity server origin, e.g. `https://idp.example`
    pub server_origin: String,
    /// Storage backend selector
    #[serde(default)]
    pub storage: StorageKind,
    /// Backing file for [`StorageKind::LocalStorage`]
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// URL prefixes authenticated requests may target
    #[serde(default)]
    pub base_urls: Vec<String>,
    /// Tenant domain, part of the storage namespace
    #[serde(default)]
    pub tenant: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AuthConfig {
    /// Create a configuration with defaults for every optional field
    pub fn new(
        client_id: impl Into<String>,
        callback_url: impl Into<String>,
        server_origin: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            callback_url: callback_url.into(),
            sign_out_redirect_url: None,
            client_host: None,
            scope: Vec::new(),
            enable_pkce: true,
            response_mode: None,
            prompt: None,
            server_origin: server_origin.into(),
            storage: StorageKind::default(),
            storage_path: None,
            base_urls: Vec::new(),
            tenant: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }

    /// Set the client secret
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Set the requested scopes
    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable PKCE
    #[must_use]
    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.enable_pkce = enabled;
        self
    }

    /// Set the response mode
    #[must_use]
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = Some(mode);
        self
    }

    /// Set the `prompt` parameter
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Select the storage backend
    #[must_use]
    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Set the durable storage file
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Set the base URLs authenticated requests may target
    #[must_use]
    pub fn with_base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tenant domain
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the client host
    #[must_use]
    pub fn with_client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = Some(host.into());
        self
    }

    /// Set the post-logout redirect URI
    #[must_use]
    pub fn with_sign_out_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.sign_out_redirect_url = Some(url.into());
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Server origin without a trailing slash
    pub fn origin(&self) -> &str {
        self.server_origin.trim_end_matches('/')
    }

    /// Exposed client secret, if configured
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
    }

    /// Post-logout redirect URI
    pub fn sign_out_redirect(&self) -> &str {
        self.sign_out_redirect_url
            .as_deref()
            .unwrap_or(&self.callback_url)
    }

    /// Space-delimited scope string with `openid` first when it was missing
    pub fn requested_scope(&self) -> String {
        let mut scopes: Vec<&str> = self.scope.iter().map(String::as_str).collect();
        if !scopes.contains(&OPENID_SCOPE) {
            scopes.insert(0, OPENID_SCOPE);
        }
        scopes.join(" ")
    }

    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the configuration for values no flow can work with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        if self.callback_url.trim().is_empty() {
            return Err(Error::Config("callback_url must not be empty".to_string()));
        }
        if self.server_origin.trim().is_empty() {
            return Err(Error::Config("server_origin must not be empty".to_string()));
        }

        Url::parse(&self.server_origin)
            .map_err(|e| Error::Config(format!("server_origin is not a valid URL: {e}")))?;
        Url::parse(&self.callback_url)
            .map_err(|e| Error::Config(format!("callback_url is not a valid URL: {e}")))?;
        if let Some(url) = &self.sign_out_redirect_url {
            Url::parse(url).map_err(|e| {
                Error::Config(format!("sign_out_redirect_url is not a valid URL: {e}"))
            })?;
        }
        for base in &self.base_urls {
            Url::parse(base)
                .map_err(|e| Error::Config(format!("base URL `{base}` is not valid: {e}")))?;
        }

        if self.storage == StorageKind::LocalStorage && self.storage_path.is_none() {
            return Err(Error::Config(
                "LocalStorage requires storage_path to be set".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a file, with `OIDC_SESSION_*` environment overrides
    ///
    /// The format is chosen by extension: `.toml`, `.yaml`/`.yml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unsupported extension,
    /// or does not describe a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// See [`AuthConfig::from_file`].
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self> {
        use config::{File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(Error::Config(format!(
                    "unsupported configuration format: {}",
                    path.display()
                )));
            }
        };
        let name = path
            .to_str()
            .ok_or_else(|| Error::Config("configuration path is not valid UTF-8".to_string()))?;

        Self::load(File::new(name, format), environment(env_prefix))
    }

    fn load<S>(file: S, env: config::Environment) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// `{PREFIX}_CLIENT_ID` style overrides; nested keys use `__`
fn environment(prefix: &str) -> config::Environment {
    config::Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
