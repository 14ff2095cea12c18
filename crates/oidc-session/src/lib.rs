//! # oidc-session - OIDC Authorization Code + PKCE Session Engine
//!
//! Client-side session engine for an OpenID Connect identity provider: the
//! authorization code flow with PKCE, token acquisition, single-flight refresh,
//! ID token verification and pluggable session storage.
//!
//! ## Architecture
//!
//! - [`storage`] - key/value backends and the namespaced [`SessionStore`]
//! - [`metadata`] - discovery with default-endpoint fallback
//! - [`pkce`] and [`id_token`] - S256 challenges and JWKS-based verification
//! - [`token`] - code exchange, refresh gate and revocation
//! - [`grant`] - custom grants with placeholder substitution
//! - [`client`] - the [`AuthClient`] facade
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oidc_session::{AuthClient, AuthConfig, SignInOutcome, StorageKind};
//!
//! # tokio_test::block_on(async {
//! let config = AuthConfig::new("abc123", "https://app.example/callback", "https://idp.example")
//!     .with_scope(["internal_login"])
//!     .with_storage(StorageKind::WebWorker);
//! let client = AuthClient::builder(config).build()?;
//!
//! match client.sign_in(None).await? {
//!     SignInOutcome::AuthorizationRequired { url, .. } => println!("Open {url}"),
//!     SignInOutcome::SignedIn(user) => println!("Hello {}", user.display_name),
//!     SignInOutcome::Redirected(_) => {}
//! }
//! # Ok::<(), oidc_session::Error>(())
//! # });
//! ```
//!
//! ## Standards
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 7009** - Token Revocation
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **OpenID Connect Core 1.0** and **Discovery 1.0**

pub mod client;
pub mod config;
pub mod error;
pub mod grant;
pub mod http;
pub mod id_token;
pub mod metadata;
pub mod navigator;
pub mod pkce;
pub mod session;
pub mod storage;
pub mod token;

#[doc(inline)]
pub use client::{AuthClient, AuthClientBuilder, SignInOutcome, SignOutOutcome};
#[doc(inline)]
pub use config::{AuthConfig, ResponseMode};
#[doc(inline)]
pub use error::{DiscoveryUnavailable, Error, Result};
#[doc(inline)]
pub use grant::{AccountSwitchRequest, CustomGrantOutcome, CustomGrantRequest, GrantResponse};
#[doc(inline)]
pub use metadata::{Endpoint, InitOutcome, MetadataResolver, ProviderConfiguration};
#[doc(inline)]
pub use navigator::{Navigator, RecordingNavigator};
#[doc(inline)]
pub use session::{AuthenticatedUser, SessionRecord, UserInfo};
#[doc(inline)]
pub use storage::{FileStorage, MemoryStorage, SessionStore, Storage, StorageError, StorageKind};
#[doc(inline)]
pub use token::TokenManager;
