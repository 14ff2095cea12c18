//! Common test utilities for integration tests
//!
//! Provides a wiremock identity provider, RSA signing keys, ID token minting
//! and helpers for building clients against the mock.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oidc_session::{
    AuthClient, AuthConfig, MemoryStorage, RecordingNavigator, SessionRecord, SessionStore,
    Storage, StorageKind,
};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const CLIENT_ID: &str = "abc123";
pub const CALLBACK_URL: &str = "https://app.example/callback";
pub const TEST_KID: &str = "test-signing-key";

/// RSA key pair shared by every test in a binary
pub struct TestKeys {
    pub private_pem: Vec<u8>,
    pub n: String,
    pub e: String,
}

pub fn test_keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let public_key = private_key.to_public_key();

        TestKeys {
            private_pem: private_key
                .to_pkcs8_pem(LineEnding::LF)
                .expect("Failed to encode private key")
                .as_bytes()
                .to_vec(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    })
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Sign `claims` with the test key under `kid`
pub fn sign_jwt(claims: serde_json::Value, kid: &str) -> String {
    sign_jwt_with(jsonwebtoken::Algorithm::RS256, claims, kid)
}

/// Sign `claims` with the test key using `alg`
pub fn sign_jwt_with(alg: jsonwebtoken::Algorithm, claims: serde_json::Value, kid: &str) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let key = EncodingKey::from_rsa_pem(&test_keys().private_pem).expect("Invalid RSA key");
    let mut header = Header::new(alg);
    header.kid = Some(kid.to_string());
    header.typ = Some("JWT".to_string());

    encode(&header, &claims, &key).expect("Failed to encode test JWT")
}

/// Public half of the test key, without an `alg` constraint
pub fn test_jwk() -> jsonwebtoken::jwk::Jwk {
    let keys = test_keys();
    serde_json::from_value(json!({
        "kty": "RSA",
        "kid": TEST_KID,
        "use": "sig",
        "n": keys.n,
        "e": keys.e,
    }))
    .expect("Invalid test JWK")
}

/// Wiremock identity provider serving discovery, JWKS and token endpoints
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn origin(&self) -> String {
        self.server.uri()
    }

    pub fn issuer(&self) -> String {
        format!("{}/oauth2/token", self.origin())
    }

    pub fn endpoint(&self, p: &str) -> String {
        format!("{}{}", self.origin(), p)
    }

    /// Discovery document without a revocation endpoint
    pub fn discovery_document(&self) -> serde_json::Value {
        json!({
            "issuer": self.issuer(),
            "authorization_endpoint": self.endpoint("/oauth2/authorize"),
            "token_endpoint": self.endpoint("/oauth2/token"),
            "end_session_endpoint": self.endpoint("/oidc/logout"),
            "jwks_uri": self.endpoint("/oauth2/jwks"),
            "check_session_iframe": self.endpoint("/oidc/checksession"),
        })
    }

    pub async fn mock_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.discovery_document()))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks(&self) {
        let keys = test_keys();
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{
                    "kty": "RSA",
                    "kid": TEST_KID,
                    "use": "sig",
                    "alg": "RS256",
                    "n": keys.n,
                    "e": keys.e,
                }]
            })))
            .mount(&self.server)
            .await;
    }

    /// Discovery plus JWKS, the usual starting point
    pub async fn mock_provider(&self) {
        self.mock_discovery().await;
        self.mock_jwks().await;
    }

    /// ID token for `sub` valid for an hour
    pub fn id_token(&self, sub: &str) -> String {
        self.id_token_with_kid(sub, TEST_KID)
    }

    pub fn id_token_with_kid(&self, sub: &str, kid: &str) -> String {
        let now = current_timestamp();
        sign_jwt(
            json!({
                "sub": sub,
                "iss": self.issuer(),
                "aud": [CLIENT_ID],
                "exp": now + 3600,
                "iat": now,
                "preferred_username": format!("{sub}-display"),
                "email": format!("{sub}@example.com"),
            }),
            kid,
        )
    }

    /// Token endpoint body
    pub fn token_body(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        sub: &str,
    ) -> serde_json::Value {
        let mut body = json!({
            "access_token": access_token,
            "id_token": self.id_token(sub),
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "openid internal_login",
        });
        if let Some(refresh) = refresh_token {
            body["refresh_token"] = json!(refresh);
        }
        body
    }

    /// Requests received at `p`
    pub async fn requests_to(&self, p: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == p)
            .collect()
    }
}

/// Decoded form body of a request
pub fn form(request: &Request) -> Vec<(String, String)> {
    url::form_urlencoded::parse(&request.body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

pub fn form_value(request: &Request, key: &str) -> Option<String> {
    form(request).into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

pub fn config(idp: &MockIdentityProvider) -> AuthConfig {
    AuthConfig::new(CLIENT_ID, CALLBACK_URL, idp.origin())
        .with_scope(["internal_login", "internal_humantask_view"])
}

/// Client with a recording navigator over an in-memory backend
pub struct Harness {
    pub client: AuthClient,
    pub navigator: Arc<RecordingNavigator>,
    pub backend: Arc<MemoryStorage>,
}

impl Harness {
    pub fn new(config: AuthConfig) -> Self {
        let navigator = Arc::new(RecordingNavigator::new());
        let backend = Arc::new(MemoryStorage::new());
        let client = AuthClient::builder(config)
            .storage(backend.clone())
            .navigator(navigator.clone())
            .build()
            .expect("client builds");
        Self {
            client,
            navigator,
            backend,
        }
    }

    pub fn worker(config: AuthConfig) -> Self {
        Self::new(config.with_storage(StorageKind::WebWorker))
    }

    /// Typed view of the same backend the client uses
    pub fn store(&self) -> SessionStore {
        let backend: Arc<dyn Storage> = self.backend.clone();
        SessionStore::for_client(backend, None, CLIENT_ID)
    }

    /// Store a session as if a sign-in had happened at `issued_at`
    pub fn seed_session(&self, idp: &MockIdentityProvider, issued_at: i64, expires_in: i64) {
        let record = SessionRecord {
            access_token: "AT1".to_string(),
            id_token: idp.id_token("alice"),
            refresh_token: Some("RT1".to_string()),
            token_type: "Bearer".to_string(),
            scope: "openid internal_login".to_string(),
            issued_at,
            expires_in,
            display_name: "alice-display".to_string(),
            email: Some("alice@example.com".to_string()),
            username: "alice".to_string(),
        };
        self.store().replace_session(&record).expect("seed session");
    }
}
