//! ID token verification
//!
//! Tokens are checked against the provider's JWKS with a fixed algorithm
//! allow-list, the client ID as audience, the stored issuer, and the token's
//! own subject. A token that is well formed but does not verify yields
//! `Ok(false)`; a token that cannot be parsed at all is an error.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::metadata::{Endpoint, ProviderConfiguration, default_issuer};
use crate::session::AuthenticatedUser;

/// Signing algorithms accepted for ID tokens
pub const ALLOWED_ALGORITHMS: [&str; 4] = ["RS256", "RS512", "RS384", "PS256"];

/// Unverified JOSE header fields used for key selection
#[derive(Debug, Clone, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm
    pub alg: String,
    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,
}

/// Identity claims read from an ID token payload
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    /// Subject
    pub sub: String,
    /// Preferred username
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
}

fn segments(token: &str) -> Result<[&str; 3]> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [header, payload, signature] if !header.is_empty() && !payload.is_empty() => {
            Ok([*header, *payload, *signature])
        }
        _ => Err(Error::MalformedToken(format!(
            "expected 3 dot-separated segments, found {}",
            parts.len()
        ))),
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| Error::MalformedToken(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("{what} is not valid JSON: {e}")))
}

/// Parse an unverified header segment
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] on bad base64 or JSON.
pub fn parse_header(header_segment: &str) -> Result<TokenHeader> {
    decode_segment(header_segment, "header")
}

/// Decode the payload claims without verifying the signature
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] if the token cannot be parsed.
pub fn claims(id_token: &str) -> Result<IdTokenClaims> {
    let [_, payload, _] = segments(id_token)?;
    decode_segment(payload, "payload")
}

/// Identity of the token's subject
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] if the token cannot be parsed.
pub fn authenticated_user(id_token: &str) -> Result<AuthenticatedUser> {
    let claims = claims(id_token)?;
    Ok(AuthenticatedUser {
        display_name: claims
            .preferred_username
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| claims.sub.clone()),
        email: claims.email,
        username: claims.sub,
    })
}

/// Find the JWK whose `kid` matches the header
///
/// # Errors
///
/// Returns [`Error::KeyNotFound`] listing the available key IDs when none
/// matches, or [`Error::MalformedToken`] if the header cannot be parsed.
pub fn select_key<'a>(header_segment: &str, jwks: &'a JwkSet) -> Result<&'a Jwk> {
    let header = parse_header(header_segment)?;
    let expected = header.kid.unwrap_or_default();

    jwks.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(expected.as_str()))
        .ok_or_else(|| Error::KeyNotFound {
            expected,
            available: jwks
                .keys
                .iter()
                .filter_map(|k| k.common.key_id.clone())
                .collect(),
        })
}

fn algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        _ => None,
    }
}

/// Verify signature and claims of an ID token
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] when the token has missing segments, bad
/// base64 or bad JSON. Every other failure is `Ok(false)`.
pub fn verify(
    id_token: &str,
    jwk: &Jwk,
    client_id: &str,
    issuer: &str,
    expected_subject: &str,
) -> Result<bool> {
    let [header_segment, _, _] = segments(id_token)?;
    let header = parse_header(header_segment)?;

    let Some(alg) = algorithm(&header.alg) else {
        warn!(alg = %header.alg, "Rejecting ID token signed with a disallowed algorithm");
        return Ok(false);
    };

    let key = match DecodingKey::from_jwk(jwk) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "JWK cannot be used as a decoding key");
            return Ok(false);
        }
    };

    let mut validation = Validation::new(alg);
    validation.algorithms = vec![alg];
    validation.set_audience(&[client_id]);
    validation.set_issuer(&[issuer]);
    validation.sub = Some(expected_subject.to_string());
    validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

    match decode::<serde_json::Value>(id_token, &key, &validation) {
        Ok(_) => Ok(true),
        Err(e) => match e.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Err(Error::MalformedToken(e.to_string())),
            _ => {
                debug!(error = %e, "ID token did not verify");
                Ok(false)
            }
        },
    }
}

/// Fetches the provider JWKS and verifies ID tokens against it
#[derive(Debug, Clone)]
pub struct IdTokenVerifier {
    http: reqwest::Client,
}

impl IdTokenVerifier {
    /// Create a verifier using `http` for JWKS requests
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetch the key set from `jwks_uri`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status or a body
    /// that is not a JWK set.
    pub async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet> {
        debug!(jwks_uri = %jwks_uri, "Fetching JWKS");

        let response = self.http.get(jwks_uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %jwks_uri, status = %status, "JWKS endpoint returned error");
            return Err(Error::InvalidIdToken(format!(
                "JWKS endpoint returned HTTP {status}"
            )));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Verify `id_token` for `config` using the stored provider configuration.
    ///
    /// The expected subject is the token's own `sub`; the issuer falls back to
    /// `{origin}/oauth2/token` when none is stored.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingEndpoint`] when no JWKS endpoint is known
    /// * [`Error::KeyNotFound`] when the JWKS lacks the signing key
    /// * [`Error::InvalidIdToken`] when verification fails
    /// * [`Error::MalformedToken`] when the token cannot be parsed
    pub async fn validate(
        &self,
        id_token: &str,
        provider: &ProviderConfiguration,
        config: &AuthConfig,
    ) -> Result<AuthenticatedUser> {
        let [header_segment, _, _] = segments(id_token)?;
        let claims = claims(id_token)?;

        let jwks_uri = provider.require(Endpoint::Jwks)?;
        let jwks = self.fetch_jwks(jwks_uri).await?;
        let jwk = select_key(header_segment, &jwks)?;

        let issuer = if provider.issuer.is_empty() {
            default_issuer(config)
        } else {
            provider.issuer.clone()
        };

        if !verify(id_token, jwk, &config.client_id, &issuer, &claims.sub)? {
            return Err(Error::InvalidIdToken(format!(
                "signature or claims did not verify for issuer {issuer}"
            )));
        }

        debug!(subject = %claims.sub, "ID token verified");
        authenticated_user(id_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn jwks(kids: &[&str]) -> JwkSet {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({"kty": "RSA", "kid": kid, "n": "AQAB", "e": "AQAB"}))
            .collect();
        serde_json::from_value(json!({ "keys": keys })).unwrap()
    }

    #[test]
    fn test_select_key_by_kid() {
        let header = encode(json!({"alg": "RS256", "kid": "k2"}));
        let set = jwks(&["k1", "k2"]);
        let key = select_key(&header, &set).unwrap();
        assert_eq!(key.common.key_id.as_deref(), Some("k2"));
    }

    #[test]
    fn test_select_key_reports_available() {
        let header = encode(json!({"alg": "RS256", "kid": "rotated"}));
        let err = select_key(&header, &jwks(&["k1", "k2"])).unwrap_err();
        match err {
            Error::KeyNotFound {
                expected,
                available,
            } => {
                assert_eq!(expected, "rotated");
                assert_eq!(available, vec!["k1".to_string(), "k2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_none_algorithm_is_false() {
        let token = format!(
            "{}.{}.",
            encode(json!({"alg": "none", "kid": "k1"})),
            encode(json!({"sub": "alice"}))
        );
        let set = jwks(&["k1"]);
        assert!(!verify(&token, &set.keys[0], "abc123", "https://idp", "alice").unwrap());
    }

    #[test]
    fn test_malformed_tokens_are_errors() {
        let set = jwks(&["k1"]);
        let jwk = &set.keys[0];
        assert!(matches!(
            verify("only.two", jwk, "c", "i", "s"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            verify("!!!.e30.sig", jwk, "c", "i", "s"),
            Err(Error::MalformedToken(_))
        ));
        let not_json = format!("{}.e30.sig", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(
            verify(&not_json, jwk, "c", "i", "s"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_authenticated_user_falls_back_to_sub() {
        let token = format!(
            "{}.{}.sig",
            encode(json!({"alg": "RS256"})),
            encode(json!({"sub": "alice", "email": "alice@example.com"}))
        );
        let user = authenticated_user(&token).unwrap();
        assert_eq!(user.display_name, "alice");
        assert_eq!(user.username, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));

        let token = format!(
            "{}.{}.sig",
            encode(json!({"alg": "RS256"})),
            encode(json!({"sub": "u-1", "preferred_username": "Alice"}))
        );
        assert_eq!(authenticated_user(&token).unwrap().display_name, "Alice");
    }
}
