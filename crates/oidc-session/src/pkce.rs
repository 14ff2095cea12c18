//! PKCE (RFC 7636) verifier and S256 challenge

use oauth2::{PkceCodeChallenge, PkceCodeVerifier};

/// Challenge method sent with every authorization request
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Fresh code verifier: 32 CSPRNG bytes, base64url without padding
pub fn code_verifier() -> String {
    let (_, verifier) = PkceCodeChallenge::new_random_sha256();
    verifier.secret().clone()
}

/// `base64url(SHA-256(verifier))`
pub fn code_challenge(verifier: &str) -> String {
    let verifier = PkceCodeVerifier::new(verifier.to_string());
    PkceCodeChallenge::from_code_verifier_sha256(&verifier)
        .as_str()
        .to_string()
}
