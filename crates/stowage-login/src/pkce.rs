use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A PKCE S256 code-verifier/challenge pair.
///
/// The verifier goes to the token endpoint with the authorization code; the
/// challenge goes on the authorization URL. RFC 7636 requires 43-128
/// verifier characters; 32 random bytes base64url-encode to 43.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The secret the client keeps until token exchange.
    pub verifier: String,
    /// `base64url(sha256(verifier))`, sent on the authorization URL.
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair from OS entropy.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

/// Generate a CSRF `state` value for the authorization request.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
