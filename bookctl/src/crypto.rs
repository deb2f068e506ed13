use base64::{Engine as _, engine::general_purpose};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates an API token with 256 bits of entropy.
///
/// The token is formatted as `{prefix}{base64url_encoded_random_bytes}`, i.e. the configured
/// prefix followed by 43 unpadded base64url characters.
pub fn generate_api_token(prefix: &str) -> String {
    let mut key_bytes = [0u8; 32];
    rand::rng().fill(&mut key_bytes);

    format!("{prefix}{}", general_purpose::URL_SAFE_NO_PAD.encode(key_bytes))
}

/// The stored representation of an API token: lowercase hex SHA-256 of the raw value.
///
/// Every lookup hashes the presented token first; raw tokens never reach a store.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Random bytes encoded as unpadded base64url, for nonces.
pub fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
