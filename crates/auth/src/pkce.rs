//! PKCE (RFC 7636) verifier, state, and S256 challenge generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::PkceChallenge;

/// 62-symbol alphabet shared by the verifier and the state token.
const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Verifier length in characters (RFC 7636 allows 43-128).
pub const VERIFIER_LENGTH: usize = 64;
/// State token length in characters.
pub const STATE_LENGTH: usize = 16;

/// Random alphanumeric string of exactly `length` characters.
///
/// Draws from the thread-local CSPRNG; `state` defends against CSRF and the
/// verifier against authorization-code interception, so a non-secure source
/// is not acceptable here.
pub fn random_string(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// S256 code challenge: unpadded base64url of SHA-256 over the verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

impl PkceChallenge {
    /// Fresh verifier/state pair with the derived challenge.
    pub fn generate() -> Self {
        let verifier = random_string(VERIFIER_LENGTH);
        let state = random_string(STATE_LENGTH);
        let challenge = code_challenge(&verifier);
        Self {
            verifier,
            state,
            challenge,
        }
    }
}
