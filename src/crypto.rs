//! Random tokens, token hashing and keyed MACs shared by sessions and the
//! OAuth state flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Bytes of entropy in session secrets and OAuth state values.
pub const TOKEN_BYTES: usize = 32;

/// Random URL-safe token with `TOKEN_BYTES` of entropy.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Hex SHA-256 of a token. Only this form is persisted.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares in time dependent only on length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// HMAC-SHA256 key, checked for length once at construction.
#[derive(Clone)]
pub struct SigningKey {
    mac: Hmac<Sha256>,
    len: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("signing key too short: got {actual} bytes, need at least {minimum}")]
pub struct KeyTooShort {
    pub actual: usize,
    pub minimum: usize,
}

impl SigningKey {
    pub const MIN_LEN: usize = 32;

    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self, KeyTooShort> {
        let bytes = bytes.as_ref();
        if bytes.len() < Self::MIN_LEN {
            return Err(KeyTooShort {
                actual: bytes.len(),
                minimum: Self::MIN_LEN,
            });
        }
        let mac = <Hmac<Sha256> as Mac>::new_from_slice(bytes).map_err(|_| KeyTooShort {
            actual: bytes.len(),
            minimum: Self::MIN_LEN,
        })?;
        Ok(Self {
            mac,
            len: bytes.len(),
        })
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.verify_slice(tag).is_ok()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
