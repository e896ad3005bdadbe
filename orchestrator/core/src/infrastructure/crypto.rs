// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Symmetric AEAD encryption, chain hashing, identity fingerprinting and API
//! key generation (C3).
//!
//! The process-wide key is loaded once at init from `AEGIS_MASTER_KEY` (or
//! the config equivalent). There is no in-process key rotation; rotating the
//! master key requires re-encrypting the vault out of band.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Sha3_256};
use thiserror::Error;

pub const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("master key has the wrong length: expected {MASTER_KEY_LEN} bytes")]
    InvalidKeyLength,
    #[error("ciphertext is malformed or too short to contain a nonce")]
    MalformedCiphertext,
    #[error("AEAD authentication failed (MAC mismatch)")]
    AuthenticationFailed,
}

/// Process-wide symmetric key. Production mode refuses to start without one
/// (see `ProxyConfig::require_master_key`); this type just holds the bytes.
#[derive(Clone)]
pub struct MasterKey(Key<Aes256Gcm>);

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != MASTER_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength);
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(bytes)))
    }

    /// Generates a fresh random key. Used only by local dev bootstrapping /
    /// tests, never by the production code path.
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(*Key::<Aes256Gcm>::from_slice(&bytes))
    }
}

/// AEAD encryption under the process-wide master key. Ciphertext layout is
/// `nonce(12) || aes_gcm_ciphertext_with_tag`.
pub struct Cipher {
    key: MasterKey,
}

impl Cipher {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key.0);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key.0);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// `SHA3-256(previous_hex || ":" || payload_str)`, hex-encoded.
pub fn chain_hash(payload_str: &str, previous_hex: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(previous_hex.as_bytes());
    hasher.update(b":");
    hasher.update(payload_str.as_bytes());
    hex::encode(hasher.finalize())
}

/// The genesis `previous_hash` for entry 0: 64 `'0'` characters.
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

/// `SHA3-256(name || ":" || sponsor_id || ":" || random_128)`, hex-encoded.
/// Globally unique by construction (128 bits of randomness).
pub fn identity_fingerprint(name: &str, sponsor_id: &str) -> String {
    let mut random_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut random_bytes);
    let mut hasher = Sha3_256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(sponsor_id.as_bytes());
    hasher.update(b":");
    hasher.update(random_bytes);
    hex::encode(hasher.finalize())
}

/// A freshly generated API key: the raw value handed to the caller once, and
/// the SHA-256 hash of it that is actually persisted.
pub struct ApiKey {
    pub raw: String,
    pub hash: String,
}

/// `raw = "aegis_" + urlsafe_b64(32 bytes)`, `hash = SHA-256(raw)` hex.
pub fn api_key_generate() -> ApiKey {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let raw = format!(
        "aegis_{}",
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
    );
    let hash = hash_api_key(&raw);
    ApiKey { raw, hash }
}

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encrypt_decrypt() {
        let cipher = Cipher::new(MasterKey::generate());
        for s in ["", "hello world", "a very long secret api key value"] {
            let ciphertext = cipher.encrypt(s.as_bytes()).unwrap();
            let plaintext = cipher.decrypt(&ciphertext).unwrap();
            assert_eq!(plaintext, s.as_bytes());
        }
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let cipher = Cipher::new(MasterKey::generate());
        let mut ciphertext = cipher.encrypt(b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(cipher.decrypt(&ciphertext), Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn malformed_ciphertext_rejected() {
        let cipher = Cipher::new(MasterKey::generate());
        assert!(matches!(cipher.decrypt(&[1, 2, 3]), Err(CryptoError::MalformedCiphertext)));
    }

    #[test]
    fn chain_hash_is_deterministic_and_genesis_is_64_zeros() {
        assert_eq!(genesis_hash().len(), 64);
        assert!(genesis_hash().chars().all(|c| c == '0'));
        let h1 = chain_hash("payload", &genesis_hash());
        let h2 = chain_hash("payload", &genesis_hash());
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn fingerprints_are_unique_across_calls() {
        let a = identity_fingerprint("bot", "sponsor-1");
        let b = identity_fingerprint("bot", "sponsor-1");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn api_key_hash_matches_raw() {
        let key = api_key_generate();
        assert!(key.raw.starts_with("aegis_"));
        assert_eq!(hash_api_key(&key.raw), key.hash);
        assert_ne!(hash_api_key("wrong-key"), key.hash);
    }
}
