//! Encryption at rest for any token store.
//!
//! Values are encrypted with AES-256 in counter mode under a random 128-bit
//! nonce and authenticated with HMAC-SHA256 (encrypt-then-MAC). The stored
//! form is base64 of `version || nonce || ciphertext || tag`. Keys are left
//! in the clear so lookups by token still work.

use crate::errors::{CloakError, CloakResult, StoreError};
use crate::store::Store;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Key material for [`EncryptedStore`].
///
/// Separate cipher and MAC keys are derived from one 32-byte master key.
#[derive(Clone)]
pub struct EncryptionKey {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

impl EncryptionKey {
    /// Derive keys from raw master key bytes.
    pub fn from_bytes(master: &[u8; 32]) -> Self {
        Self {
            cipher_key: derive(master, b"cloak/aes-256-ctr"),
            mac_key: derive(master, b"cloak/hmac-sha256"),
        }
    }

    /// Parse a 64 character hex master key.
    pub fn from_hex(encoded: &str) -> CloakResult<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| CloakError::Encryption(format!("invalid key hex: {}", e)))?;
        let master: [u8; 32] = bytes.try_into().map_err(|_| {
            CloakError::Encryption("key must be 32 bytes (64 hex chars)".to_string())
        })?;
        Ok(Self::from_bytes(&master))
    }

    /// Read a hex master key from an environment variable.
    pub fn from_env(var: &str) -> CloakResult<Self> {
        let hex = std::env::var(var)
            .map_err(|_| CloakError::Encryption(format!("environment variable {} not set", var)))?;
        Self::from_hex(&hex)
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut master = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut master);
        Self::from_bytes(&master)
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("HMAC accepts any key length")
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

fn derive(master: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(master);
    hasher.finalize().into()
}

/// Store wrapper that encrypts values before handing them to `inner`.
pub struct EncryptedStore<S> {
    inner: S,
    key: EncryptionKey,
}

impl<S: Store> EncryptedStore<S> {
    pub fn new(inner: S, key: EncryptionKey) -> Self {
        Self { inner, key }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn seal(&self, plaintext: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut body = plaintext.as_bytes().to_vec();
        apply_keystream(&self.key.cipher_key, &nonce, &mut body);

        let mut mac = self.key.mac();
        mac.update(&[FORMAT_VERSION]);
        mac.update(&nonce);
        mac.update(&body);
        let tag = mac.finalize().into_bytes();

        let mut sealed = Vec::with_capacity(1 + NONCE_LEN + body.len() + TAG_LEN);
        sealed.push(FORMAT_VERSION);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&body);
        sealed.extend_from_slice(&tag);
        STANDARD.encode(sealed)
    }

    /// Decrypt a stored value. `None` if it is malformed or was tampered with.
    fn open(&self, stored: &str) -> Option<String> {
        let sealed = STANDARD.decode(stored).ok()?;
        if sealed.len() < 1 + NONCE_LEN + TAG_LEN || sealed[0] != FORMAT_VERSION {
            return None;
        }

        let (header, rest) = sealed.split_at(1 + NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);

        let mut mac = self.key.mac();
        mac.update(header);
        mac.update(body);
        mac.verify_slice(tag).ok()?;

        let nonce: [u8; NONCE_LEN] = header[1..].try_into().ok()?;
        let mut plain = body.to_vec();
        apply_keystream(&self.key.cipher_key, &nonce, &mut plain);
        String::from_utf8(plain).ok()
    }
}

/// XOR `data` with the AES-256-CTR keystream starting at `nonce`.
fn apply_keystream(key: &[u8; 32], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut counter = u128::from_be_bytes(*nonce);

    for chunk in data.chunks_mut(16) {
        let mut block = aes::Block::from(counter.to_be_bytes());
        cipher.encrypt_block(&mut block);
        for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= pad;
        }
        counter = counter.wrapping_add(1);
    }
}

#[async_trait]
impl<S: Store> Store for EncryptedStore<S> {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.put(key, &self.seal(value)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(stored) = self.inner.get(key).await? else {
            return Ok(None);
        };
        let opened = self.open(&stored);
        if opened.is_none() {
            tracing::warn!(token = %key, "Stored value failed authentication, treating as absent");
        }
        Ok(opened)
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[tokio::test]
    async fn test_roundtrip() {
        let store = EncryptedStore::new(MemoryStore::new(), EncryptionKey::from_hex(KEY_HEX).unwrap());
        store.put("{{EMAIL_a_1}}", "john@example.com").await.unwrap();

        assert_eq!(
            store.get("{{EMAIL_a_1}}").await.unwrap().as_deref(),
            Some("john@example.com")
        );
        assert!(store.has("{{EMAIL_a_1}}").await.unwrap());
        assert!(!store.has("{{EMAIL_a_2}}").await.unwrap());
    }

    #[tokio::test]
    async fn test_values_encrypted_at_rest() {
        let inner = MemoryStore::new();
        let store = EncryptedStore::new(inner.clone(), EncryptionKey::generate());
        store.put("k", "john@example.com").await.unwrap();
        store.put("k2", "john@example.com").await.unwrap();

        let raw = inner.get("k").await.unwrap().unwrap();
        let raw2 = inner.get("k2").await.unwrap().unwrap();
        assert!(!raw.contains("john"));
        // Fresh nonce per write
        assert_ne!(raw, raw2);
    }

    #[tokio::test]
    async fn test_wrong_key_reads_absent() {
        let inner = MemoryStore::new();
        let writer = EncryptedStore::new(inner.clone(), EncryptionKey::generate());
        writer.put("k", "secret").await.unwrap();

        let reader = EncryptedStore::new(inner, EncryptionKey::generate());
        assert_eq!(reader.get("k").await.unwrap(), None);
        assert!(!reader.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_value_reads_absent() {
        let inner = MemoryStore::new();
        let store = EncryptedStore::new(inner.clone(), EncryptionKey::generate());
        store.put("k", "secret value").await.unwrap();

        let raw = inner.get("k").await.unwrap().unwrap();
        let mut bytes = STANDARD.decode(&raw).unwrap();
        bytes[1 + NONCE_LEN] ^= 0x01;
        inner.put("k", &STANDARD.encode(bytes)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_long_and_unicode_values() {
        let store = EncryptedStore::new(MemoryStore::new(), EncryptionKey::generate());
        let value = "Zoë Müller-Ångström ".repeat(10);
        store.put("k", &value).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(value));
    }

    #[test]
    fn test_key_parsing() {
        assert!(EncryptionKey::from_hex(KEY_HEX).is_ok());
        assert!(matches!(
            EncryptionKey::from_hex("abcd"),
            Err(CloakError::Encryption(_))
        ));
        assert!(matches!(
            EncryptionKey::from_hex(&"zz".repeat(32)),
            Err(CloakError::Encryption(_))
        ));
        assert!(matches!(
            EncryptionKey::from_hex("abc"),
            Err(CloakError::Encryption(_))
        ));
        assert!(EncryptionKey::from_env("CLOAK_TEST_KEY_THAT_IS_NOT_SET").is_err());
    }

    #[tokio::test]
    async fn test_hex_key_case_and_whitespace() {
        let inner = MemoryStore::new();
        let writer = EncryptedStore::new(inner.clone(), EncryptionKey::from_hex(KEY_HEX).unwrap());
        writer.put("k", "secret").await.unwrap();

        let upper = format!(" {}\n", KEY_HEX.to_uppercase());
        let reader = EncryptedStore::new(inner, EncryptionKey::from_hex(&upper).unwrap());
        assert_eq!(reader.get("k").await.unwrap().as_deref(), Some("secret"));
    }
}
