//! Authenticated encryption for slice payloads with key-version rotation.
//!
//! Every encrypted blob starts with a self-describing header so decryption
//! never depends on ambient configuration matching the writer:
//!
//! ```text
//! [0..2]   magic "SW"
//! [2]      key version
//! [3]      flags (bit 0: payload was deflated before encryption)
//! [4..16]  nonce (12 bytes, random per encode)
//! [16..]   ChaCha20-Poly1305 ciphertext
//! ```
//!
//! A keyring holds one key per version; old versions stay registered after a
//! rotation so existing slices remain readable while new writes use the
//! primary version.

use std::collections::HashMap;
use std::fmt;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::config::CryptoConfig;
use crate::error::{Result, SliceworksError};

const MAGIC: &[u8; 2] = b"SW";
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 2 + 1 + 1 + NONCE_LEN;
const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Versioned cipher keys; `primary` selects the key used for new writes.
#[derive(Clone)]
pub struct CipherKeyring {
    primary: u8,
    keys: HashMap<u8, [u8; 32]>,
}

impl CipherKeyring {
    pub fn new(primary: u8, keys: HashMap<u8, [u8; 32]>) -> Result<Self> {
        if !keys.contains_key(&primary) {
            return Err(SliceworksError::Validation(format!(
                "no cipher key registered for primary version {primary}"
            )));
        }
        Ok(Self { primary, keys })
    }

    pub fn from_config(crypto: &CryptoConfig) -> Result<Self> {
        if crypto.keys.is_empty() {
            return Err(SliceworksError::Validation(
                "encrypted serializer requires at least one configured cipher key".into(),
            ));
        }
        let mut keys = HashMap::new();
        for (version, hex_key) in &crypto.keys {
            let version: u8 = version.parse().map_err(|_| {
                SliceworksError::Validation(format!("invalid cipher key version '{version}'"))
            })?;
            let raw = hex::decode(hex_key).map_err(|e| {
                SliceworksError::Validation(format!("cipher key v{version} is not hex: {e}"))
            })?;
            let key: [u8; 32] = raw.try_into().map_err(|_| {
                SliceworksError::Validation(format!("cipher key v{version} must be 32 bytes"))
            })?;
            keys.insert(version, key);
        }
        Self::new(crypto.primary_version, keys)
    }

    /// Encrypt with the primary key under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], compressed: bool) -> Result<Vec<u8>> {
        // new() guarantees the primary key exists.
        let key = self
            .keys
            .get(&self.primary)
            .ok_or_else(|| SliceworksError::Codec("primary cipher key missing".into()))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SliceworksError::Codec(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.push(self.primary);
        out.push(if compressed { FLAG_COMPRESSED } else { 0 });
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt using the key version named in the blob's own header.
    /// Returns the plaintext and whether it was deflated before encryption.
    pub fn decrypt(&self, blob: &[u8]) -> Result<(Vec<u8>, bool)> {
        if blob.len() < HEADER_LEN || &blob[0..2] != MAGIC {
            return Err(SliceworksError::Codec(
                "encrypted payload header missing or corrupt".into(),
            ));
        }
        let version = blob[2];
        let compressed = blob[3] & FLAG_COMPRESSED != 0;
        let nonce = Nonce::from_slice(&blob[4..4 + NONCE_LEN]);

        let key = self.keys.get(&version).ok_or_else(|| {
            SliceworksError::Codec(format!("no cipher key registered for version {version}"))
        })?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let plaintext = cipher
            .decrypt(nonce, &blob[HEADER_LEN..])
            .map_err(|e| SliceworksError::Codec(format!("decrypt failed: {e}")))?;
        Ok((plaintext, compressed))
    }
}

impl fmt::Debug for CipherKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        let mut versions: Vec<u8> = self.keys.keys().copied().collect();
        versions.sort_unstable();
        f.debug_struct("CipherKeyring")
            .field("primary", &self.primary)
            .field("versions", &versions)
            .finish()
    }
}
