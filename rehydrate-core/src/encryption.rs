/*!
Symmetric encryption of serialized state.

AES-256-GCM keyed by the SHA-256 of a configured passphrase. Every call to
[`Cipher::encrypt`] draws a fresh 96-bit nonce and prefixes it to the
ciphertext, so each record carries its own nonce and nonces are never reused
across records.
*/

use crate::{HydrateError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the nonce stored in front of every ciphertext
pub const NONCE_LEN: usize = 12;

/// Keyed AES-256-GCM cipher
#[derive(Clone)]
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    /// Build a cipher from a passphrase
    ///
    /// An empty passphrase is a configuration error.
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(HydrateError::configuration("encryption key must not be empty"));
        }
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Ok(Self {
            inner: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|e| HydrateError::codec(format!("Failed to encrypt data: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a buffer produced by [`Cipher::encrypt`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(HydrateError::codec(format!(
                "Encrypted payload too short: {} bytes",
                data.len()
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| HydrateError::codec("Failed to decrypt data: authentication failed"))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("algorithm", &"aes-256-gcm").finish()
    }
}
