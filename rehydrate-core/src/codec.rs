/*!
Reversible payload transforms applied between serialization and storage.

Write order: text → [compress] → [encrypt] → base64. Read reverses it. A
payload that went through neither transform is stored as the plain text.
*/

use crate::compression::{CompressionAdapter, GzipCompressor};
use crate::encryption::Cipher;
use crate::{HydrateError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::{PoisonError, RwLock};

/// Encode bytes as text-safe base64
pub fn to_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 text, failing with a codec error on malformed input
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| HydrateError::codec(format!("Invalid base64 payload: {e}")))
}

/// Compression plus optional encryption
pub struct Codec {
    compressor: Box<dyn CompressionAdapter>,
    cipher: RwLock<Option<Cipher>>,
}

impl Codec {
    /// Gzip compression, no encryption key
    pub fn new() -> Self {
        Self::with_compressor(GzipCompressor::new())
    }

    pub fn with_compressor<C: CompressionAdapter + 'static>(compressor: C) -> Self {
        Self {
            compressor: Box::new(compressor),
            cipher: RwLock::new(None),
        }
    }

    /// Install or remove the encryption key
    pub fn set_encryption_key(&self, passphrase: Option<&str>) -> Result<()> {
        let cipher = passphrase.map(Cipher::from_passphrase).transpose()?;
        *self.cipher.write().unwrap_or_else(PoisonError::into_inner) = cipher;
        Ok(())
    }

    pub fn has_encryption_key(&self) -> bool {
        self.cipher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn compression_algorithm(&self) -> &str {
        self.compressor.algorithm_name()
    }

    /// Apply the requested transforms to `text`
    pub fn encode(&self, text: &str, compress: bool, encrypt: bool) -> Result<String> {
        if !compress && !encrypt {
            return Ok(text.to_string());
        }

        let mut bytes = text.as_bytes().to_vec();
        if compress {
            bytes = self.compressor.compress(&bytes)?;
        }
        if encrypt {
            bytes = self.with_cipher(|cipher| cipher.encrypt(&bytes))?;
        }
        Ok(to_base64(&bytes))
    }

    /// Reverse the transforms recorded as `compressed` / `encrypted`
    pub fn decode(&self, payload: &str, compressed: bool, encrypted: bool) -> Result<String> {
        if !compressed && !encrypted {
            return Ok(payload.to_string());
        }

        let mut bytes = from_base64(payload)?;
        if encrypted {
            bytes = self.with_cipher(|cipher| cipher.decrypt(&bytes))?;
        }
        if compressed {
            bytes = self.compressor.decompress(&bytes)?;
        }
        String::from_utf8(bytes)
            .map_err(|e| HydrateError::codec(format!("Decoded payload is not UTF-8: {e}")))
    }

    fn with_cipher<T>(&self, f: impl FnOnce(&Cipher) -> Result<T>) -> Result<T> {
        let guard = self.cipher.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(cipher) => f(cipher),
            None => Err(HydrateError::configuration(
                "encryption requested but no encryption key is configured",
            )),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = r#"{"items":["a","b","c"],"count":3}"#;

    #[test]
    fn test_plain_passthrough() {
        let codec = Codec::new();
        let encoded = codec.encode(TEXT, false, false).unwrap();
        assert_eq!(encoded, TEXT);
        assert_eq!(codec.decode(&encoded, false, false).unwrap(), TEXT);
    }

    #[test]
    fn test_compressed_roundtrip() {
        let codec = Codec::new();
        let encoded = codec.encode(TEXT, true, false).unwrap();
        assert_ne!(encoded, TEXT);
        assert_eq!(codec.decode(&encoded, true, false).unwrap(), TEXT);
    }

    #[test]
    fn test_compressed_and_encrypted_roundtrip() {
        let codec = Codec::new();
        codec.set_encryption_key(Some("s3cret")).unwrap();

        let encoded = codec.encode(TEXT, true, true).unwrap();
        assert_eq!(codec.decode(&encoded, true, true).unwrap(), TEXT);
    }

    #[test]
    fn test_encrypt_without_key_is_configuration_error() {
        let codec = Codec::new();
        assert!(!codec.has_encryption_key());

        let result = codec.encode(TEXT, false, true);
        assert!(matches!(result, Err(HydrateError::Configuration(_))));

        let result = codec.decode("AAAA", false, true);
        assert!(matches!(result, Err(HydrateError::Configuration(_))));
    }

    #[test]
    fn test_malformed_base64_is_codec_error() {
        let codec = Codec::new();
        let result = codec.decode("not base64 at all!", true, false);
        assert!(matches!(result, Err(HydrateError::Codec(_))));
    }

    #[test]
    fn test_removing_key() {
        let codec = Codec::new();
        codec.set_encryption_key(Some("k")).unwrap();
        assert!(codec.has_encryption_key());

        codec.set_encryption_key(None).unwrap();
        assert!(!codec.has_encryption_key());
    }
}
