//! Credential vault: authenticated encryption of stored secrets.
//!
//! Secrets are sealed with AES-256-GCM under a 32-byte master key supplied
//! as 64 hex characters through process configuration. Every seal draws a
//! fresh random 16-byte IV, and the ciphertext, IV and authentication tag are
//! kept as separate fields so no framing has to be parsed back out.
//!
//! The master key is decoded on every call rather than cached, so rotating it
//! only needs a restart. Losing it makes every stored secret unrecoverable.

use crate::error::{GatewayError, Result};
use crate::token::fill_random;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use tracing::error;
use zeroize::Zeroizing;

/// AES-256-GCM with a 128-bit nonce.
type Cipher = AesGcm<Aes256, U16>;

/// Master key length in bytes.
pub const KEY_LEN: usize = 32;
/// IV length in bytes.
pub const IV_LEN: usize = 16;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// A sealed credential as it is persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    /// AES-256-GCM ciphertext
    pub ciphertext: Vec<u8>,
    /// Unique per seal
    pub iv: Vec<u8>,
    /// GCM authentication tag (tamper detection)
    pub auth_tag: Vec<u8>,
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &hex::encode(&self.iv))
            .finish_non_exhaustive()
    }
}

/// Seals and opens credentials under the configured master key.
#[derive(Clone)]
pub struct Vault {
    master_key: Option<Zeroizing<String>>,
}

impl Vault {
    /// Create a vault around a hex-encoded master key.
    ///
    /// A missing or malformed key is accepted here and reported on first use,
    /// so the gateway can still serve routes that never touch a secret.
    #[must_use]
    pub fn new(master_key_hex: Option<Zeroizing<String>>) -> Self {
        Self {
            master_key: master_key_hex,
        }
    }

    /// Whether a well-formed master key is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.key().is_ok()
    }

    fn key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let hex_key = self.master_key.as_ref().ok_or_else(|| {
            GatewayError::InternalConfig("master encryption key is not configured".to_string())
        })?;
        let bytes = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|_| {
            GatewayError::InternalConfig("master encryption key is not valid hex".to_string())
        })?);
        if bytes.len() != KEY_LEN {
            return Err(GatewayError::InternalConfig(format!(
                "master encryption key must be {} bytes (64 hex characters), got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn cipher(&self) -> Result<Cipher> {
        let key = self.key()?;
        Cipher::new_from_slice(&key)
            .map_err(|_| GatewayError::InternalConfig("invalid master key length".to_string()))
    }

    /// Seal a plaintext credential under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<SealedSecret> {
        let cipher = self.cipher().inspect_err(|e| error!("Vault unavailable: {}", e))?;

        let mut iv = [0u8; IV_LEN];
        fill_random(&mut iv)?;

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| GatewayError::CryptoFailure("encryption failed".to_string()))?;

        Ok(SealedSecret {
            ciphertext: buffer,
            iv: iv.to_vec(),
            auth_tag: tag.to_vec(),
        })
    }

    /// Open a sealed credential.
    ///
    /// Fails with [`GatewayError::CryptoFailure`] when the tag does not
    /// verify, when a field has the wrong shape, or when the master key is
    /// missing or malformed. No partial plaintext is ever returned.
    pub fn decrypt(&self, sealed: &SealedSecret) -> Result<Zeroizing<String>> {
        let cipher = self.cipher().map_err(|e| {
            error!("Vault unavailable: {}", e);
            GatewayError::CryptoFailure(e.to_string())
        })?;

        if sealed.iv.len() != IV_LEN {
            return Err(GatewayError::CryptoFailure(format!(
                "IV must be {} bytes, got {}",
                IV_LEN,
                sealed.iv.len()
            )));
        }
        if sealed.auth_tag.len() != TAG_LEN {
            return Err(GatewayError::CryptoFailure(format!(
                "auth tag must be {} bytes, got {}",
                TAG_LEN,
                sealed.auth_tag.len()
            )));
        }

        let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&sealed.iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&sealed.auth_tag),
            )
            .map_err(|_| {
                GatewayError::CryptoFailure("authentication tag mismatch".to_string())
            })?;

        let plaintext = std::str::from_utf8(&buffer)
            .map_err(|_| GatewayError::CryptoFailure("plaintext is not UTF-8".to_string()))?;
        Ok(Zeroizing::new(plaintext.to_string()))
    }
}

/// Generate a new hex-encoded master key.
pub fn generate_master_key() -> Result<Zeroizing<String>> {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    fill_random(&mut bytes[..])?;
    Ok(Zeroizing::new(hex::encode(&bytes[..])))
}
