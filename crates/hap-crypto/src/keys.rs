//! Secrets produced by pairing and the per-direction session keys.

use crate::chacha::ControlCipher;
use crate::hkdf::Derivation;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SRP session key or X25519 output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub Vec<u8>);

/// 32-byte encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Keys for an encrypted session, from the controller's point of view.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Controller to accessory.
    pub write_key: EncryptionKey,
    /// Accessory to controller.
    pub read_key: EncryptionKey,
}

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

impl SessionKeys {
    /// Derive session keys from the pair-verify ECDH secret.
    pub fn derive_control_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let write_key = Derivation::ControlWrite.derive(shared_secret.as_bytes())?;
        let read_key = Derivation::ControlRead.derive(shared_secret.as_bytes())?;

        Ok(Self {
            write_key: EncryptionKey(write_key),
            read_key: EncryptionKey(read_key),
        })
    }

    /// The same keys seen from the accessory, with directions swapped.
    pub fn reversed(&self) -> Self {
        Self {
            write_key: self.read_key.clone(),
            read_key: self.write_key.clone(),
        }
    }

    /// Build the frame cipher for this session.
    pub fn cipher(&self) -> ControlCipher {
        ControlCipher::new(self.write_key.0, self.read_key.0)
    }
}
