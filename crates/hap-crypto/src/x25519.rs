//! Ephemeral X25519 agreement used by pair-verify.

use crate::keys::SharedSecret;
use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// One-shot X25519 key. Consumed by [`EphemeralKey::agree`].
pub struct EphemeralKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKey {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild a key from its scalar bytes. Test vectors use this.
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(secret))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half as sent in the `PublicKey` TLV item.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Agree on a secret with the peer's public key.
    ///
    /// Fails when the peer key is a small-order point, which would yield a
    /// secret independent of our scalar.
    pub fn agree(self, peer: &[u8; 32]) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyDerivation(
                "peer X25519 key is a small-order point".to_string(),
            ));
        }
        Ok(SharedSecret::new(shared.as_bytes().to_vec()))
    }
}
