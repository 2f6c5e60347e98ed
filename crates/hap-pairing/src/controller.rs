//! Controller identity for consistent pairing identifiers.
//!
//! The `ControllerIdentity` struct holds both an Ed25519 keypair and a stable
//! identifier that must be used consistently across pair-setup M5,
//! pair-verify M3 and `/pairings` requests.

use hap_crypto::ed25519::IdentityKeyPair;
use uuid::Uuid;

/// Controller identity (iOSDevicePairingID + LTSK/LTPK).
///
/// If the identifier sent in pair-verify differs from the one registered
/// during pair-setup, the accessory rejects the session.
#[derive(Clone, Debug)]
pub struct ControllerIdentity {
    /// Upper-case UUID, e.g. "12345678-ABCD-1234-ABCD-123456789ABC"
    id: String,
    keypair: IdentityKeyPair,
}

impl ControllerIdentity {
    /// Generate a new identity from a random 32-byte seed and a random UUID.
    pub fn generate() -> Self {
        Self::with_id(
            IdentityKeyPair::generate(),
            Uuid::new_v4().hyphenated().to_string().to_uppercase(),
        )
    }

    /// Restore an identity from its stored identifier and seed.
    pub fn from_seed(id: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self::with_id(IdentityKeyPair::from_seed(seed), id)
    }

    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    /// Ed25519 public key (LTPK).
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }
}
