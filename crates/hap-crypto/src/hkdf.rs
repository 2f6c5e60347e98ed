//! HKDF-SHA512 key schedule of HAP pairing and sessions.

use hap_core::error::CryptoError;
use hkdf::Hkdf;
use sha2::Sha512;

/// Every 32-byte key HAP derives, by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Pair-setup M5/M6 sub-TLV key, from the SRP session key.
    PairSetupEncrypt,
    /// `iOSDeviceX`, signed into M5.
    ControllerSign,
    /// `AccessoryX`, signed into M6.
    AccessorySign,
    /// Pair-verify M2/M3 sub-TLV key, from the X25519 secret.
    PairVerifyEncrypt,
    /// Session key for controller-to-accessory frames.
    ControlWrite,
    /// Session key for accessory-to-controller frames.
    ControlRead,
}

impl Derivation {
    fn salt_and_info(self) -> (&'static [u8], &'static [u8]) {
        match self {
            Self::PairSetupEncrypt => (b"Pair-Setup-Encrypt-Salt", b"Pair-Setup-Encrypt-Info"),
            Self::ControllerSign => (
                b"Pair-Setup-Controller-Sign-Salt",
                b"Pair-Setup-Controller-Sign-Info",
            ),
            Self::AccessorySign => (
                b"Pair-Setup-Accessory-Sign-Salt",
                b"Pair-Setup-Accessory-Sign-Info",
            ),
            Self::PairVerifyEncrypt => (b"Pair-Verify-Encrypt-Salt", b"Pair-Verify-Encrypt-Info"),
            Self::ControlWrite => (b"Control-Salt", b"Control-Write-Encryption-Key"),
            Self::ControlRead => (b"Control-Salt", b"Control-Read-Encryption-Key"),
        }
    }

    pub fn derive(self, secret: &[u8]) -> Result<[u8; 32], CryptoError> {
        let (salt, info) = self.salt_and_info();
        let mut okm = [0u8; 32];
        Hkdf::<Sha512>::new(Some(salt), secret)
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivation(format!("HKDF expand for {self:?}")))?;
        Ok(okm)
    }
}
