//! HomeKit pair-verify protocol (M1-M4).
//!
//! Ephemeral X25519 agreement authenticated by both long-term Ed25519 keys.
//! The resulting secret keys the encrypted control session.

use hap_core::error::{CryptoError, Error, PairingError, Result};
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519,
    hkdf::Derivation,
    keys::{SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvType},
    x25519::EphemeralKey,
};
use tracing::debug;

use crate::controller::ControllerIdentity;
use crate::material::PairingMaterial;
use crate::response::{expect_state, Exchange};

const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// Pair-verify state machine.
pub struct PairVerify {
    state: PairVerifyState,
    controller: ControllerIdentity,
    accessory_pairing_id: String,
    accessory_ltpk: [u8; 32],
    ecdh: Option<EphemeralKey>,
    controller_public: [u8; 32],
    accessory_public: Option<[u8; 32]>,
    shared_secret: Option<SharedSecret>,
    session_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerifyState {
    Initial,
    M1Sent,
    M2Received,
    M3Sent,
    Complete,
    Failed,
}

impl PairVerify {
    pub fn new(material: &PairingMaterial) -> Self {
        Self::with_controller(material, material.controller())
    }

    /// Verify as a different controller registered on the same accessory.
    pub fn with_controller(material: &PairingMaterial, controller: ControllerIdentity) -> Self {
        Self {
            state: PairVerifyState::Initial,
            controller,
            accessory_pairing_id: material.accessory_pairing_id().to_string(),
            accessory_ltpk: *material.accessory_ltpk(),
            ecdh: None,
            controller_public: [0u8; 32],
            accessory_public: None,
            shared_secret: None,
            session_key: None,
        }
    }

    pub fn state(&self) -> PairVerifyState {
        self.state
    }

    /// M1: {State=1, PublicKey(32)}
    pub fn generate_m1(&mut self) -> Result<Vec<u8>> {
        self.expect(PairVerifyState::Initial, "M1")?;

        let ecdh = EphemeralKey::generate();
        self.controller_public = ecdh.public_bytes();
        self.ecdh = Some(ecdh);

        self.state = PairVerifyState::M1Sent;
        Ok(Tlv8::pair_verify_m1(&self.controller_public).encode())
    }

    /// M2: {State=2, PublicKey(32), EncryptedData{Identifier, Signature}}
    pub fn process_m2(&mut self, response: &[u8]) -> Result<()> {
        self.expect(PairVerifyState::M1Sent, "M2")?;
        let result = self.handle_m2(response);
        self.advance(result, PairVerifyState::M2Received)
    }

    fn handle_m2(&mut self, response: &[u8]) -> Result<()> {
        let tlv = expect_state(response, 0x02, Exchange::Verify)?;

        let accessory_public: [u8; 32] = tlv
            .require(TlvType::PublicKey, "M2 public key")?
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: tlv.get(TlvType::PublicKey).map_or(0, <[u8]>::len),
            })?;
        let encrypted = tlv.require(TlvType::EncryptedData, "M2 encrypted data")?;

        let ecdh = self
            .ecdh
            .take()
            .ok_or_else(|| PairingError::InvalidState("ECDH key already consumed".to_string()))?;
        let shared = ecdh.agree(&accessory_public)?;
        let session_key = Derivation::PairVerifyEncrypt.derive(shared.as_bytes())?;

        let decrypted =
            decrypt_with_nonce(&session_key, &nonce_from_string(PV_MSG02_NONCE), encrypted)?;
        let inner = Tlv8::parse(&decrypted).map_err(|e| PairingError::TlvParse(e.to_string()))?;

        let accessory_id = inner.require(TlvType::Identifier, "accessory identifier")?;
        if accessory_id != self.accessory_pairing_id.as_bytes() {
            return Err(PairingError::Protocol(format!(
                "accessory identifier {} does not match pairing {}",
                String::from_utf8_lossy(accessory_id),
                self.accessory_pairing_id
            ))
            .into());
        }

        // AccessoryECDH || AccessoryPairingID || iOSDeviceECDH
        let mut message = Vec::with_capacity(64 + accessory_id.len());
        message.extend_from_slice(&accessory_public);
        message.extend_from_slice(accessory_id);
        message.extend_from_slice(&self.controller_public);

        let signature = inner.require(TlvType::Signature, "accessory signature")?;
        ed25519::verify(&self.accessory_ltpk, &message, signature)
            .map_err(|_| PairingError::SignatureInvalid)?;

        self.accessory_public = Some(accessory_public);
        self.shared_secret = Some(shared);
        self.session_key = Some(session_key);
        Ok(())
    }

    /// M3: {State=3, EncryptedData{Identifier, Signature}}
    pub fn generate_m3(&mut self) -> Result<Vec<u8>> {
        self.expect(PairVerifyState::M2Received, "M3")?;
        let result = self.build_m3();
        self.advance(result, PairVerifyState::M3Sent)
    }

    fn build_m3(&self) -> Result<Vec<u8>> {
        let accessory_public = self
            .accessory_public
            .ok_or_else(|| PairingError::InvalidState("accessory key missing".to_string()))?;
        let session_key = self
            .session_key
            .as_ref()
            .ok_or_else(|| PairingError::InvalidState("session key not derived".to_string()))?;

        // iOSDeviceECDH || iOSDevicePairingID || AccessoryECDH
        let id = self.controller.id_bytes();
        let mut message = Vec::with_capacity(64 + id.len());
        message.extend_from_slice(&self.controller_public);
        message.extend_from_slice(id);
        message.extend_from_slice(&accessory_public);
        let signature = self.controller.sign(&message);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, id.to_vec())
            .with(TlvType::Signature, signature.to_vec());
        let encrypted = encrypt_with_nonce(
            session_key,
            &nonce_from_string(PV_MSG03_NONCE),
            &inner.encode(),
        )?;

        Ok(Tlv8::new()
            .with(TlvType::State, [0x03])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// M4: {State=4}; returns the control-channel keys.
    pub fn process_m4(&mut self, response: &[u8]) -> Result<SessionKeys> {
        self.expect(PairVerifyState::M3Sent, "M4")?;
        let result = self.handle_m4(response);
        self.advance(result, PairVerifyState::Complete)
    }

    fn handle_m4(&self, response: &[u8]) -> Result<SessionKeys> {
        expect_state(response, 0x04, Exchange::Verify)?;
        let shared = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| PairingError::InvalidState("shared secret missing".to_string()))?;

        debug!(accessory = %self.accessory_pairing_id, "pair-verify complete");
        Ok(SessionKeys::derive_control_keys(shared)?)
    }

    fn expect(&mut self, expected: PairVerifyState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            let current = self.state;
            self.state = PairVerifyState::Failed;
            Err(Error::from(PairingError::InvalidState(format!(
                "{} not valid in state {:?}",
                step, current
            ))))
        }
    }

    fn advance<T>(&mut self, result: Result<T>, next: PairVerifyState) -> Result<T> {
        self.state = if result.is_ok() {
            next
        } else {
            PairVerifyState::Failed
        };
        result
    }
}
