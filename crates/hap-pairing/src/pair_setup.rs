//! HomeKit pair-setup protocol (M1-M6).
//!
//! Establishes an SRP-6a session keyed by the accessory setup code, then
//! exchanges long-term Ed25519 public keys inside ChaCha20-Poly1305 sub-TLVs.

use hap_core::error::{CryptoError, Error, PairingError, Result};
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519,
    hkdf::Derivation,
    srp::{SrpChallenge, SrpClient, SrpProof, GROUP_BYTES},
    tlv::{Tlv8, TlvType},
};
use tracing::debug;

use crate::controller::ControllerIdentity;
use crate::material::PairingMaterial;
use crate::response::{expect_state, Exchange};
use crate::setup_code::{PairMethod, SetupCode};

/// SRP username fixed by HAP.
const SRP_USERNAME: &[u8] = b"Pair-Setup";
/// Nonce for pair-setup M5 encryption.
const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
/// Nonce for pair-setup M6 decryption.
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

/// Pair-setup state machine.
///
/// Drive it with `generate_m1`, `process_m2`, `generate_m3`, `process_m4`,
/// `generate_m5`, `process_m6`. Any error leaves the machine `Failed`.
pub struct PairSetup {
    state: PairSetupState,
    method: PairMethod,
    controller: ControllerIdentity,
    srp_client: SrpClient,
    srp_proof: Option<SrpProof>,
    session_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSetupState {
    Initial,
    M1Sent,
    M2Received,
    M3Sent,
    M4Received,
    M5Sent,
    Complete,
    Failed,
}

impl PairSetup {
    pub fn new(code: &SetupCode, method: PairMethod, controller: ControllerIdentity) -> Self {
        Self {
            state: PairSetupState::Initial,
            method,
            controller,
            srp_client: SrpClient::new(SRP_USERNAME, code.as_bytes()),
            srp_proof: None,
            session_key: None,
        }
    }

    pub fn state(&self) -> PairSetupState {
        self.state
    }

    pub fn controller(&self) -> &ControllerIdentity {
        &self.controller
    }

    /// M1: {State=1, Method}
    pub fn generate_m1(&mut self) -> Result<Vec<u8>> {
        self.expect(PairSetupState::Initial, "M1")?;
        self.state = PairSetupState::M1Sent;
        Ok(Tlv8::pair_setup_m1(self.method.as_byte()).encode())
    }

    /// M2: {State=2, Salt(16), PublicKey(384)}
    pub fn process_m2(&mut self, response: &[u8]) -> Result<()> {
        self.expect(PairSetupState::M1Sent, "M2")?;
        let result = self.handle_m2(response);
        self.advance(result, PairSetupState::M2Received)
    }

    fn handle_m2(&mut self, response: &[u8]) -> Result<()> {
        let tlv = expect_state(response, 0x02, Exchange::Setup)?;

        let salt: [u8; 16] = tlv
            .get(TlvType::Salt)
            .ok_or(PairingError::MissingTlv(TlvType::Salt as u8))?
            .try_into()
            .map_err(|_| PairingError::Protocol("M2 salt must be 16 bytes".to_string()))?;

        let server_pk_raw = tlv
            .get(TlvType::PublicKey)
            .ok_or(PairingError::MissingTlv(TlvType::PublicKey as u8))?;
        if server_pk_raw.is_empty() || server_pk_raw.len() > GROUP_BYTES {
            return Err(PairingError::InvalidServerPublicKey.into());
        }

        // Leading zero bytes may be stripped by the accessory
        let mut server_public_key = vec![0u8; GROUP_BYTES - server_pk_raw.len()];
        server_public_key.extend_from_slice(server_pk_raw);

        let proof = self
            .srp_client
            .process_challenge(&SrpChallenge {
                salt,
                server_public_key,
            })
            .map_err(|_| PairingError::InvalidServerPublicKey)?;

        self.srp_proof = Some(proof);
        Ok(())
    }

    /// M3: {State=3, PublicKey(384), Proof(64)}
    pub fn generate_m3(&mut self) -> Result<Vec<u8>> {
        self.expect(PairSetupState::M2Received, "M3")?;
        let proof = self.proof()?;

        let tlv = Tlv8::new()
            .with(TlvType::State, [0x03])
            .with(TlvType::PublicKey, self.srp_client.public_key())
            .with(TlvType::Proof, proof.client_proof.clone());

        self.state = PairSetupState::M3Sent;
        Ok(tlv.encode())
    }

    /// M4: {State=4, Proof(64)}
    pub fn process_m4(&mut self, response: &[u8]) -> Result<()> {
        self.expect(PairSetupState::M3Sent, "M4")?;
        let result = self.handle_m4(response);
        self.advance(result, PairSetupState::M4Received)
    }

    fn handle_m4(&mut self, response: &[u8]) -> Result<()> {
        let tlv = expect_state(response, 0x04, Exchange::Setup)?;
        let server_proof = tlv.require(TlvType::Proof, "M4 proof")?;

        let proof = self.proof()?;
        if !proof.verifies(server_proof) {
            return Err(PairingError::SrpVerificationFailed.into());
        }

        self.session_key = Some(Derivation::PairSetupEncrypt.derive(&proof.shared_secret)?);
        Ok(())
    }

    /// M5: {State=5, EncryptedData{Identifier, PublicKey, Signature}}
    pub fn generate_m5(&mut self) -> Result<Vec<u8>> {
        self.expect(PairSetupState::M4Received, "M5")?;
        let result = self.build_m5();
        self.advance(result, PairSetupState::M5Sent)
    }

    fn build_m5(&self) -> Result<Vec<u8>> {
        let proof = self.proof()?;
        let session_key = self.session_key()?;

        let ios_device_x = Derivation::ControllerSign.derive(&proof.shared_secret)?;

        // iOSDeviceX || iOSDevicePairingID || iOSDeviceLTPK
        let mut message = Vec::with_capacity(32 + self.controller.id_bytes().len() + 32);
        message.extend_from_slice(&ios_device_x);
        message.extend_from_slice(self.controller.id_bytes());
        message.extend_from_slice(&self.controller.public_key());
        let signature = self.controller.sign(&message);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.controller.id_bytes().to_vec())
            .with(TlvType::PublicKey, self.controller.public_key().to_vec())
            .with(TlvType::Signature, signature.to_vec());

        let nonce = nonce_from_string(PS_MSG05_NONCE);
        let encrypted = encrypt_with_nonce(session_key, &nonce, &inner.encode())?;

        Ok(Tlv8::new()
            .with(TlvType::State, [0x05])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// M6: {State=6, EncryptedData{Identifier, PublicKey, Signature}}
    ///
    /// Verifies the accessory's long-term key and returns the pairing material.
    pub fn process_m6(&mut self, response: &[u8]) -> Result<PairingMaterial> {
        self.expect(PairSetupState::M5Sent, "M6")?;
        let result = self.handle_m6(response);
        self.advance(result, PairSetupState::Complete)
    }

    fn handle_m6(&self, response: &[u8]) -> Result<PairingMaterial> {
        let tlv = expect_state(response, 0x06, Exchange::Setup)?;
        let encrypted = tlv.require(TlvType::EncryptedData, "M6 encrypted data")?;

        let nonce = nonce_from_string(PS_MSG06_NONCE);
        let decrypted = decrypt_with_nonce(self.session_key()?, &nonce, encrypted)?;
        let inner = Tlv8::parse(&decrypted).map_err(|e| PairingError::TlvParse(e.to_string()))?;

        let accessory_id = inner.require(TlvType::Identifier, "accessory identifier")?;
        let accessory_ltpk: [u8; 32] = inner
            .require(TlvType::PublicKey, "accessory LTPK")?
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: inner.get(TlvType::PublicKey).map_or(0, <[u8]>::len),
            })?;
        let signature = inner.require(TlvType::Signature, "accessory signature")?;

        // AccessoryX || AccessoryPairingID || AccessoryLTPK
        let accessory_x = Derivation::AccessorySign.derive(&self.proof()?.shared_secret)?;
        let mut message = Vec::with_capacity(32 + accessory_id.len() + 32);
        message.extend_from_slice(&accessory_x);
        message.extend_from_slice(accessory_id);
        message.extend_from_slice(&accessory_ltpk);

        ed25519::verify(&accessory_ltpk, &message, signature)
            .map_err(|_| PairingError::SignatureInvalid)?;

        let accessory_id = String::from_utf8(accessory_id.to_vec())
            .map_err(|_| PairingError::Protocol("accessory identifier is not UTF-8".to_string()))?;
        debug!(accessory = %accessory_id, "pair-setup complete");

        Ok(PairingMaterial::new(accessory_id, accessory_ltpk, &self.controller))
    }

    fn expect(&mut self, expected: PairSetupState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            let current = self.state;
            self.state = PairSetupState::Failed;
            Err(PairingError::InvalidState(format!("{} not valid in state {:?}", step, current)).into())
        }
    }

    fn advance<T>(&mut self, result: Result<T>, next: PairSetupState) -> Result<T> {
        self.state = if result.is_ok() {
            next
        } else {
            PairSetupState::Failed
        };
        result
    }

    fn proof(&self) -> Result<&SrpProof> {
        self.srp_proof
            .as_ref()
            .ok_or_else(|| Error::from(PairingError::InvalidState("SRP proof not computed".to_string())))
    }

    fn session_key(&self) -> Result<&[u8; 32]> {
        self.session_key
            .as_ref()
            .ok_or_else(|| Error::from(PairingError::InvalidState("session key not derived".to_string())))
    }
}
