//! Simulated accessory for exercising pairing exchanges without hardware.
//!
//! `MockAccessory` answers pair-setup, pair-verify and `/pairings` bodies the
//! way a HAP accessory does, and implements `PairingTransport` directly.

use std::collections::HashMap;

use async_trait::async_trait;
use hap_core::error::Result;
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519::{self, IdentityKeyPair},
    hkdf::Derivation,
    keys::{SessionKeys, SharedSecret},
    srp::SrpServer,
    tlv::{method, Tlv8, TlvError, TlvType},
    x25519::EphemeralKey,
};
use rand::{rngs::OsRng, RngCore};

use crate::traits::PairingTransport;

/// A controller known to the accessory.
#[derive(Debug, Clone)]
pub struct RegisteredController {
    pub ltpk: [u8; 32],
    pub admin: bool,
}

struct SetupProgress {
    srp: SrpServer,
    srp_secret: Option<Vec<u8>>,
    session_key: Option<[u8; 32]>,
}

struct VerifyProgress {
    controller_public: [u8; 32],
    accessory_public: [u8; 32],
    shared: SharedSecret,
    session_key: [u8; 32],
}

/// In-memory HAP accessory.
pub struct MockAccessory {
    pairing_id: String,
    identity: IdentityKeyPair,
    code: String,
    controllers: HashMap<String, RegisteredController>,
    setup: Option<SetupProgress>,
    verify: Option<VerifyProgress>,
    verified_controller: Option<String>,
    session_keys: Option<SessionKeys>,
}

/// A failed step answers with `{State, Error}`.
type Step = std::result::Result<Tlv8, TlvError>;

impl MockAccessory {
    pub fn new(pairing_id: &str, code: &str) -> Self {
        Self {
            pairing_id: pairing_id.to_string(),
            identity: IdentityKeyPair::generate(),
            code: code.to_string(),
            controllers: HashMap::new(),
            setup: None,
            verify: None,
            verified_controller: None,
            session_keys: None,
        }
    }

    pub fn pairing_id(&self) -> &str {
        &self.pairing_id
    }

    /// Accessory long-term public key (AccessoryLTPK).
    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }

    pub fn register_controller(&mut self, id: &str, ltpk: [u8; 32], admin: bool) {
        self.controllers
            .insert(id.to_string(), RegisteredController { ltpk, admin });
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.controllers.contains_key(id)
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.controllers.get(id).is_some_and(|c| c.admin)
    }

    pub fn controllers(&self) -> &HashMap<String, RegisteredController> {
        &self.controllers
    }

    /// Keys of the last verified session, seen from the accessory side.
    pub fn session_keys(&self) -> Option<SessionKeys> {
        self.session_keys.clone()
    }

    /// Drop the verified session, as a reboot or network change would.
    pub fn reset_session(&mut self) {
        self.verify = None;
        self.verified_controller = None;
        self.session_keys = None;
    }

    pub fn handle_pair_setup(&mut self, body: &[u8]) -> Vec<u8> {
        let Ok(request) = Tlv8::parse(body) else {
            return error_response(2, TlvError::Unknown);
        };
        let state = request.state().unwrap_or(0);
        let step = match state {
            1 => self.setup_m2(),
            3 => self.setup_m4(&request),
            5 => self.setup_m6(&request),
            _ => Err(TlvError::Unknown),
        };
        finish(state.wrapping_add(1), step)
    }

    pub fn handle_pair_verify(&mut self, body: &[u8]) -> Vec<u8> {
        let Ok(request) = Tlv8::parse(body) else {
            return error_response(2, TlvError::Unknown);
        };
        let state = request.state().unwrap_or(0);
        let step = match state {
            1 => self.verify_m2(&request),
            3 => self.verify_m4(&request),
            _ => Err(TlvError::Unknown),
        };
        finish(state.wrapping_add(1), step)
    }

    pub fn handle_pairings(&mut self, body: &[u8]) -> Vec<u8> {
        let step = Tlv8::parse(body)
            .map_err(|_| TlvError::Unknown)
            .and_then(|request| self.pairings(&request));
        finish(2, step)
    }

    fn setup_m2(&mut self) -> Step {
        if self.controllers.values().any(|c| c.admin) {
            return Err(TlvError::Unavailable);
        }

        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let srp = SrpServer::new(b"Pair-Setup", self.code.as_bytes(), salt);
        let challenge = srp.challenge();
        self.setup = Some(SetupProgress {
            srp,
            srp_secret: None,
            session_key: None,
        });

        Ok(Tlv8::new()
            .with(TlvType::State, [0x02])
            .with(TlvType::Salt, challenge.salt.to_vec())
            .with(TlvType::PublicKey, challenge.server_public_key))
    }

    fn setup_m4(&mut self, request: &Tlv8) -> Step {
        let setup = self.setup.as_mut().ok_or(TlvError::Unknown)?;
        let client_public = request.get(TlvType::PublicKey).ok_or(TlvError::Unknown)?;
        let client_proof = request.get(TlvType::Proof).ok_or(TlvError::Unknown)?;

        let (secret, server_proof) = setup
            .srp
            .verify_client(client_public, client_proof)
            .map_err(|_| TlvError::Authentication)?;

        setup.session_key = Some(Derivation::PairSetupEncrypt.derive(&secret).map_err(|_| TlvError::Unknown)?);
        setup.srp_secret = Some(secret);

        Ok(Tlv8::new()
            .with(TlvType::State, [0x04])
            .with(TlvType::Proof, server_proof))
    }

    fn setup_m6(&mut self, request: &Tlv8) -> Step {
        let setup = self.setup.take().ok_or(TlvError::Unknown)?;
        let secret = setup.srp_secret.ok_or(TlvError::Unknown)?;
        let session_key = setup.session_key.ok_or(TlvError::Unknown)?;

        let encrypted = request.get(TlvType::EncryptedData).ok_or(TlvError::Unknown)?;
        let decrypted = decrypt_with_nonce(&session_key, &nonce_from_string(b"PS-Msg05"), encrypted)
            .map_err(|_| TlvError::Authentication)?;
        let inner = Tlv8::parse(&decrypted).map_err(|_| TlvError::Unknown)?;

        let id = inner.get(TlvType::Identifier).ok_or(TlvError::Unknown)?;
        let ltpk: [u8; 32] = inner
            .get(TlvType::PublicKey)
            .and_then(|pk| pk.try_into().ok())
            .ok_or(TlvError::Unknown)?;
        let signature = inner.get(TlvType::Signature).ok_or(TlvError::Unknown)?;

        let ios_device_x = Derivation::ControllerSign.derive(&secret).map_err(|_| TlvError::Unknown)?;
        let message = [&ios_device_x[..], id, &ltpk[..]].concat();
        ed25519::verify(&ltpk, &message, signature).map_err(|_| TlvError::Authentication)?;

        let id = String::from_utf8(id.to_vec()).map_err(|_| TlvError::Unknown)?;
        self.register_controller(&id, ltpk, true);

        let accessory_x = Derivation::AccessorySign.derive(&secret).map_err(|_| TlvError::Unknown)?;
        let message = [
            &accessory_x[..],
            self.pairing_id.as_bytes(),
            &self.identity.public_key()[..],
        ]
        .concat();
        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.pairing_id.as_bytes().to_vec())
            .with(TlvType::PublicKey, self.identity.public_key().to_vec())
            .with(TlvType::Signature, self.identity.sign(&message).to_vec());
        let encrypted = encrypt_with_nonce(&session_key, &nonce_from_string(b"PS-Msg06"), &inner.encode())
            .map_err(|_| TlvError::Unknown)?;

        Ok(Tlv8::new()
            .with(TlvType::State, [0x06])
            .with(TlvType::EncryptedData, encrypted))
    }

    fn verify_m2(&mut self, request: &Tlv8) -> Step {
        let controller_public: [u8; 32] = request
            .get(TlvType::PublicKey)
            .and_then(|pk| pk.try_into().ok())
            .ok_or(TlvError::Unknown)?;

        let ecdh = EphemeralKey::generate();
        let accessory_public = ecdh.public_bytes();
        let shared = ecdh
            .agree(&controller_public)
            .map_err(|_| TlvError::Authentication)?;
        let session_key = Derivation::PairVerifyEncrypt.derive(shared.as_bytes()).map_err(|_| TlvError::Unknown)?;

        let message = [
            &accessory_public[..],
            self.pairing_id.as_bytes(),
            &controller_public[..],
        ]
        .concat();
        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.pairing_id.as_bytes().to_vec())
            .with(TlvType::Signature, self.identity.sign(&message).to_vec());
        let encrypted = encrypt_with_nonce(&session_key, &nonce_from_string(b"PV-Msg02"), &inner.encode())
            .map_err(|_| TlvError::Unknown)?;

        self.verify = Some(VerifyProgress {
            controller_public,
            accessory_public,
            shared,
            session_key,
        });

        Ok(Tlv8::new()
            .with(TlvType::State, [0x02])
            .with(TlvType::PublicKey, accessory_public.to_vec())
            .with(TlvType::EncryptedData, encrypted))
    }

    fn verify_m4(&mut self, request: &Tlv8) -> Step {
        let progress = self.verify.take().ok_or(TlvError::Unknown)?;

        let encrypted = request.get(TlvType::EncryptedData).ok_or(TlvError::Unknown)?;
        let decrypted = decrypt_with_nonce(
            &progress.session_key,
            &nonce_from_string(b"PV-Msg03"),
            encrypted,
        )
        .map_err(|_| TlvError::Authentication)?;
        let inner = Tlv8::parse(&decrypted).map_err(|_| TlvError::Unknown)?;

        let id = inner.get(TlvType::Identifier).ok_or(TlvError::Unknown)?;
        let signature = inner.get(TlvType::Signature).ok_or(TlvError::Unknown)?;
        let id = String::from_utf8(id.to_vec()).map_err(|_| TlvError::Unknown)?;
        let controller = self.controllers.get(&id).ok_or(TlvError::Authentication)?;

        let message = [
            &progress.controller_public[..],
            id.as_bytes(),
            &progress.accessory_public[..],
        ]
        .concat();
        ed25519::verify(&controller.ltpk, &message, signature).map_err(|_| TlvError::Authentication)?;

        let keys = SessionKeys::derive_control_keys(&progress.shared)
            .map_err(|_| TlvError::Unknown)?;
        self.session_keys = Some(keys.reversed());
        self.verified_controller = Some(id);

        Ok(Tlv8::new().with(TlvType::State, [0x04]))
    }

    fn pairings(&mut self, request: &Tlv8) -> Step {
        let caller = self.verified_controller.as_deref().ok_or(TlvError::Authentication)?;
        if !self.is_admin(caller) {
            return Err(TlvError::Authentication);
        }

        let id = request
            .get(TlvType::Identifier)
            .and_then(|id| String::from_utf8(id.to_vec()).ok())
            .ok_or(TlvError::Unknown)?;

        match request.get(TlvType::Method).and_then(|m| m.first().copied()) {
            Some(method::ADD_PAIRING) => {
                let ltpk: [u8; 32] = request
                    .get(TlvType::PublicKey)
                    .and_then(|pk| pk.try_into().ok())
                    .ok_or(TlvError::Unknown)?;
                let admin = request.get(TlvType::Permissions) == Some(&[0x01][..]);
                self.register_controller(&id, ltpk, admin);
            }
            Some(method::REMOVE_PAIRING) => {
                self.controllers.remove(&id);
            }
            _ => return Err(TlvError::Unknown),
        }

        Ok(Tlv8::new().with(TlvType::State, [0x02]))
    }
}

fn finish(state: u8, step: Step) -> Vec<u8> {
    match step {
        Ok(tlv) => tlv.encode(),
        Err(code) => error_response(state, code),
    }
}

fn error_response(state: u8, code: TlvError) -> Vec<u8> {
    Tlv8::new()
        .with(TlvType::State, [state])
        .with(TlvType::Error, [code as u8])
        .encode()
}

#[async_trait]
impl PairingTransport for MockAccessory {
    async fn pair_setup(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        Ok(self.handle_pair_setup(request))
    }

    async fn pair_verify(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        Ok(self.handle_pair_verify(request))
    }

    async fn pairings(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        Ok(self.handle_pairings(request))
    }
}
