//! # hap-crypto
//!
//! Cryptographic primitives for HomeKit Accessory Protocol pairing and
//! secure sessions.
//!
//! This crate provides:
//! - SRP-6a (3072-bit) for pair-setup
//! - X25519 ECDH for pair-verify key agreement
//! - Ed25519 long-term identities and signatures
//! - ChaCha20-Poly1305 for sub-TLV and session framing
//! - HKDF-SHA512 for key derivation
//! - TLV8 encoding
//!
//! Identity seeds and derived session keys are zeroized on drop.

pub mod chacha;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;
pub mod x25519;

pub use chacha::{ControlCipher, FrameOpener, FrameSealer};
pub use ed25519::IdentityKeyPair;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use tlv::{Tlv8, TlvError, TlvType};
pub use x25519::EphemeralKey;
