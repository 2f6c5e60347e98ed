//! # hap-pairing
//!
//! HomeKit Accessory Protocol pairing for IP accessories.
//!
//! This crate implements:
//! - pair-setup (SRP-6a, M1-M6) yielding long-term `PairingMaterial`
//! - pair-verify (X25519 + Ed25519, M1-M4) yielding session keys
//! - `/pairings` add and remove requests
//! - drivers that run each exchange over a `PairingTransport`

mod controller;
mod material;
mod pair_setup;
mod pair_verify;
mod pairings;
mod response;
mod session;
mod setup_code;
mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use controller::ControllerIdentity;
pub use material::PairingMaterial;
pub use pair_setup::{PairSetup, PairSetupState};
pub use pair_verify::{PairVerify, PairVerifyState};
pub use pairings::{add_pairing_request, check_pairings_response, remove_pairing_request, Permissions};
pub use session::{add_pairing, remove_pairing, run_pair_setup, run_pair_verify};
pub use setup_code::{PairMethod, SetupCode};
pub use traits::PairingTransport;

#[cfg(test)]
pub use traits::MockPairingTransport;
