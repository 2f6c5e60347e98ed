//! `/pairings` management messages (add and remove controllers).

use hap_core::error::Result;
use hap_crypto::tlv::Tlv8;

use crate::controller::ControllerIdentity;
use crate::response::{expect_state, Exchange};

/// Controller permissions carried by `AddPairing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    Regular,
    Admin,
}

/// `AddPairing` request registering `controller` with the accessory.
pub fn add_pairing_request(controller: &ControllerIdentity, permissions: Permissions) -> Vec<u8> {
    Tlv8::add_pairing(
        controller.id(),
        &controller.public_key(),
        permissions == Permissions::Admin,
    )
    .encode()
}

/// `RemovePairing` request for the controller with `pairing_id`.
pub fn remove_pairing_request(pairing_id: &str) -> Vec<u8> {
    Tlv8::remove_pairing(pairing_id).encode()
}

/// Both add and remove answer with `{State=2}` or an error.
pub fn check_pairings_response(response: &[u8]) -> Result<()> {
    expect_state(response, 0x02, Exchange::Pairings).map(|_| ())
}
