//! Transport seam for pairing exchanges.

use async_trait::async_trait;
use hap_core::error::Result;

/// Sends pairing TLV bodies and returns the accessory's TLV response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PairingTransport: Send {
    /// POST to /pair-setup.
    async fn pair_setup(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// POST to /pair-verify.
    async fn pair_verify(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// POST to /pairings (requires an encrypted session).
    async fn pairings(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}
