//! Traits for accessory transport abstraction.

use async_trait::async_trait;
use hap_core::error::Result;
use hap_core::{AccessoryDatabase, CharacteristicValue, CharacteristicWrite, InstanceId};
use hap_pairing::{ControllerIdentity, PairMethod, PairingMaterial, Permissions, SetupCode};
use tokio::sync::mpsc::UnboundedReceiver;

/// Out-of-band messages from an encrypted session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotification {
    /// Body of an `EVENT/1.0` push.
    Event(Vec<CharacteristicValue>),
    /// The accessory closed the session or the link failed.
    Disconnected,
}

/// Everything the session engine needs from one accessory.
///
/// Methods other than `identify` and `pair_setup` require an open session.
/// After a remote drop the next request re-opens the session with the
/// material passed to `open_session`.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait AccessoryTransport: Send {
    /// Ask an unpaired accessory to identify itself.
    async fn identify(&mut self) -> Result<()>;

    /// Run pair-setup on a fresh plain connection.
    async fn pair_setup(&mut self, method: PairMethod, code: &SetupCode) -> Result<PairingMaterial>;

    /// Pair-verify with `material` and switch to the encrypted session.
    async fn open_session(&mut self, material: &PairingMaterial) -> Result<()>;

    async fn add_pairing(
        &mut self,
        controller: &ControllerIdentity,
        permissions: Permissions,
    ) -> Result<()>;

    async fn remove_pairing(&mut self, pairing_id: &str) -> Result<()>;

    async fn get_accessories(&mut self) -> Result<AccessoryDatabase>;

    async fn get_characteristics(&mut self, ids: &[InstanceId]) -> Result<Vec<CharacteristicValue>>;

    async fn put_characteristics(&mut self, writes: &[CharacteristicWrite]) -> Result<()>;

    /// Enable event notifications for `ids`.
    async fn subscribe_characteristics(&mut self, ids: &[InstanceId]) -> Result<()>;

    /// Take the notification receiver. Only the first call returns it.
    fn notifications(&mut self) -> Option<UnboundedReceiver<TransportNotification>>;

    /// Close the session and forget the material. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
