//! Pairing and unpairing an FP2.

use std::sync::Arc;

use hap_core::{DeviceId, DeviceRecord, Error, Result};
use hap_http::AccessoryTransport;
use hap_pairing::{ControllerIdentity, PairMethod, PairingMaterial, Permissions, SetupCode};
use tracing::{debug, info, warn};

use crate::store::PairingStore;

/// Runs pair-setup and pairing removal against the pairing store.
///
/// `pair` never writes to the store. Its caller takes the material first
/// and then persists it with `save`, so a failed write cannot lose a
/// pairing the accessory already holds.
pub struct PairingManager {
    store: Arc<dyn PairingStore>,
}

impl PairingManager {
    pub fn new(store: Arc<dyn PairingStore>) -> Self {
        Self { store }
    }

    /// Pair with `record` using the eight digit setup `code`.
    ///
    /// After pair-setup and pair-verify a second, non-admin controller is
    /// registered and kept in the returned material. The transport is closed
    /// before returning, on success and on failure. Nothing is persisted.
    pub async fn pair(
        &self,
        transport: &mut dyn AccessoryTransport,
        record: &DeviceRecord,
        code: &str,
    ) -> Result<PairingMaterial> {
        if !record.pairable() {
            return Err(Error::AlreadyPaired);
        }
        let code = SetupCode::parse(code)?;
        let method = PairMethod::for_features(record.feature_flags);
        info!(device = %record.id, name = %record.name, ?method, "pairing");

        let result = Self::exchange(transport, method, &code).await;
        if let Err(e) = transport.close().await {
            debug!(device = %record.id, error = %e, "close after pairing failed");
        }

        let material = result?;
        info!(device = %record.id, "paired");
        Ok(material)
    }

    pub fn save(&self, id: &DeviceId, material: &PairingMaterial) -> Result<()> {
        self.store.save(id, material)?;
        debug!(device = %id, "pairing saved");
        Ok(())
    }

    async fn exchange(
        transport: &mut dyn AccessoryTransport,
        method: PairMethod,
        code: &SetupCode,
    ) -> Result<PairingMaterial> {
        let material = transport.pair_setup(method, code).await?;
        transport.open_session(&material).await?;

        let guest = ControllerIdentity::generate();
        transport.add_pairing(&guest, Permissions::Regular).await?;
        debug!(guest = guest.id(), "registered secondary controller");

        Ok(material.with_guest(&guest))
    }

    /// Remove this controller from the accessory, close the transport and
    /// forget the stored material. The transport must hold a session.
    pub async fn unpair(
        &self,
        transport: &mut dyn AccessoryTransport,
        id: &DeviceId,
        material: &PairingMaterial,
    ) -> Result<()> {
        info!(device = %id, "unpairing");
        let result = transport.remove_pairing(material.controller_pairing_id()).await;
        if let Err(e) = transport.close().await {
            debug!(device = %id, error = %e, "close after unpairing failed");
        }
        result?;

        if !self.store.remove(id)? {
            warn!(device = %id, "no stored pairing to remove");
        }
        info!(device = %id, "unpaired");
        Ok(())
    }
}
