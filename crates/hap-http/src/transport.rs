//! Network implementation of `AccessoryTransport`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hap_core::error::{HttpError, Result};
use hap_core::{AccessoryDatabase, CharacteristicValue, CharacteristicWrite, Characteristics, InstanceId};
use hap_pairing::{
    add_pairing, remove_pairing, run_pair_setup, run_pair_verify, ControllerIdentity, PairMethod,
    PairingMaterial, Permissions, SetupCode,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::connection::HapConnection;
use crate::response::check_statuses;
use crate::traits::{AccessoryTransport, TransportNotification};
use crate::HttpRequest;

/// Timeouts applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP transport to one accessory address.
pub struct HttpTransport {
    addr: SocketAddr,
    config: TransportConfig,
    connection: Option<HapConnection>,
    material: Option<PairingMaterial>,
    notify_tx: UnboundedSender<TransportNotification>,
    notify_rx: Option<UnboundedReceiver<TransportNotification>>,
}

impl HttpTransport {
    pub fn new(addr: SocketAddr, config: TransportConfig) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            addr,
            config,
            connection: None,
            material: None,
            notify_tx,
            notify_rx: Some(notify_rx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn has_session(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.is_open() && c.is_encrypted())
    }

    async fn connect_plain(&self) -> Result<HapConnection> {
        HapConnection::connect(
            self.addr,
            self.config.connect_timeout,
            self.config.request_timeout,
        )
        .await
    }

    /// The encrypted connection, re-verified if the previous one dropped.
    async fn session(&mut self) -> Result<&mut HapConnection> {
        if !self.has_session() {
            let material = self.material.as_ref().ok_or(HttpError::NoSession)?;
            if self.connection.is_some() {
                debug!(addr = %self.addr, "session dropped, re-verifying");
            }

            let mut conn = HapConnection::connect(
                self.addr,
                self.config.connect_timeout,
                self.config.request_timeout,
            )
            .await?;
            let keys = run_pair_verify(&mut conn, material).await?;
            conn.upgrade(&keys, self.notify_tx.clone())?;
            self.connection = Some(conn);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| HttpError::NoSession.into())
    }
}

#[async_trait]
impl AccessoryTransport for HttpTransport {
    async fn identify(&mut self) -> Result<()> {
        let mut conn = self.connect_plain().await?;
        let response = conn.send(HttpRequest::identify()).await;
        conn.close().await?;
        response?.ensure_success()
    }

    async fn pair_setup(&mut self, method: PairMethod, code: &SetupCode) -> Result<PairingMaterial> {
        let mut conn = self.connect_plain().await?;
        let material = run_pair_setup(&mut conn, method, code).await;
        conn.close().await?;
        material
    }

    async fn open_session(&mut self, material: &PairingMaterial) -> Result<()> {
        if let Some(mut previous) = self.connection.take() {
            previous.close().await?;
        }
        self.material = Some(material.clone());
        self.session().await?;
        info!(addr = %self.addr, accessory = %material.accessory_pairing_id(), "session opened");
        Ok(())
    }

    async fn add_pairing(
        &mut self,
        controller: &ControllerIdentity,
        permissions: Permissions,
    ) -> Result<()> {
        let conn = self.session().await?;
        add_pairing(conn, controller, permissions).await
    }

    async fn remove_pairing(&mut self, pairing_id: &str) -> Result<()> {
        let conn = self.session().await?;
        remove_pairing(conn, pairing_id).await
    }

    async fn get_accessories(&mut self) -> Result<AccessoryDatabase> {
        let conn = self.session().await?;
        let response = conn.send(HttpRequest::get_accessories()).await?;
        response.ensure_success()?;
        Ok(AccessoryDatabase::from_json(&response.body)?)
    }

    async fn get_characteristics(&mut self, ids: &[InstanceId]) -> Result<Vec<CharacteristicValue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.session().await?;
        let response = conn.send(HttpRequest::get_characteristics(ids)).await?;
        response.ensure_success()?;
        response.characteristic_values()
    }

    async fn put_characteristics(&mut self, writes: &[CharacteristicWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&Characteristics {
            characteristics: writes.iter().collect::<Vec<_>>(),
        })
        .map_err(|e| HttpError::Json(e.to_string()))?;

        let conn = self.session().await?;
        let response = conn.send(HttpRequest::put_characteristics(body)).await?;
        response.ensure_success()?;

        if response.body.is_empty() {
            return Ok(());
        }
        let values: Characteristics<CharacteristicValue> = response.json()?;
        check_statuses(&values.characteristics)
    }

    async fn subscribe_characteristics(&mut self, ids: &[InstanceId]) -> Result<()> {
        let writes: Vec<_> = ids
            .iter()
            .map(|id| CharacteristicWrite::events(*id, true))
            .collect();
        self.put_characteristics(&writes).await
    }

    fn notifications(&mut self) -> Option<UnboundedReceiver<TransportNotification>> {
        self.notify_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.material = None;
        if let Some(mut conn) = self.connection.take() {
            conn.close().await?;
            debug!(addr = %self.addr, "session closed");
        }
        Ok(())
    }
}
