//! Session façade for one FP2.

use std::sync::Arc;

use hap_core::error::{HttpError, ParseError};
use hap_core::uuids::{characteristic, service};
use hap_core::{
    AccessoryDatabase, CharacteristicValue, CharacteristicWrite, DeviceRecord, Error, InstanceId,
    Result, StatusFlags,
};
use hap_http::{AccessoryTransport, TransportNotification};
use hap_pairing::PairingMaterial;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::ClientConfig;
use crate::capability::CapabilityMap;
use crate::dispatcher::{EventDispatcher, SharedTransport, SubscriptionTable};
use crate::events::{event_channel, warning_channel, EventReceiver, EventSender, WarningReceiver, WarningSender};
use crate::pairing::PairingManager;
use crate::store::PairingStore;

/// Where the client is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
    Subscribed,
}

enum SessionState {
    Disconnected,
    Connected(Arc<CapabilityMap>),
    Subscribed(Arc<CapabilityMap>, Subscription),
}

impl SessionState {
    fn map(&self) -> Option<&Arc<CapabilityMap>> {
        match self {
            SessionState::Disconnected => None,
            SessionState::Connected(map) | SessionState::Subscribed(map, _) => Some(map),
        }
    }
}

/// A running notification listener.
struct Subscription {
    table: Arc<SubscriptionTable>,
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<UnboundedReceiver<TransportNotification>>,
}

impl Subscription {
    /// Stop the listener and take back its receiver.
    async fn stop(self) -> Option<UnboundedReceiver<TransportNotification>> {
        let _ = self.shutdown.send(true);
        match self.listener.await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "listener task failed");
                None
            }
        }
    }
}

/// Client for one FP2: pairing, the authenticated session and its
/// capability map, and event subscription.
///
/// One caller drives a client at a time. The notification listener runs
/// as its own task and shares the transport with on-demand requests.
pub struct AccessoryClient {
    record: DeviceRecord,
    material: Option<PairingMaterial>,
    transport: SharedTransport,
    notifications: Option<UnboundedReceiver<TransportNotification>>,
    pairing: PairingManager,
    config: ClientConfig,
    state: SessionState,
    events: EventSender,
    warnings: WarningSender,
}

impl AccessoryClient {
    pub fn new(
        record: DeviceRecord,
        material: Option<PairingMaterial>,
        mut transport: Box<dyn AccessoryTransport>,
        store: Arc<dyn PairingStore>,
        config: ClientConfig,
    ) -> Self {
        let notifications = transport.notifications();
        let (events, _) = event_channel(config.event_capacity);
        let (warnings, _) = warning_channel(config.event_capacity);
        Self {
            record,
            material,
            transport: Arc::new(Mutex::new(transport)),
            notifications,
            pairing: PairingManager::new(store),
            config,
            state: SessionState::Disconnected,
            events,
            warnings,
        }
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_paired(&self) -> bool {
        self.material.is_some()
    }

    pub fn material(&self) -> Option<&PairingMaterial> {
        self.material.as_ref()
    }

    pub fn state(&self) -> ClientState {
        match self.state {
            SessionState::Disconnected => ClientState::Disconnected,
            SessionState::Connected(_) => ClientState::Connected,
            SessionState::Subscribed(..) => ClientState::Subscribed,
        }
    }

    /// Domain events from `subscribe`. Register before subscribing to see
    /// the initial values.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Non-fatal problems of a subscribed session.
    pub fn warnings(&self) -> WarningReceiver {
        self.warnings.subscribe()
    }

    /// Open the session and map the accessory database.
    ///
    /// Returns the cached map when already connected.
    pub async fn connect(&mut self) -> Result<Arc<CapabilityMap>> {
        if let Some(map) = self.state.map() {
            return Ok(map.clone());
        }
        let material = self.material.as_ref().ok_or(Error::NotPaired)?;

        let mut transport = self.transport.lock().await;
        let built = async {
            transport.open_session(material).await?;
            let db = transport.get_accessories().await?;
            CapabilityMap::build(&db)
        }
        .await;

        let map = match built {
            Ok(map) => Arc::new(map),
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!(error = %close_err, "close after failed connect");
                }
                return Err(e);
            }
        };
        drop(transport);

        info!(device = %self.record.id, capabilities = map.len(), "connected");
        self.state = SessionState::Connected(map.clone());
        Ok(map)
    }

    /// Stop any subscription and close the session. No-op when disconnected.
    pub async fn disconnect(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Disconnected) {
            SessionState::Disconnected => return Ok(()),
            SessionState::Connected(_) => {}
            SessionState::Subscribed(_, subscription) => {
                self.notifications = subscription.stop().await;
            }
        }
        info!(device = %self.record.id, "disconnected");
        self.transport.lock().await.close().await
    }

    pub fn capabilities(&self) -> Option<&CapabilityMap> {
        self.state.map().map(|map| map.as_ref())
    }

    /// Instance id of a characteristic, `None` when the accessory lacks it
    /// or the client is not connected.
    pub fn resolve(
        &self,
        service_type: Uuid,
        char_type: Uuid,
        discriminator: Option<i64>,
    ) -> Option<InstanceId> {
        self.state.map()?.resolve(service_type, char_type, discriminator)
    }

    /// Subscribed instance ids, empty unless subscribed.
    pub fn subscribed(&self) -> Vec<InstanceId> {
        match &self.state {
            SessionState::Subscribed(_, subscription) => subscription.table.ids().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Ask the accessory to identify itself.
    ///
    /// Unpaired accessories get the unauthenticated `/identify` request,
    /// which they may refuse. Paired ones get a write to Identify.
    pub async fn identify(&mut self) -> Result<()> {
        if self.material.is_none() {
            let mut transport = self.transport.lock().await;
            let result = transport.identify().await;
            if let Err(e) = transport.close().await {
                debug!(error = %e, "close after identify");
            }
            return result;
        }

        let map = self.connect().await?;
        let id = map
            .resolve(service::ACCESSORY_INFORMATION, characteristic::IDENTIFY, None)
            .ok_or(Error::UnsupportedFeature { feature: "identify" })?;
        self.put(&[CharacteristicWrite::value(id, Value::Bool(true))]).await
    }

    /// Serial number from the accessory information service.
    pub async fn get_id(&mut self) -> Result<String> {
        let map = self.connect().await?;
        let id = map
            .resolve(service::ACCESSORY_INFORMATION, characteristic::SERIAL_NUMBER, None)
            .ok_or(Error::UnsupportedFeature {
                feature: "serial_number",
            })?;

        let values = self.get(&[id]).await?;
        values
            .into_iter()
            .find(|v| v.id() == id)
            .and_then(|v| match v.value {
                Some(Value::String(serial)) => Some(serial),
                _ => None,
            })
            .ok_or_else(|| ParseError::InvalidValue(format!("serial number at {}", id)).into())
    }

    pub async fn get(&mut self, ids: &[InstanceId]) -> Result<Vec<CharacteristicValue>> {
        self.connect().await?;
        self.transport.lock().await.get_characteristics(ids).await
    }

    pub async fn put(&mut self, writes: &[CharacteristicWrite]) -> Result<()> {
        self.connect().await?;
        self.transport.lock().await.put_characteristics(writes).await
    }

    /// Fresh copy of the accessory database.
    pub async fn accessories(&mut self) -> Result<AccessoryDatabase> {
        self.connect().await?;
        self.transport.lock().await.get_accessories().await
    }

    /// Publish the current value of the light level and of every zone,
    /// then enable notifications for them. No-op when already subscribed.
    pub async fn subscribe(&mut self) -> Result<()> {
        if let SessionState::Subscribed(..) = self.state {
            return Ok(());
        }
        let map = self.connect().await?;
        let table = Arc::new(SubscriptionTable::build(&map, self.config.zone_bound));

        let mut notifications = match self.notifications.take() {
            Some(rx) => rx,
            None => self
                .transport
                .lock()
                .await
                .notifications()
                .ok_or(HttpError::ConnectionClosed)?,
        };
        while notifications.try_recv().is_ok() {}

        let dispatcher = EventDispatcher::new(
            table.clone(),
            self.transport.clone(),
            self.events.clone(),
            self.warnings.clone(),
            self.config.resubscribe_interval,
        );

        let result = if table.is_empty() {
            warn!(device = %self.record.id, "nothing to subscribe to");
            Ok(Vec::new())
        } else {
            let mut transport = self.transport.lock().await;
            async {
                let values = transport.get_characteristics(table.ids()).await?;
                transport.subscribe_characteristics(table.ids()).await?;
                Ok::<_, Error>(values)
            }
            .await
        };
        // Initial values go out only once notifications are enabled
        let initial = match result {
            Ok(values) => values,
            Err(e) => {
                self.notifications = Some(notifications);
                return Err(e);
            }
        };
        dispatcher.dispatch(&initial);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(dispatcher.run(notifications, shutdown_rx));
        info!(device = %self.record.id, entries = table.len(), "subscribed");

        self.state = SessionState::Subscribed(
            map,
            Subscription {
                table,
                shutdown,
                listener,
            },
        );
        Ok(())
    }

    /// Pair with the setup code, keep the resulting material and save it.
    ///
    /// When only the save fails the error is returned but the client stays
    /// paired. Retry with `save_pairing`, or `unpair` to release the
    /// accessory.
    pub async fn pair(&mut self, code: &str) -> Result<PairingMaterial> {
        let material = {
            let mut transport = self.transport.lock().await;
            self.pairing.pair(&mut **transport, &self.record, code).await?
        };
        self.record.status_flags = StatusFlags(self.record.status_flags.0 & !StatusFlags::NOT_PAIRED);
        self.material = Some(material.clone());

        if let Err(e) = self.pairing.save(&self.record.id, &material) {
            warn!(device = %self.record.id, error = %e, "paired but the pairing was not saved");
            return Err(e);
        }
        Ok(material)
    }

    /// Write the current pairing material to the store.
    pub fn save_pairing(&self) -> Result<()> {
        let material = self.material.as_ref().ok_or(Error::NotPaired)?;
        self.pairing.save(&self.record.id, material)
    }

    /// Remove this controller from the accessory and drop the material.
    ///
    /// Needs a connected session. The client is disconnected afterwards,
    /// whether or not the removal succeeded.
    pub async fn unpair(&mut self) -> Result<()> {
        let material = match (&self.state, &self.material) {
            (SessionState::Disconnected, _) | (_, None) => return Err(Error::NotPaired),
            (_, Some(material)) => material.clone(),
        };

        if let SessionState::Subscribed(_, subscription) =
            std::mem::replace(&mut self.state, SessionState::Disconnected)
        {
            self.notifications = subscription.stop().await;
        }

        {
            let mut transport = self.transport.lock().await;
            self.pairing
                .unpair(&mut **transport, &self.record.id, &material)
                .await?;
        }
        self.material = None;
        self.record.status_flags = StatusFlags(self.record.status_flags.0 | StatusFlags::NOT_PAIRED);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fixtures::{fp2_database, record};
    use crate::events::{DomainEvent, SessionWarning};
    use crate::store::MemoryPairingStore;
    use hap_http::MockAccessoryTransport;
    use hap_pairing::ControllerIdentity;
    use mockall::Sequence;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedSender};

    fn material() -> PairingMaterial {
        PairingMaterial::new(
            "58:55:CA:1A:E2:88",
            [9u8; 32],
            &ControllerIdentity::from_seed("ADMIN-ID", &[5u8; 32]),
        )
    }

    /// Mock with a notification channel; zone 3 is occupied.
    fn transport(zones: &'static [i64]) -> (MockAccessoryTransport, UnboundedSender<TransportNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rx = Some(rx);
        let mut mock = MockAccessoryTransport::new();
        mock.expect_notifications().returning(move || rx.take());
        mock.expect_open_session().returning(|_| Ok(()));
        mock.expect_get_accessories()
            .returning(move || Ok(fp2_database(zones)));
        (mock, tx)
    }

    fn current_values(ids: &[InstanceId]) -> Result<Vec<CharacteristicValue>> {
        Ok(ids
            .iter()
            .map(|id| CharacteristicValue {
                aid: id.aid,
                iid: id.iid,
                value: Some(match id.iid {
                    11 => json!(42.0),
                    5 => json!("54EF444A850F"),
                    131 => json!(1),
                    _ => json!(0),
                }),
                status: None,
            })
            .collect())
    }

    fn client(mock: MockAccessoryTransport, material: Option<PairingMaterial>) -> AccessoryClient {
        let config = ClientConfig {
            resubscribe_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        };
        AccessoryClient::new(
            record(material.is_none()),
            material,
            Box::new(mock),
            Arc::new(MemoryPairingStore::new()),
            config,
        )
    }

    mod connect {
        use super::*;

        #[tokio::test]
        async fn requires_material() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            let mut client = client(mock, None);

            assert!(matches!(client.connect().await, Err(Error::NotPaired)));
            assert_eq!(client.state(), ClientState::Disconnected);
        }

        #[tokio::test]
        async fn second_connect_uses_cached_map() {
            let (tx, rx) = mpsc::unbounded_channel::<TransportNotification>();
            drop(tx);
            let mut rx = Some(rx);
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(move || rx.take());
            mock.expect_open_session().times(1).returning(|_| Ok(()));
            mock.expect_get_accessories()
                .times(1)
                .returning(|| Ok(fp2_database(&[0, 1])));
            let mut client = client(mock, Some(material()));

            let first = client.connect().await.unwrap();
            let second = client.connect().await.unwrap();

            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(client.state(), ClientState::Connected);
        }

        #[tokio::test]
        async fn bad_database_closes_and_stays_disconnected() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            mock.expect_open_session().returning(|_| Ok(()));
            mock.expect_get_accessories().returning(|| {
                Ok(crate::capability::fixtures::database(vec![json!({
                    "iid": 100, "type": "86", "characteristics": [
                        {"iid": 102, "type": "C8622A33-826A-4DD3-9BE9-D496361F29BB", "value": "one", "perms": ["pr"]}
                    ]
                })]))
            });
            mock.expect_close().times(1).returning(|| Ok(()));
            let mut client = client(mock, Some(material()));

            assert!(client.connect().await.is_err());
            assert_eq!(client.state(), ClientState::Disconnected);
            assert!(client.capabilities().is_none());
        }

        #[tokio::test]
        async fn resolve_follows_connection() {
            let (mut mock, _tx) = transport(&[0, 4]);
            mock.expect_close().returning(|| Ok(()));
            let mut client = client(mock, Some(material()));

            let occupancy = |zone| {
                (service::OCCUPANCY_SENSOR, characteristic::OCCUPANCY_DETECTED, Some(zone))
            };
            let (s, c, d) = occupancy(4);
            assert_eq!(client.resolve(s, c, d), None);

            client.connect().await.unwrap();
            assert_eq!(client.resolve(s, c, d), Some(InstanceId::new(1, 141)));
            let (s, c, d) = occupancy(2);
            assert_eq!(client.resolve(s, c, d), None);

            client.disconnect().await.unwrap();
            let (s, c, d) = occupancy(4);
            assert_eq!(client.resolve(s, c, d), None);
        }

        #[tokio::test]
        async fn disconnect_is_a_noop_when_disconnected() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            mock.expect_close().times(0);
            let mut client = client(mock, Some(material()));

            client.disconnect().await.unwrap();
            client.disconnect().await.unwrap();
        }
    }

    mod subscribe {
        use super::*;

        #[tokio::test]
        async fn initial_values_then_single_subscribe() {
            let (mut mock, tx) = transport(&[0, 3]);
            let mut seq = Sequence::new();
            mock.expect_get_characteristics()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|ids| current_values(ids));
            mock.expect_subscribe_characteristics()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|ids| {
                    assert_eq!(
                        ids,
                        &[InstanceId::new(1, 11), InstanceId::new(1, 101), InstanceId::new(1, 131)]
                    );
                    Ok(())
                });
            let mut client = client(mock, Some(material()));
            let mut events = client.events();

            client.subscribe().await.unwrap();
            assert_eq!(client.state(), ClientState::Subscribed);

            assert_eq!(events.recv().await.unwrap(), DomainEvent::LightLevel { value: 42.0 });
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::ZoneOccupancy { zone: 0, present: false }
            );
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: true }
            );

            tx.send(TransportNotification::Event(vec![CharacteristicValue {
                aid: 1,
                iid: 131,
                value: Some(json!(0)),
                status: None,
            }]))
            .unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: false }
            );

            // Already subscribed
            client.subscribe().await.unwrap();
        }

        #[tokio::test]
        async fn drop_and_recovery_without_initial_events() {
            let (mut mock, tx) = transport(&[3]);
            mock.expect_get_characteristics()
                .times(1)
                .returning(|ids| current_values(ids));
            mock.expect_subscribe_characteristics()
                .times(2)
                .returning(|_| Ok(()));
            let mut client = client(mock, Some(material()));

            client.subscribe().await.unwrap();
            let mut events = client.events();

            tx.send(TransportNotification::Disconnected).unwrap();
            tx.send(TransportNotification::Event(vec![CharacteristicValue {
                aid: 1,
                iid: 131,
                value: Some(json!(1)),
                status: None,
            }]))
            .unwrap();

            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::Reachability { reachable: false }
            );
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::Reachability { reachable: true }
            );
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: true }
            );
        }

        #[tokio::test]
        async fn resubscribe_failures_reach_warnings() {
            let (mut mock, tx) = transport(&[0]);
            mock.expect_get_characteristics().returning(|ids| current_values(ids));
            let mut calls = 0;
            mock.expect_subscribe_characteristics().returning(move |_| {
                calls += 1;
                if calls == 2 {
                    Err(HttpError::ConnectionRefused.into())
                } else {
                    Ok(())
                }
            });
            let mut client = client(mock, Some(material()));
            let mut warnings = client.warnings();

            client.subscribe().await.unwrap();
            tx.send(TransportNotification::Disconnected).unwrap();

            assert!(matches!(
                warnings.recv().await.unwrap(),
                SessionWarning::ResubscribeFailed { .. }
            ));
        }

        #[tokio::test]
        async fn disconnect_stops_delivery() {
            let (mut mock, tx) = transport(&[0]);
            mock.expect_get_characteristics().returning(|ids| current_values(ids));
            mock.expect_subscribe_characteristics().times(1).returning(|_| Ok(()));
            mock.expect_close().times(1).returning(|| Ok(()));
            let mut client = client(mock, Some(material()));

            client.subscribe().await.unwrap();
            let mut events = client.events();
            client.disconnect().await.unwrap();
            assert_eq!(client.state(), ClientState::Disconnected);
            assert!(client.subscribed().is_empty());

            tx.send(TransportNotification::Event(vec![CharacteristicValue {
                aid: 1,
                iid: 101,
                value: Some(json!(1)),
                status: None,
            }]))
            .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(events.try_recv().is_err());

            client.disconnect().await.unwrap();
        }

        #[tokio::test]
        async fn retry_after_failed_subscribe_publishes_initial_values_once() {
            let (mut mock, _tx) = transport(&[3]);
            mock.expect_get_characteristics()
                .times(2)
                .returning(|ids| current_values(ids));
            let mut attempts = 0;
            mock.expect_subscribe_characteristics()
                .times(2)
                .returning(move |_| {
                    attempts += 1;
                    if attempts == 1 {
                        Err(HttpError::UnexpectedStatus(500).into())
                    } else {
                        Ok(())
                    }
                });
            let mut client = client(mock, Some(material()));
            let mut events = client.events();

            assert!(client.subscribe().await.is_err());
            assert!(events.try_recv().is_err());

            client.subscribe().await.unwrap();
            assert_eq!(events.try_recv().unwrap(), DomainEvent::LightLevel { value: 42.0 });
            assert_eq!(
                events.try_recv().unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: true }
            );
            assert!(events.try_recv().is_err());
        }

        #[tokio::test]
        async fn failed_subscribe_stays_connected() {
            let (mut mock, _tx) = transport(&[0]);
            mock.expect_get_characteristics().returning(|ids| current_values(ids));
            mock.expect_subscribe_characteristics()
                .times(2)
                .returning(|_| Err(HttpError::UnexpectedStatus(500).into()));
            let mut client = client(mock, Some(material()));

            assert!(client.subscribe().await.is_err());
            assert_eq!(client.state(), ClientState::Connected);

            // The notification receiver is kept for the retry
            assert!(client.subscribe().await.is_err());
        }
    }

    mod accessory_information {
        use super::*;

        #[tokio::test]
        async fn unpaired_identify_uses_plain_request() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            mock.expect_identify().times(1).returning(|| Ok(()));
            mock.expect_close().times(1).returning(|| Ok(()));
            let mut client = client(mock, None);

            client.identify().await.unwrap();
            assert_eq!(client.state(), ClientState::Disconnected);
        }

        #[tokio::test]
        async fn paired_identify_writes_characteristic() {
            let (mut mock, _tx) = transport(&[]);
            mock.expect_put_characteristics().times(1).returning(|writes| {
                assert_eq!(
                    writes,
                    &[CharacteristicWrite::value(InstanceId::new(1, 2), json!(true))]
                );
                Ok(())
            });
            let mut client = client(mock, Some(material()));

            client.identify().await.unwrap();
            assert_eq!(client.state(), ClientState::Connected);
        }

        #[tokio::test]
        async fn get_id_reads_serial_number() {
            let (mut mock, _tx) = transport(&[]);
            mock.expect_get_characteristics()
                .times(1)
                .returning(|ids| {
                    assert_eq!(ids, &[InstanceId::new(1, 5)]);
                    current_values(ids)
                });
            let mut client = client(mock, Some(material()));

            assert_eq!(client.get_id().await.unwrap(), "54EF444A850F");
        }

        #[tokio::test]
        async fn accessories_returns_database() {
            let (mock, _tx) = transport(&[0]);
            let mut client = client(mock, Some(material()));

            let db = client.accessories().await.unwrap();
            assert_eq!(db, fp2_database(&[0]));
        }
    }

    mod pairing {
        use super::*;
        use hap_core::DeviceId;
        use std::collections::BTreeMap;
        use std::sync::atomic::{AtomicBool, Ordering};

        #[tokio::test]
        async fn pair_keeps_material() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            mock.expect_pair_setup().returning(|_, _| Ok(material()));
            mock.expect_open_session().returning(|_| Ok(()));
            mock.expect_add_pairing().returning(|_, _| Ok(()));
            mock.expect_close().returning(|| Ok(()));
            let store = Arc::new(MemoryPairingStore::new());
            let mut client = AccessoryClient::new(
                record(true),
                None,
                Box::new(mock),
                store.clone(),
                ClientConfig::default(),
            );

            let paired = client.pair("314-15-926").await.unwrap();
            assert!(client.is_paired());
            assert!(!client.record().pairable());
            assert_eq!(client.state(), ClientState::Disconnected);
            assert_eq!(store.load(&client.record().id).unwrap(), Some(paired));
        }

        /// Store whose writes fail until `recover` is called.
        #[derive(Default)]
        struct FlakyStore {
            inner: MemoryPairingStore,
            healthy: AtomicBool,
        }

        impl FlakyStore {
            fn recover(&self) {
                self.healthy.store(true, Ordering::SeqCst);
            }
        }

        impl PairingStore for FlakyStore {
            fn load(&self, id: &DeviceId) -> Result<Option<PairingMaterial>> {
                self.inner.load(id)
            }

            fn load_all(&self) -> Result<BTreeMap<DeviceId, PairingMaterial>> {
                self.inner.load_all()
            }

            fn save(&self, id: &DeviceId, material: &PairingMaterial) -> Result<()> {
                if !self.healthy.load(Ordering::SeqCst) {
                    return Err(Error::Storage("disk full".to_string()));
                }
                self.inner.save(id, material)
            }

            fn remove(&self, id: &DeviceId) -> Result<bool> {
                self.inner.remove(id)
            }
        }

        #[tokio::test]
        async fn failed_save_keeps_material_for_retry() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            mock.expect_pair_setup().times(1).returning(|_, _| Ok(material()));
            mock.expect_open_session().returning(|_| Ok(()));
            mock.expect_add_pairing().times(1).returning(|_, _| Ok(()));
            mock.expect_close().returning(|| Ok(()));
            let store = Arc::new(FlakyStore::default());
            let mut client = AccessoryClient::new(
                record(true),
                None,
                Box::new(mock),
                store.clone(),
                ClientConfig::default(),
            );

            let err = client.pair("314-15-926").await.unwrap_err();
            assert!(matches!(err, Error::Storage(_)));
            assert!(client.is_paired());
            assert!(!client.record().pairable());
            assert!(store.load_all().unwrap().is_empty());

            store.recover();
            client.save_pairing().unwrap();
            let saved = store.load(&client.record().id).unwrap().unwrap();
            assert_eq!(saved.controller_pairing_id(), "ADMIN-ID");
            assert!(saved.guest().is_some());
        }

        #[tokio::test]
        async fn save_pairing_needs_material() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            let client = client(mock, None);

            assert!(matches!(client.save_pairing(), Err(Error::NotPaired)));
        }

        #[tokio::test]
        async fn pair_refused_when_not_pairable() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            let mut client = client(mock, Some(material()));

            assert!(matches!(client.pair("314-15-926").await, Err(Error::AlreadyPaired)));
        }

        #[tokio::test]
        async fn unpair_needs_a_session() {
            let mut mock = MockAccessoryTransport::new();
            mock.expect_notifications().returning(|| None);
            let mut client = client(mock, Some(material()));

            assert!(matches!(client.unpair().await, Err(Error::NotPaired)));
            assert!(client.is_paired());
        }

        #[tokio::test]
        async fn unpair_removes_own_pairing() {
            let (mut mock, _tx) = transport(&[0]);
            mock.expect_get_characteristics().returning(|ids| current_values(ids));
            mock.expect_subscribe_characteristics().returning(|_| Ok(()));
            mock.expect_remove_pairing().times(1).returning(|id| {
                assert_eq!(id, "ADMIN-ID");
                Ok(())
            });
            mock.expect_close().times(1).returning(|| Ok(()));
            let mut client = client(mock, Some(material()));

            client.subscribe().await.unwrap();
            client.unpair().await.unwrap();

            assert!(!client.is_paired());
            assert!(client.record().pairable());
            assert_eq!(client.state(), ClientState::Disconnected);
            assert!(matches!(client.connect().await, Err(Error::NotPaired)));
        }
    }
}
