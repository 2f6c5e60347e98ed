//! Turns characteristic notifications into domain events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hap_core::uuids::{characteristic, service};
use hap_core::{CharacteristicValue, InstanceId};
use hap_http::{AccessoryTransport, TransportNotification};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};

use crate::capability::CapabilityMap;
use crate::events::{DomainEvent, EventSender, SessionWarning, WarningSender};

/// Transport shared between the client and the notification listener.
pub type SharedTransport = Arc<Mutex<Box<dyn AccessoryTransport>>>;

/// How to read one subscribed characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    LightLevel,
    Occupancy { zone: u32 },
}

impl Decoder {
    /// Decode a raw value, `None` when it has the wrong shape.
    pub fn decode(&self, value: &Value) -> Option<DomainEvent> {
        match self {
            Decoder::LightLevel => value.as_f64().map(|value| DomainEvent::LightLevel { value }),
            Decoder::Occupancy { zone } => {
                let present = match value {
                    Value::Bool(b) => *b,
                    other => other.as_u64()? != 0,
                };
                Some(DomainEvent::ZoneOccupancy { zone: *zone, present })
            }
        }
    }
}

/// Subscribed instance ids and their decoders.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    decoders: HashMap<InstanceId, Decoder>,
    ids: Vec<InstanceId>,
}

impl SubscriptionTable {
    /// Subscribe to the light level and to every zone `0..zone_bound` that
    /// resolves. Zones can be sparse, so every index is probed.
    pub fn build(map: &CapabilityMap, zone_bound: u32) -> Self {
        let mut table = Self::default();

        if let Some(id) = map.resolve(
            service::LIGHT_SENSOR,
            characteristic::CURRENT_AMBIENT_LIGHT_LEVEL,
            None,
        ) {
            table.insert(id, Decoder::LightLevel);
        }

        for zone in 0..zone_bound {
            if let Some(id) = map.resolve(
                service::OCCUPANCY_SENSOR,
                characteristic::OCCUPANCY_DETECTED,
                Some(i64::from(zone)),
            ) {
                table.insert(id, Decoder::Occupancy { zone });
            }
        }

        debug!(entries = table.len(), "subscription table built");
        table
    }

    pub fn insert(&mut self, id: InstanceId, decoder: Decoder) {
        if self.decoders.insert(id, decoder).is_none() {
            self.ids.push(id);
        }
    }

    pub fn decoder(&self, id: &InstanceId) -> Option<Decoder> {
        self.decoders.get(id).copied()
    }

    /// Subscribed ids in insertion order.
    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Publishes decoded notifications and recovers the subscription after a drop.
pub struct EventDispatcher {
    table: Arc<SubscriptionTable>,
    transport: SharedTransport,
    events: EventSender,
    warnings: WarningSender,
    retry_interval: Duration,
}

impl EventDispatcher {
    pub fn new(
        table: Arc<SubscriptionTable>,
        transport: SharedTransport,
        events: EventSender,
        warnings: WarningSender,
        retry_interval: Duration,
    ) -> Self {
        Self {
            table,
            transport,
            events,
            warnings,
            retry_interval,
        }
    }

    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Emit one event per known characteristic, in order. Unknown ids are
    /// ignored.
    pub fn dispatch(&self, values: &[CharacteristicValue]) {
        for value in values {
            let id = value.id();
            let Some(decoder) = self.table.decoder(&id) else {
                trace!(%id, "ignoring unsubscribed characteristic");
                continue;
            };

            if let Some(status) = value.status.filter(|s| *s != 0) {
                self.warn(SessionWarning::CharacteristicStatus { id, status });
                continue;
            }
            let raw = value.value.as_ref().unwrap_or(&Value::Null);
            match decoder.decode(raw) {
                Some(event) => self.emit(event),
                None => self.warn(SessionWarning::UndecodableValue {
                    id,
                    value: raw.to_string(),
                }),
            }
        }
    }

    /// Listen until `shutdown` fires, then hand the receiver back.
    pub async fn run(
        self,
        mut notifications: UnboundedReceiver<TransportNotification>,
        mut shutdown: watch::Receiver<bool>,
    ) -> UnboundedReceiver<TransportNotification> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                notification = notifications.recv() => match notification {
                    Some(TransportNotification::Event(values)) => self.dispatch(&values),
                    Some(TransportNotification::Disconnected) => {
                        info!("session dropped, resubscribing");
                        self.emit(DomainEvent::Reachability { reachable: false });
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = self.resubscribe() => self.flush_recovered(&mut notifications),
                        }
                    }
                    None => {
                        warn!("notification channel closed");
                        self.warn(SessionWarning::NotificationsClosed);
                        break;
                    }
                },
            }
        }
        debug!("listener stopped");
        notifications
    }

    async fn resubscribe(&self) {
        loop {
            let result = {
                let mut transport = self.transport.lock().await;
                transport.subscribe_characteristics(self.table.ids()).await
            };
            match result {
                Ok(()) => {
                    info!(entries = self.table.len(), "resubscribed");
                    self.emit(DomainEvent::Reachability { reachable: true });
                    return;
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?self.retry_interval, "resubscribe failed");
                    self.warn(SessionWarning::ResubscribeFailed { error: e.to_string() });
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Deliver events queued during recovery. Drops queued by then belong
    /// to sessions the recovery already replaced.
    fn flush_recovered(&self, notifications: &mut UnboundedReceiver<TransportNotification>) {
        while let Ok(notification) = notifications.try_recv() {
            match notification {
                TransportNotification::Event(values) => self.dispatch(&values),
                TransportNotification::Disconnected => debug!("skipping drop reported during recovery"),
            }
        }
    }

    fn emit(&self, event: DomainEvent) {
        trace!(?event, "domain event");
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn warn(&self, warning: SessionWarning) {
        let _ = self.warnings.send(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fixtures::fp2_database;
    use crate::events::{event_channel, warning_channel};
    use hap_core::error::HttpError;
    use hap_http::MockAccessoryTransport;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::mpsc;

    fn value(iid: u64, value: Value) -> CharacteristicValue {
        CharacteristicValue {
            aid: 1,
            iid,
            value: Some(value),
            status: None,
        }
    }

    fn zone_table(zones: &[i64]) -> SubscriptionTable {
        let map = CapabilityMap::build(&fp2_database(zones)).unwrap();
        SubscriptionTable::build(&map, 30)
    }

    fn dispatcher(
        transport: MockAccessoryTransport,
        table: SubscriptionTable,
    ) -> (
        EventDispatcher,
        crate::events::EventReceiver,
        crate::events::WarningReceiver,
    ) {
        let (events, events_rx) = event_channel(64);
        let (warnings, warnings_rx) = warning_channel(64);
        let transport: Box<dyn AccessoryTransport> = Box::new(transport);
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let dispatcher = EventDispatcher::new(
            Arc::new(table),
            transport,
            events,
            warnings,
            Duration::from_millis(10),
        );
        (dispatcher, events_rx, warnings_rx)
    }

    mod decoder {
        use super::*;

        #[test]
        fn light_level_reads_numbers() {
            assert_eq!(
                Decoder::LightLevel.decode(&json!(12)),
                Some(DomainEvent::LightLevel { value: 12.0 })
            );
            assert_eq!(Decoder::LightLevel.decode(&json!("bright")), None);
        }

        #[test]
        fn occupancy_reads_integers_and_bools() {
            let decoder = Decoder::Occupancy { zone: 4 };
            assert_eq!(
                decoder.decode(&json!(1)),
                Some(DomainEvent::ZoneOccupancy { zone: 4, present: true })
            );
            assert_eq!(
                decoder.decode(&json!(false)),
                Some(DomainEvent::ZoneOccupancy { zone: 4, present: false })
            );
            assert_eq!(decoder.decode(&Value::Null), None);
        }
    }

    mod subscription_table {
        use super::*;

        #[test]
        fn probes_every_zone_up_to_bound() {
            let table = zone_table(&[0, 2, 5, 29]);

            assert_eq!(table.len(), 5);
            assert_eq!(table.ids()[0], InstanceId::new(1, 11));
            assert_eq!(table.decoder(&InstanceId::new(1, 11)), Some(Decoder::LightLevel));
            assert_eq!(
                table.decoder(&InstanceId::new(1, 151)),
                Some(Decoder::Occupancy { zone: 5 })
            );
            assert_eq!(
                table.decoder(&InstanceId::new(1, 391)),
                Some(Decoder::Occupancy { zone: 29 })
            );
        }

        #[test]
        fn zones_beyond_bound_are_skipped() {
            let map = CapabilityMap::build(&fp2_database(&[0, 3])).unwrap();
            let table = SubscriptionTable::build(&map, 2);
            assert_eq!(table.len(), 2);
            assert!(table.decoder(&InstanceId::new(1, 131)).is_none());
        }

        #[test]
        fn insert_ignores_duplicates() {
            let mut table = SubscriptionTable::default();
            table.insert(InstanceId::new(1, 11), Decoder::LightLevel);
            table.insert(InstanceId::new(1, 11), Decoder::LightLevel);
            assert_eq!(table.ids(), &[InstanceId::new(1, 11)]);
        }
    }

    mod dispatch {
        use super::*;

        #[test]
        fn zone_notification_becomes_occupancy_event() {
            let (dispatcher, mut events, _) = dispatcher(MockAccessoryTransport::new(), zone_table(&[0, 3]));

            dispatcher.dispatch(&[value(131, json!(1))]);

            assert_eq!(
                events.try_recv().unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: true }
            );
            assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        }

        #[test]
        fn batch_keeps_order_and_skips_unknown_ids() {
            let (dispatcher, mut events, mut warnings) =
                dispatcher(MockAccessoryTransport::new(), zone_table(&[0]));

            dispatcher.dispatch(&[
                value(101, json!(1)),
                value(999, json!(1)),
                value(11, json!(7.5)),
            ]);

            assert_eq!(
                events.try_recv().unwrap(),
                DomainEvent::ZoneOccupancy { zone: 0, present: true }
            );
            assert_eq!(events.try_recv().unwrap(), DomainEvent::LightLevel { value: 7.5 });
            assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
            assert!(matches!(warnings.try_recv(), Err(TryRecvError::Empty)));
        }

        #[test]
        fn bad_values_become_warnings() {
            let (dispatcher, mut events, mut warnings) =
                dispatcher(MockAccessoryTransport::new(), zone_table(&[0]));

            let failed = CharacteristicValue {
                aid: 1,
                iid: 11,
                value: None,
                status: Some(-70402),
            };
            dispatcher.dispatch(&[failed, value(101, json!("yes"))]);

            assert_eq!(
                warnings.try_recv().unwrap(),
                SessionWarning::CharacteristicStatus {
                    id: InstanceId::new(1, 11),
                    status: -70402
                }
            );
            assert!(matches!(
                warnings.try_recv().unwrap(),
                SessionWarning::UndecodableValue { .. }
            ));
            assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    mod listener {
        use super::*;

        #[tokio::test]
        async fn disconnect_marks_unreachable_then_resubscribes() {
            let mut transport = MockAccessoryTransport::new();
            transport
                .expect_subscribe_characteristics()
                .times(1)
                .returning(|ids| {
                    assert_eq!(ids.len(), 2);
                    Ok(())
                });
            let (dispatcher, mut events, _) = dispatcher(transport, zone_table(&[3]));

            let (tx, rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let listener = tokio::spawn(dispatcher.run(rx, shutdown_rx));

            tx.send(TransportNotification::Disconnected).unwrap();
            tx.send(TransportNotification::Event(vec![value(131, json!(1))])).unwrap();

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

            shutdown_tx.send(true).unwrap();
            listener.await.unwrap();
        }

        #[tokio::test]
        async fn failed_resubscribe_is_a_warning_and_retried() {
            let mut transport = MockAccessoryTransport::new();
            let mut attempts = 0;
            transport
                .expect_subscribe_characteristics()
                .times(2)
                .returning(move |_| {
                    attempts += 1;
                    if attempts == 1 {
                        Err(HttpError::ConnectionRefused.into())
                    } else {
                        Ok(())
                    }
                });
            let (dispatcher, mut events, mut warnings) = dispatcher(transport, zone_table(&[0]));

            let (tx, rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let listener = tokio::spawn(dispatcher.run(rx, shutdown_rx));
            tx.send(TransportNotification::Disconnected).unwrap();

            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::Reachability { reachable: false }
            );
            assert!(matches!(
                warnings.recv().await.unwrap(),
                SessionWarning::ResubscribeFailed { .. }
            ));
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::Reachability { reachable: true }
            );

            shutdown_tx.send(true).unwrap();
            listener.await.unwrap();
        }

        #[tokio::test]
        async fn drop_queued_by_failed_resubscribe_is_one_outage() {
            let (tx, rx) = mpsc::unbounded_channel();
            let abandoned = tx.clone();
            let mut transport = MockAccessoryTransport::new();
            let mut attempts = 0;
            transport
                .expect_subscribe_characteristics()
                .times(2)
                .returning(move |_| {
                    attempts += 1;
                    if attempts == 1 {
                        // A timed out request drops the new session too
                        abandoned.send(TransportNotification::Disconnected).unwrap();
                        Err(hap_core::Error::Timeout)
                    } else {
                        Ok(())
                    }
                });
            let (dispatcher, mut events, _) = dispatcher(transport, zone_table(&[3]));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let listener = tokio::spawn(dispatcher.run(rx, shutdown_rx));
            tx.send(TransportNotification::Disconnected).unwrap();
            tx.send(TransportNotification::Event(vec![value(131, json!(1))])).unwrap();

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

            tx.send(TransportNotification::Event(vec![value(131, json!(0))])).unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::ZoneOccupancy { zone: 3, present: false }
            );

            shutdown_tx.send(true).unwrap();
            listener.await.unwrap();
        }

        #[tokio::test]
        async fn shutdown_wins_over_pending_resubscribe() {
            let mut transport = MockAccessoryTransport::new();
            transport
                .expect_subscribe_characteristics()
                .returning(|_| Err(HttpError::ConnectionRefused.into()));
            let (dispatcher, mut events, _) = dispatcher(transport, zone_table(&[0]));

            let (tx, rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let listener = tokio::spawn(dispatcher.run(rx, shutdown_rx));
            tx.send(TransportNotification::Disconnected).unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                DomainEvent::Reachability { reachable: false }
            );

            shutdown_tx.send(true).unwrap();
            let mut rx = listener.await.unwrap();

            // The receiver comes back for the next subscription
            tx.send(TransportNotification::Disconnected).unwrap();
            assert_eq!(rx.recv().await, Some(TransportNotification::Disconnected));
        }

        #[tokio::test]
        async fn closed_channel_stops_listener() {
            let (dispatcher, _, mut warnings) =
                dispatcher(MockAccessoryTransport::new(), zone_table(&[0]));

            let (tx, rx) = mpsc::unbounded_channel();
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            drop(tx);

            dispatcher.run(rx, shutdown_rx).await;
            assert_eq!(warnings.recv().await.unwrap(), SessionWarning::NotificationsClosed);
        }
    }
}
