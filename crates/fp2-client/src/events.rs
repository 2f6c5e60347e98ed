//! Events published by the session engine.
//!
//! Each kind travels on its own `tokio::sync::broadcast` channel. Observers
//! register with `AccessoryClient::events()`, `warnings()` or
//! `Fp2Discovery::subscribe()` before starting the operation they watch.

use hap_core::{DeviceRecord, InstanceId};
use serde::Serialize;

/// Normalized reading decoded from a characteristic change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    /// Ambient light level in lux.
    LightLevel { value: f64 },
    /// Presence in one detection zone.
    ZoneOccupancy { zone: u32, present: bool },
    /// Session to the accessory lost or restored.
    Reachability { reachable: bool },
}

/// Recoverable problem on a subscribed session, never returned as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionWarning {
    /// Re-enabling notifications after a drop failed; the dispatcher retries.
    ResubscribeFailed { error: String },
    /// A subscribed characteristic carried a value its decoder cannot read.
    UndecodableValue { id: InstanceId, value: String },
    /// A subscribed characteristic reported a HAP status instead of a value.
    CharacteristicStatus { id: InstanceId, status: i64 },
    /// The transport stopped delivering notifications.
    NotificationsClosed,
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionWarning::ResubscribeFailed { error } => write!(f, "resubscribe failed: {}", error),
            SessionWarning::UndecodableValue { id, value } => {
                write!(f, "{}: cannot decode value {}", id, value)
            }
            SessionWarning::CharacteristicStatus { id, status } => {
                write!(f, "{}: HAP status {}", id, status)
            }
            SessionWarning::NotificationsClosed => f.write_str("notification channel closed"),
        }
    }
}

/// Progress of a discovery sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A sweep started, optionally looking for one device.
    Search(Option<String>),
    /// An FP2 announced itself.
    Alive(DeviceRecord),
    /// The sweep ended and the browser was stopped.
    SearchDone,
}

/// Type alias for the domain event sender.
pub type EventSender = tokio::sync::broadcast::Sender<DomainEvent>;

/// Type alias for the domain event receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<DomainEvent>;

pub type WarningSender = tokio::sync::broadcast::Sender<SessionWarning>;
pub type WarningReceiver = tokio::sync::broadcast::Receiver<SessionWarning>;

pub type DiscoverySender = tokio::sync::broadcast::Sender<DiscoveryEvent>;
pub type DiscoveryReceiver = tokio::sync::broadcast::Receiver<DiscoveryEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

/// Create a new warning channel with the given capacity.
pub fn warning_channel(capacity: usize) -> (WarningSender, WarningReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
