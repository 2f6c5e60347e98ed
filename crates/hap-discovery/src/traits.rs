//! Trait definitions for service discovery (enables mocking in tests).

use futures::stream::BoxStream;
use hap_core::{DeviceRecord, Result};

/// Event emitted while browsing.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowseEvent {
    /// A service was resolved, or re-announced with new data.
    Seen(DeviceRecord),
    /// A service went away; carries its instance name.
    Removed(String),
}

impl BrowseEvent {
    /// Get the record of a `Seen` event.
    pub fn record(&self) -> Option<&DeviceRecord> {
        match self {
            BrowseEvent::Seen(record) => Some(record),
            BrowseEvent::Removed(_) => None,
        }
    }

    /// Instance name from any event.
    pub fn name(&self) -> &str {
        match self {
            BrowseEvent::Seen(record) => &record.name,
            BrowseEvent::Removed(name) => name,
        }
    }
}

/// Source of HAP service announcements.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ServiceSource: Send + Sync {
    /// Start browsing. The stream ends once `stop` is called.
    fn start(&self) -> Result<BoxStream<'static, BrowseEvent>>;

    /// Stop browsing. Safe to call when not started.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use hap_core::{DeviceId, FeatureFlags, StatusFlags};
    use std::net::{IpAddr, Ipv4Addr};

    fn make_test_record(id: [u8; 6], name: &str) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId(id),
            name: name.to_string(),
            model: "PS-S02D".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100))],
            port: 52000,
            status_flags: StatusFlags(1),
            feature_flags: FeatureFlags(0),
            config_number: 1,
            category: 10,
            protocol_version: None,
            state_number: 1,
        }
    }

    mod browse_event {
        use super::*;

        #[test]
        fn seen_event_contains_record() {
            let event = BrowseEvent::Seen(make_test_record([0xAA; 6], "FP2 Kitchen"));
            assert_eq!(event.record().unwrap().id, DeviceId([0xAA; 6]));
            assert_eq!(event.name(), "FP2 Kitchen");
        }

        #[test]
        fn removed_event_contains_name() {
            let event = BrowseEvent::Removed("FP2 Kitchen".to_string());
            assert!(event.record().is_none());
            assert_eq!(event.name(), "FP2 Kitchen");
        }
    }

    mod mock_source {
        use super::*;

        #[tokio::test]
        async fn mock_start_yields_configured_events() {
            let mut mock = MockServiceSource::new();
            let record = make_test_record([0x11; 6], "FP2 Hall");

            mock.expect_start().returning(move || {
                let events = vec![
                    BrowseEvent::Seen(record.clone()),
                    BrowseEvent::Removed(record.name.clone()),
                ];
                Ok(futures::stream::iter(events).boxed())
            });
            mock.expect_stop().times(1).return_const(());

            let events: Vec<_> = mock.start().unwrap().collect().await;
            mock.stop();

            assert_eq!(events.len(), 2);
            assert_eq!(events[1], BrowseEvent::Removed("FP2 Hall".to_string()));
        }
    }
}
