//! Finding FP2 sensors on the local network.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::StreamExt;
use hap_core::{DeviceId, DeviceRecord, DiscoveryError, Result};
use hap_discovery::{BrowseEvent, ServiceBrowser, ServiceSource};
use tracing::{debug, info};

use crate::events::{DiscoveryEvent, DiscoveryReceiver, DiscoverySender};

/// Discovery restricted to FP2 models.
pub struct Fp2Discovery<S: ServiceSource> {
    source: S,
    events: DiscoverySender,
}

impl Fp2Discovery<ServiceBrowser> {
    /// Browse with the system mDNS daemon.
    pub fn browser() -> Result<Self> {
        Ok(Self::new(ServiceBrowser::new()?))
    }
}

impl<S: ServiceSource> Fp2Discovery<S> {
    pub fn new(source: S) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(64);
        Self { source, events }
    }

    /// Observe sweeps. Register before calling `find` or `search`.
    pub fn subscribe(&self) -> DiscoveryReceiver {
        self.events.subscribe()
    }

    /// Wait for the FP2 whose device id or instance name is `query`.
    pub async fn find(&self, query: &str, timeout: Duration) -> Result<DeviceRecord> {
        let wanted = query.parse::<DeviceId>().ok();
        let mut stream = self.source.start()?;
        let _sweep = Sweep::begin(&self.source, &self.events, Some(query));

        let found = tokio::time::timeout(timeout, async {
            while let Some(event) = stream.next().await {
                let Some(record) = self.accept(event) else {
                    continue;
                };
                let matched = match wanted {
                    Some(id) => record.id == id,
                    None => record.name.eq_ignore_ascii_case(query),
                };
                if matched {
                    return Some(record);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(record)) => {
                info!(device = %record.id, name = %record.name, "found");
                Ok(record)
            }
            _ => Err(DiscoveryError::DeviceNotFound(query.to_string()).into()),
        }
    }

    /// Collect every FP2 seen within `timeout`. A device announced twice
    /// keeps its latest record.
    pub async fn search(&self, timeout: Duration) -> Result<BTreeMap<DeviceId, DeviceRecord>> {
        let mut stream = self.source.start()?;
        let _sweep = Sweep::begin(&self.source, &self.events, None);

        let mut found = BTreeMap::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = stream.next() => match event {
                    Some(event) => {
                        if let Some(record) = self.accept(event) {
                            found.insert(record.id, record);
                        }
                    }
                    None => break,
                },
            }
        }

        info!(count = found.len(), "search finished");
        Ok(found)
    }

    /// The record of an FP2 announcement, published as `Alive`.
    fn accept(&self, event: BrowseEvent) -> Option<DeviceRecord> {
        match event {
            BrowseEvent::Seen(record) if record.is_fp2() => {
                debug!(device = %record.id, name = %record.name, pairable = record.pairable(), "alive");
                let _ = self.events.send(DiscoveryEvent::Alive(record.clone()));
                Some(record)
            }
            BrowseEvent::Seen(record) => {
                debug!(name = %record.name, model = %record.model, "ignoring non-FP2 accessory");
                None
            }
            BrowseEvent::Removed(name) => {
                debug!(%name, "service removed");
                None
            }
        }
    }
}

/// Stops the source and reports `SearchDone` however the sweep ends.
struct Sweep<'a, S: ServiceSource> {
    source: &'a S,
    events: &'a DiscoverySender,
}

impl<'a, S: ServiceSource> Sweep<'a, S> {
    fn begin(source: &'a S, events: &'a DiscoverySender, query: Option<&str>) -> Self {
        debug!(query, "search started");
        let _ = events.send(DiscoveryEvent::Search(query.map(str::to_string)));
        Self { source, events }
    }
}

impl<S: ServiceSource> Drop for Sweep<'_, S> {
    fn drop(&mut self) {
        self.source.stop();
        let _ = self.events.send(DiscoveryEvent::SearchDone);
        debug!("search done");
    }
}
