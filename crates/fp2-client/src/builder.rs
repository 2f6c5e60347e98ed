//! Client configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use hap_core::{DeviceRecord, DiscoveryError, Result};
use hap_http::{AccessoryTransport, HttpTransport, TransportConfig};
use hap_pairing::PairingMaterial;

use crate::client::AccessoryClient;
use crate::store::{MemoryPairingStore, PairingStore};

/// Discovery timeout bounds, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Highest zone index probed is `DEFAULT_ZONE_BOUND - 1`.
pub const DEFAULT_ZONE_BOUND: u32 = 30;

/// Runtime settings for discovery and sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub discovery_timeout: Duration,
    /// Zones `0..zone_bound` are probed on subscribe.
    pub zone_bound: u32,
    /// Delay between resubscribe attempts after a dropped session.
    pub resubscribe_interval: Duration,
    /// Capacity of the event and warning broadcast channels.
    pub event_capacity: usize,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            zone_bound: DEFAULT_ZONE_BOUND,
            resubscribe_interval: Duration::from_secs(5),
            event_capacity: 256,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Set the discovery timeout, clamped to 1-60 seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.discovery_timeout = clamp_timeout(secs);
        self
    }
}

pub fn clamp_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
}

/// Builder for `AccessoryClient`.
pub struct ClientBuilder {
    record: DeviceRecord,
    config: ClientConfig,
    material: Option<PairingMaterial>,
    store: Option<Arc<dyn PairingStore>>,
    transport: Option<Box<dyn AccessoryTransport>>,
}

impl ClientBuilder {
    pub fn new(record: DeviceRecord) -> Self {
        Self {
            record,
            config: ClientConfig::default(),
            material: None,
            store: None,
            transport: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn zone_bound(mut self, bound: u32) -> Self {
        self.config.zone_bound = bound;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config = self.config.with_timeout_secs(secs);
        self
    }

    /// Material from a previous pairing. Takes precedence over the store.
    pub fn pairing_material(mut self, material: PairingMaterial) -> Self {
        self.material = Some(material);
        self
    }

    /// Where `pair` saves and `unpair` removes material. In-memory by default.
    pub fn store(mut self, store: Arc<dyn PairingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this transport instead of connecting to the record's address.
    pub fn transport(mut self, transport: Box<dyn AccessoryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<AccessoryClient> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPairingStore::new()));
        let material = match self.material {
            Some(material) => Some(material),
            None => store.load(&self.record.id)?,
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let addr = self.record.socket_addr().ok_or_else(|| {
                    DiscoveryError::Resolution(format!("{} has no address", self.record.name))
                })?;
                Box::new(HttpTransport::new(addr, self.config.transport))
            }
        };

        Ok(AccessoryClient::new(
            self.record,
            material,
            transport,
            store,
            self.config,
        ))
    }
}
