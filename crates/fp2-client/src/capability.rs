//! Lookup table from capability keys to instance ids.
//!
//! Built once per connection from `GET /accessories`. Services whose type can
//! appear several times are told apart by a discriminator characteristic
//! whose value is read from the same database.

use std::collections::HashMap;

use hap_core::error::{ParseError, Result};
use hap_core::uuids::{characteristic, service};
use hap_core::{AccessoryDatabase, InstanceId};
use tracing::{debug, warn};
use uuid::Uuid;

/// Service types that come in indexed instances, with the characteristic
/// holding the index.
pub const MULTI_INSTANCE: &[(Uuid, Uuid)] =
    &[(service::OCCUPANCY_SENSOR, characteristic::AQARA_INDEX)];

/// `(service type, discriminator)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityKey {
    pub service_type: Uuid,
    pub discriminator: Option<i64>,
}

impl CapabilityKey {
    pub fn new(service_type: Uuid, discriminator: Option<i64>) -> Self {
        Self {
            service_type,
            discriminator,
        }
    }
}

/// One mapped service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntry {
    pub service_id: InstanceId,
    pub characteristics: HashMap<Uuid, InstanceId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityMap {
    entries: HashMap<CapabilityKey, ServiceEntry>,
}

impl CapabilityMap {
    /// Build the map from an accessory database.
    ///
    /// When two services map to the same key the first one wins. A
    /// discriminator that is not an integer fails the whole build.
    pub fn build(db: &AccessoryDatabase) -> Result<Self> {
        let mut entries: HashMap<CapabilityKey, ServiceEntry> = HashMap::new();

        for accessory in &db.accessories {
            for svc in &accessory.services {
                let discriminator = match discriminator_type(svc.service_type) {
                    Some(index_type) => match svc.characteristic(index_type) {
                        Some(index) => Some(
                            index
                                .value
                                .as_ref()
                                .and_then(|v| v.as_i64())
                                .ok_or_else(|| {
                                    ParseError::InvalidValue(format!(
                                        "discriminator {}.{} is not an integer: {:?}",
                                        accessory.aid, index.iid, index.value
                                    ))
                                })?,
                        ),
                        None => None,
                    },
                    None => None,
                };

                let key = CapabilityKey::new(svc.service_type, discriminator);
                let entry = ServiceEntry {
                    service_id: InstanceId::new(accessory.aid, svc.iid),
                    characteristics: svc
                        .characteristics
                        .iter()
                        .map(|c| (c.char_type, InstanceId::new(accessory.aid, c.iid)))
                        .collect(),
                };

                if let Some(existing) = entries.get(&key) {
                    warn!(
                        service_type = %key.service_type,
                        discriminator = ?key.discriminator,
                        kept = %existing.service_id,
                        ignored = %entry.service_id,
                        "duplicate capability key"
                    );
                    continue;
                }
                entries.insert(key, entry);
            }
        }

        debug!(services = entries.len(), "capability map built");
        Ok(Self { entries })
    }

    /// Instance id of a characteristic, or `None` when the device lacks it.
    pub fn resolve(
        &self,
        service_type: Uuid,
        char_type: Uuid,
        discriminator: Option<i64>,
    ) -> Option<InstanceId> {
        self.entries
            .get(&CapabilityKey::new(service_type, discriminator))?
            .characteristics
            .get(&char_type)
            .copied()
    }

    pub fn service(&self, key: &CapabilityKey) -> Option<&ServiceEntry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CapabilityKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn discriminator_type(service_type: Uuid) -> Option<Uuid> {
    MULTI_INSTANCE
        .iter()
        .find(|(svc, _)| *svc == service_type)
        .map(|(_, index)| *index)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::net::{IpAddr, Ipv4Addr};

    use hap_core::{AccessoryDatabase, DeviceId, DeviceRecord, FeatureFlags, StatusFlags};
    use serde_json::{json, Value};

    pub fn record(pairable: bool) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId([0x58, 0x55, 0xCA, 0x1A, 0xE2, 0x88]),
            name: "Presence-Sensor-FP2-1A2B".to_string(),
            model: "PS-S02D".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))],
            port: 52000,
            status_flags: StatusFlags(u8::from(pairable)),
            feature_flags: FeatureFlags::default(),
            config_number: 1,
            category: 10,
            protocol_version: Some("1.1".to_string()),
            state_number: 1,
        }
    }

    /// Accessory information, a light sensor and occupancy zones with the
    /// given indices. Zone `k` gets service iid `100 + 10k`, occupancy
    /// characteristic `101 + 10k` and index characteristic `102 + 10k`.
    pub fn fp2_database(zones: &[i64]) -> AccessoryDatabase {
        let mut services = vec![
            json!({"iid": 1, "type": "3E", "characteristics": [
                {"iid": 2, "type": "14", "perms": ["pw"], "format": "bool"},
                {"iid": 3, "type": "20", "value": "Aqara", "perms": ["pr"], "format": "string"},
                {"iid": 4, "type": "21", "value": "PS-S02D", "perms": ["pr"], "format": "string"},
                {"iid": 5, "type": "30", "value": "54EF444A850F", "perms": ["pr"], "format": "string"}
            ]}),
            json!({"iid": 10, "type": "84", "characteristics": [
                {"iid": 11, "type": "6B", "value": 42.0, "perms": ["pr", "ev"], "format": "float"}
            ]}),
        ];
        for zone in zones {
            let base = 100 + 10 * zone;
            services.push(json!({"iid": base, "type": "86", "characteristics": [
                {"iid": base + 1, "type": "71", "value": 0, "perms": ["pr", "ev"], "format": "uint8"},
                {"iid": base + 2, "type": "C8622A33-826A-4DD3-9BE9-D496361F29BB", "value": zone, "perms": ["pr"], "format": "uint8"}
            ]}));
        }
        database(services)
    }

    pub fn database(services: Vec<Value>) -> AccessoryDatabase {
        let body = json!({"accessories": [{"aid": 1, "services": services}]});
        AccessoryDatabase::from_json(body.to_string().as_bytes()).unwrap()
    }
}
