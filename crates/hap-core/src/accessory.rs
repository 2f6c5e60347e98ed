//! Accessory attribute database as served by `GET /accessories`, plus the
//! bodies of `/characteristics` reads, writes and `EVENT` pushes.

use crate::error::ParseError;
use crate::uuids;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Address of a characteristic within an accessory's attribute database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub aid: u64,
    pub iid: u64,
}

impl InstanceId {
    pub const fn new(aid: u64, iid: u64) -> Self {
        Self { aid, iid }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.aid, self.iid)
    }
}

impl FromStr for InstanceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (aid, iid) = s
            .split_once('.')
            .ok_or_else(|| ParseError::InvalidFormat(format!("instance id: {}", s)))?;
        let parse = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| ParseError::InvalidValue(format!("instance id: {}", s)))
        };
        Ok(Self::new(parse(aid)?, parse(iid)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryDatabase {
    pub accessories: Vec<Accessory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    pub aid: u64,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub iid: u64,
    #[serde(rename = "type", with = "uuids::serde_hap")]
    pub service_type: Uuid,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub iid: u64,
    #[serde(rename = "type", with = "uuids::serde_hap")]
    pub char_type: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub perms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AccessoryDatabase {
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(body)
            .map_err(|e| ParseError::InvalidFormat(format!("accessory database: {}", e)))
    }

    /// First characteristic of the given type inside a service of the given type.
    pub fn find(&self, service_type: Uuid, char_type: Uuid) -> Option<(InstanceId, &Characteristic)> {
        self.accessories.iter().find_map(|accessory| {
            accessory
                .services
                .iter()
                .filter(|service| service.service_type == service_type)
                .find_map(|service| service.characteristic(char_type))
                .map(|c| (InstanceId::new(accessory.aid, c.iid), c))
        })
    }
}

impl Service {
    pub fn characteristic(&self, char_type: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.char_type == char_type)
    }
}

impl Characteristic {
    pub fn is_readable(&self) -> bool {
        self.perms.iter().any(|p| p == "pr")
    }

    pub fn supports_events(&self) -> bool {
        self.perms.iter().any(|p| p == "ev")
    }
}

/// One entry of a `/characteristics` read response or `EVENT` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicValue {
    pub aid: u64,
    pub iid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
}

impl CharacteristicValue {
    pub fn id(&self) -> InstanceId {
        InstanceId::new(self.aid, self.iid)
    }
}

/// One entry of a `PUT /characteristics` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicWrite {
    pub aid: u64,
    pub iid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev: Option<bool>,
}

impl CharacteristicWrite {
    pub fn value(id: InstanceId, value: Value) -> Self {
        Self {
            aid: id.aid,
            iid: id.iid,
            value: Some(value),
            ev: None,
        }
    }

    pub fn events(id: InstanceId, enabled: bool) -> Self {
        Self {
            aid: id.aid,
            iid: id.iid,
            value: None,
            ev: Some(enabled),
        }
    }
}

/// `{"characteristics": [...]}` wrapper shared by reads, writes and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristics<T> {
    pub characteristics: Vec<T>,
}
