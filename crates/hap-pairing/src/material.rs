//! Long-term pairing material.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::controller::ControllerIdentity;

/// Everything needed to re-open a session without repeating pair-setup.
///
/// Serialized with hex-encoded keys so a store can persist it as an
/// opaque JSON value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingMaterial {
    #[serde(rename = "AccessoryPairingID")]
    accessory_pairing_id: String,
    #[serde(rename = "AccessoryLTPK", with = "hex_key")]
    accessory_ltpk: [u8; 32],
    #[serde(rename = "iOSDevicePairingID")]
    controller_pairing_id: String,
    #[serde(rename = "iOSDeviceLTSK", with = "hex_key")]
    controller_ltsk: [u8; 32],
    #[serde(rename = "iOSDeviceLTPK", with = "hex_key")]
    controller_ltpk: [u8; 32],
    /// Secondary non-admin controller registered after pair-setup.
    #[serde(rename = "guest", default, skip_serializing_if = "Option::is_none")]
    guest: Option<GuestController>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
struct GuestController {
    #[serde(rename = "PairingID")]
    pairing_id: String,
    #[serde(rename = "LTSK", with = "hex_key")]
    ltsk: [u8; 32],
    #[serde(rename = "LTPK", with = "hex_key")]
    ltpk: [u8; 32],
}

impl PairingMaterial {
    pub fn new(
        accessory_pairing_id: impl Into<String>,
        accessory_ltpk: [u8; 32],
        controller: &ControllerIdentity,
    ) -> Self {
        Self {
            accessory_pairing_id: accessory_pairing_id.into(),
            accessory_ltpk,
            controller_pairing_id: controller.id().to_string(),
            controller_ltsk: controller.keypair().seed(),
            controller_ltpk: controller.public_key(),
            guest: None,
        }
    }

    /// Record the secondary controller registered with `/pairings`.
    pub fn with_guest(mut self, guest: &ControllerIdentity) -> Self {
        self.guest = Some(GuestController {
            pairing_id: guest.id().to_string(),
            ltsk: guest.keypair().seed(),
            ltpk: guest.public_key(),
        });
        self
    }

    pub fn accessory_pairing_id(&self) -> &str {
        &self.accessory_pairing_id
    }

    pub fn accessory_ltpk(&self) -> &[u8; 32] {
        &self.accessory_ltpk
    }

    pub fn controller_pairing_id(&self) -> &str {
        &self.controller_pairing_id
    }

    /// The admin controller that ran pair-setup.
    pub fn controller(&self) -> ControllerIdentity {
        ControllerIdentity::from_seed(&self.controller_pairing_id, &self.controller_ltsk)
    }

    pub fn guest(&self) -> Option<ControllerIdentity> {
        self.guest
            .as_ref()
            .map(|g| ControllerIdentity::from_seed(&g.pairing_id, &g.ltsk))
    }
}

impl fmt::Debug for PairingMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingMaterial")
            .field("accessory_pairing_id", &self.accessory_pairing_id)
            .field("controller_pairing_id", &self.controller_pairing_id)
            .field("guest", &self.guest.as_ref().map(|g| &g.pairing_id))
            .finish_non_exhaustive()
    }
}

impl Drop for PairingMaterial {
    fn drop(&mut self) {
        self.controller_ltsk.zeroize();
        if let Some(guest) = self.guest.as_mut() {
            guest.ltsk.zeroize();
        }
    }
}

mod hex_key {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        // tweetnacl-style 64-byte secret keys carry the seed in the first half
        match bytes.len() {
            32 | 64 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes[..32]);
                Ok(key)
            }
            n => Err(D::Error::custom(format!("expected 32-byte key, got {} bytes", n))),
        }
    }
}
