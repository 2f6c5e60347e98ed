//! HAP service and characteristic type UUIDs.
//!
//! Apple-defined types share the base `xxxxxxxx-0000-1000-8000-0026BB765291`
//! and are usually sent in short form ("86" for the occupancy sensor).
//! Vendor types are full 128-bit UUIDs.

use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serializer};
use uuid::Uuid;

const BASE_TAIL: [u8; 8] = [0x80, 0x00, 0x00, 0x26, 0xBB, 0x76, 0x52, 0x91];

/// Expand a short Apple-defined type to its full UUID.
pub const fn apple(short: u32) -> Uuid {
    Uuid::from_fields(short, 0x0000, 0x1000, &BASE_TAIL)
}

/// Parse a HAP type in short ("6B", "0000006B") or full form.
pub fn parse(s: &str) -> Result<Uuid, ParseError> {
    let s = s.trim();
    if s.contains('-') {
        return Uuid::parse_str(s).map_err(|_| ParseError::InvalidValue(format!("uuid: {}", s)));
    }
    if s.is_empty() || s.len() > 8 {
        return Err(ParseError::InvalidFormat(format!("short uuid: {}", s)));
    }
    u32::from_str_radix(s, 16)
        .map(apple)
        .map_err(|_| ParseError::InvalidHex(s.to_string()))
}

/// Short form for Apple-defined types, full uppercase form otherwise.
pub fn short_form(uuid: &Uuid) -> String {
    let (d1, d2, d3, d4) = uuid.as_fields();
    if d2 == 0x0000 && d3 == 0x1000 && *d4 == BASE_TAIL {
        format!("{:X}", d1)
    } else {
        uuid.hyphenated().to_string().to_uppercase()
    }
}

/// Serde adapter for `type` fields in accessory JSON.
pub mod serde_hap {
    use super::*;

    pub fn serialize<S: Serializer>(uuid: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&uuid.hyphenated().to_string().to_uppercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

pub mod service {
    use super::apple;
    use uuid::{uuid, Uuid};

    pub const ACCESSORY_INFORMATION: Uuid = apple(0x3E);
    pub const PROTOCOL_INFORMATION: Uuid = apple(0xA2);
    pub const LIGHT_SENSOR: Uuid = apple(0x84);
    pub const OCCUPANCY_SENSOR: Uuid = apple(0x86);

    /// Aqara vendor service carrying firmware details.
    pub const AQARA: Uuid = uuid!("34AB8811-AC7F-4340-BAC3-FD6A85F9943B");
}

pub mod characteristic {
    use super::apple;
    use uuid::{uuid, Uuid};

    pub const IDENTIFY: Uuid = apple(0x14);
    pub const MANUFACTURER: Uuid = apple(0x20);
    pub const MODEL: Uuid = apple(0x21);
    pub const NAME: Uuid = apple(0x23);
    pub const SERIAL_NUMBER: Uuid = apple(0x30);
    pub const VERSION: Uuid = apple(0x37);
    pub const FIRMWARE_REVISION: Uuid = apple(0x52);
    pub const HARDWARE_REVISION: Uuid = apple(0x53);
    pub const CURRENT_AMBIENT_LIGHT_LEVEL: Uuid = apple(0x6B);
    pub const OCCUPANCY_DETECTED: Uuid = apple(0x71);
    pub const PRODUCT_DATA: Uuid = apple(0x220);

    /// Zone index distinguishing the occupancy sensor services of one FP2.
    pub const AQARA_INDEX: Uuid = uuid!("C8622A33-826A-4DD3-9BE9-D496361F29BB");
    pub const AQARA_FIRMWARE: Uuid = uuid!("96BF5F20-2996-4DB6-8D65-0E36314BCB6D");
    pub const AQARA_MODEL: Uuid = uuid!("36B7A28B-3200-4783-A3FB-6714F11B1417");
}
