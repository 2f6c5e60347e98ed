//! Accessory identity and the record built from its `_hap._tcp` advertisement.

use crate::error::ParseError;
use crate::flags::{FeatureFlags, StatusFlags};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Manufacturer reported by the FP2 accessory information service.
pub const FP2_MANUFACTURER: &str = "Aqara";
/// Model signature (`md` TXT key) of the FP2 presence sensor.
pub const FP2_MODEL: &str = "PS-S02D";

/// Accessory identifier from the `id` TXT key, formatted like a MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub [u8; 6]);

/// A discovered HomeKit accessory.
///
/// Addresses and port can change between sessions, so a record is
/// re-discovered each time rather than persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// mDNS instance name, e.g. "Presence-Sensor-FP2-1A2B".
    pub name: String,
    /// Model signature from the `md` TXT key.
    pub model: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub status_flags: StatusFlags,
    pub feature_flags: FeatureFlags,
    /// Configuration number `c#`; bumps whenever the accessory database changes.
    pub config_number: u32,
    /// Accessory category `ci`.
    pub category: u16,
    /// Protocol version `pv`.
    pub protocol_version: Option<String>,
    /// State number `s#`.
    pub state_number: u32,
}

impl FromStr for DeviceId {
    type Err = ParseError;

    /// Accepts `58:55:CA:1A:E2:88` as advertised, the hyphenated form, or
    /// twelve bare hex digits.
    fn from_str(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        let groups: Vec<&str> = s.split([':', '-']).collect();
        let pairs: Vec<&str> = match groups.as_slice() {
            [bare] if bare.len() == 12 && bare.is_ascii() => {
                (0..12).step_by(2).map(|i| &bare[i..i + 2]).collect()
            }
            six if six.len() == 6 && six.iter().all(|g| g.len() == 2) => six.to_vec(),
            _ => {
                return Err(ParseError::InvalidFormat(format!(
                    "{s:?} is not a six-byte accessory id"
                )))
            }
        };

        let mut id = [0u8; 6];
        for (byte, pair) in id.iter_mut().zip(pairs) {
            if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError::InvalidHex(pair.to_string()));
            }
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| ParseError::InvalidHex(pair.to_string()))?;
        }
        Ok(Self(id))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl DeviceRecord {
    pub fn is_fp2(&self) -> bool {
        self.model == FP2_MODEL
    }

    /// Whether the accessory currently accepts pair-setup.
    pub fn pairable(&self) -> bool {
        self.status_flags.is_pairable()
    }

    /// Address to connect to: routable IPv4 first, then global IPv6, then
    /// anything left. Link-local IPv6 needs a scope id the resolver may omit.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let pick = |want: fn(&IpAddr) -> bool| {
            self.addresses
                .iter()
                .find(|addr| want(addr))
                .map(|addr| SocketAddr::new(*addr, self.port))
        };

        pick(|addr| addr.is_ipv4())
            .or_else(|| {
                pick(|addr| match addr {
                    IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
                    IpAddr::V4(_) => false,
                })
            })
            .or_else(|| pick(|_| true))
    }
}
