//! HAP status and feature flags advertised in the `_hap._tcp` TXT record.
//!
//! Both fields are small decimal bitmasks: `sf` carries the accessory status,
//! `ff` the pairing features it supports.

use crate::error::ParseError;

/// Status flags from the `sf` TXT key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    /// Accessory has not been paired with any controller.
    pub const NOT_PAIRED: u8 = 1 << 0;
    /// Accessory has not been configured to join a Wi-Fi network.
    pub const WIFI_NOT_CONFIGURED: u8 = 1 << 1;
    /// A problem has been detected on the accessory.
    pub const PROBLEM_DETECTED: u8 = 1 << 2;

    pub fn from_txt_value(s: &str) -> Result<Self, ParseError> {
        parse_decimal_flags(s).map(Self)
    }

    pub fn is_pairable(&self) -> bool {
        self.0 & Self::NOT_PAIRED != 0
    }

    pub fn wifi_not_configured(&self) -> bool {
        self.0 & Self::WIFI_NOT_CONFIGURED != 0
    }

    pub fn problem_detected(&self) -> bool {
        self.0 & Self::PROBLEM_DETECTED != 0
    }
}

/// Pairing feature flags from the `ff` TXT key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(pub u8);

impl FeatureFlags {
    /// Accessory carries an authentication coprocessor.
    pub const HARDWARE_AUTHENTICATION: u8 = 1 << 0;
    /// Accessory supports software token authentication.
    pub const SOFTWARE_AUTHENTICATION: u8 = 1 << 1;

    pub fn from_txt_value(s: &str) -> Result<Self, ParseError> {
        parse_decimal_flags(s).map(Self)
    }

    pub fn supports_hardware_auth(&self) -> bool {
        self.0 & Self::HARDWARE_AUTHENTICATION != 0
    }

    pub fn supports_software_auth(&self) -> bool {
        self.0 & Self::SOFTWARE_AUTHENTICATION != 0
    }
}

fn parse_decimal_flags(s: &str) -> Result<u8, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseError::InvalidFormat("empty flags string".to_string()));
    }

    // Some firmwares advertise hex with a 0x prefix.
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidHex(s.to_string())),
        None => s
            .parse::<u8>()
            .map_err(|_| ParseError::InvalidValue(format!("invalid flags value: {}", s))),
    }
}
