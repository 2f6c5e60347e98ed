//! mDNS TXT record parsing for HomeKit accessories.

use hap_core::error::ParseError;
use hap_core::{DeviceId, DeviceRecord, FeatureFlags, StatusFlags};
use std::collections::HashMap;
use std::net::IpAddr;

/// Parser for `_hap._tcp` TXT records.
pub struct TxtRecordParser;

impl TxtRecordParser {
    /// Parse a `_hap._tcp` service TXT record into a `DeviceRecord`.
    ///
    /// Only `id` is required; every other key falls back to its zero value.
    pub fn parse_hap_txt(
        name: &str,
        txt: &HashMap<String, String>,
        addresses: Vec<IpAddr>,
        port: u16,
    ) -> Result<DeviceRecord, ParseError> {
        let id = txt.get("id").ok_or(ParseError::MissingField("id"))?;
        let id = id.parse::<DeviceId>()?;

        let model = txt.get("md").cloned().unwrap_or_default();

        let status_flags = txt
            .get("sf")
            .map(|v| StatusFlags::from_txt_value(v))
            .transpose()?
            .unwrap_or_default();

        let feature_flags = txt
            .get("ff")
            .map(|v| FeatureFlags::from_txt_value(v))
            .transpose()?
            .unwrap_or_default();

        let config_number = Self::parse_number(txt, "c#")?.unwrap_or(0);
        let state_number = Self::parse_number(txt, "s#")?.unwrap_or(0);
        let category = Self::parse_number(txt, "ci")?.unwrap_or(0);
        let protocol_version = txt.get("pv").cloned();

        Ok(DeviceRecord {
            id,
            name: name.to_string(),
            model,
            addresses,
            port,
            status_flags,
            feature_flags,
            config_number,
            category,
            protocol_version,
            state_number,
        })
    }

    /// Instance name of a full service name, e.g.
    /// `"Presence-Sensor-FP2-1A2B._hap._tcp.local."` → `"Presence-Sensor-FP2-1A2B"`.
    pub fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
        fullname
            .strip_suffix(service_type)
            .map(|s| s.trim_end_matches('.'))
            .unwrap_or(fullname)
    }

    fn parse_number<T: std::str::FromStr>(
        txt: &HashMap<String, String>,
        key: &'static str,
    ) -> Result<Option<T>, ParseError> {
        txt.get(key)
            .map(|v| {
                v.trim()
                    .parse::<T>()
                    .map_err(|_| ParseError::InvalidValue(format!("{}={}", key, v)))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_txt(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fp2_txt() -> HashMap<String, String> {
        make_txt(&[
            ("c#", "3"),
            ("ff", "2"),
            ("id", "58:55:CA:1A:E2:88"),
            ("md", "PS-S02D"),
            ("pv", "1.1"),
            ("s#", "7"),
            ("sf", "1"),
            ("ci", "10"),
        ])
    }

    fn addresses() -> Vec<IpAddr> {
        vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))]
    }

    mod hap_txt {
        use super::*;

        #[test]
        fn parses_full_record() {
            let record =
                TxtRecordParser::parse_hap_txt("Presence-Sensor-FP2-1A2B", &fp2_txt(), addresses(), 52000)
                    .unwrap();

            assert_eq!(record.id, DeviceId([0x58, 0x55, 0xCA, 0x1A, 0xE2, 0x88]));
            assert_eq!(record.name, "Presence-Sensor-FP2-1A2B");
            assert_eq!(record.model, "PS-S02D");
            assert_eq!(record.port, 52000);
            assert!(record.pairable());
            assert!(record.feature_flags.supports_software_auth());
            assert!(!record.feature_flags.supports_hardware_auth());
            assert_eq!(record.config_number, 3);
            assert_eq!(record.state_number, 7);
            assert_eq!(record.category, 10);
            assert_eq!(record.protocol_version.as_deref(), Some("1.1"));
        }

        #[test]
        fn missing_id_is_error() {
            let txt = make_txt(&[("md", "PS-S02D")]);
            let result = TxtRecordParser::parse_hap_txt("x", &txt, addresses(), 1);
            assert!(matches!(result, Err(ParseError::MissingField("id"))));
        }

        #[test]
        fn optional_keys_default() {
            let txt = make_txt(&[("id", "AA:BB:CC:DD:EE:FF")]);
            let record = TxtRecordParser::parse_hap_txt("x", &txt, addresses(), 1).unwrap();

            assert!(record.model.is_empty());
            assert!(!record.pairable());
            assert_eq!(record.config_number, 0);
            assert!(record.protocol_version.is_none());
        }

        #[test]
        fn invalid_number_is_error() {
            let mut txt = fp2_txt();
            txt.insert("c#".to_string(), "three".to_string());
            let result = TxtRecordParser::parse_hap_txt("x", &txt, addresses(), 1);
            assert!(matches!(result, Err(ParseError::InvalidValue(_))));
        }

        #[test]
        fn invalid_id_is_error() {
            let mut txt = fp2_txt();
            txt.insert("id".to_string(), "not-an-id".to_string());
            assert!(TxtRecordParser::parse_hap_txt("x", &txt, addresses(), 1).is_err());
        }
    }

    mod instance_name {
        use super::*;

        #[test]
        fn strips_service_type() {
            assert_eq!(
                TxtRecordParser::instance_name(
                    "Presence-Sensor-FP2-1A2B._hap._tcp.local.",
                    "_hap._tcp.local."
                ),
                "Presence-Sensor-FP2-1A2B"
            );
        }

        #[test]
        fn keeps_foreign_names() {
            assert_eq!(
                TxtRecordParser::instance_name("Other._http._tcp.local.", "_hap._tcp.local."),
                "Other._http._tcp.local."
            );
        }
    }
}
