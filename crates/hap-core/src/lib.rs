//! # hap-core
//!
//! Core types and error definitions shared across the HomeKit accessory crates.
//!
//! This crate provides:
//! - Device representation and identification
//! - `sf`/`ff` status and feature flag parsing
//! - The accessory attribute database model and characteristic bodies
//! - Well-known service and characteristic type UUIDs
//! - Common error types

pub mod accessory;
pub mod device;
pub mod error;
pub mod flags;
pub mod uuids;

pub use accessory::{
    Accessory, AccessoryDatabase, Characteristic, CharacteristicValue, CharacteristicWrite,
    Characteristics, InstanceId, Service,
};
pub use device::{DeviceId, DeviceRecord, FP2_MANUFACTURER, FP2_MODEL};
pub use error::{
    CryptoError, DiscoveryError, Error, HttpError, ParseError, PairingError, Result,
};
pub use flags::{FeatureFlags, StatusFlags};
