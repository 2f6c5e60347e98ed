//! # fp2-client
//!
//! Session engine for the Aqara FP2 presence sensor over HomeKit IP.
//!
//! This crate provides:
//! - FP2 discovery by device id or name, and network-wide search
//! - Pairing with a setup code and unpairing, with a pluggable store
//! - The capability map resolving service and characteristic types,
//!   including indexed occupancy zones
//! - Subscription to light level and zone occupancy as `DomainEvent`s,
//!   with recovery when the session drops
//!
//! ## Example
//!
//! ```ignore
//! use fp2_client::{ClientBuilder, Fp2Discovery, JsonFilePairingStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let discovery = Fp2Discovery::browser()?;
//!     let record = discovery.find("58:55:CA:1A:E2:88", Duration::from_secs(5)).await?;
//!
//!     let store = Arc::new(JsonFilePairingStore::new("/home/me/.fp2-proxy"));
//!     let mut client = ClientBuilder::new(record).store(store).build()?;
//!
//!     let mut events = client.events();
//!     client.subscribe().await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

mod builder;
mod capability;
mod client;
mod discovery;
mod dispatcher;
mod events;
mod pairing;
mod store;

pub use builder::{
    clamp_timeout, ClientBuilder, ClientConfig, DEFAULT_TIMEOUT_SECS, DEFAULT_ZONE_BOUND,
    MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
pub use capability::{CapabilityKey, CapabilityMap, ServiceEntry, MULTI_INSTANCE};
pub use client::{AccessoryClient, ClientState};
pub use discovery::Fp2Discovery;
pub use dispatcher::{Decoder, EventDispatcher, SharedTransport, SubscriptionTable};
pub use events::{
    event_channel, warning_channel, DiscoveryEvent, DiscoveryReceiver, DiscoverySender,
    DomainEvent, EventReceiver, EventSender, SessionWarning, WarningReceiver, WarningSender,
};
pub use pairing::PairingManager;
pub use store::{JsonFilePairingStore, MemoryPairingStore, PairingStore};

// Re-export commonly used types
pub use hap_core::{DeviceId, DeviceRecord, Error, InstanceId, Result};
pub use hap_pairing::PairingMaterial;
