//! # hap-discovery
//!
//! mDNS/Bonjour service discovery for HomeKit IP accessories.
//!
//! This crate provides:
//! - Browsing for `_hap._tcp` services via mDNS
//! - TXT record parsing into `DeviceRecord`
//! - The `ServiceSource` seam for testing with mocks
//!
//! ## Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use hap_discovery::{BrowseEvent, ServiceBrowser, ServiceSource};
//!
//! let browser = ServiceBrowser::new()?;
//! let mut events = browser.start()?;
//! while let Some(BrowseEvent::Seen(record)) = events.next().await {
//!     println!("Found: {} ({})", record.name, record.model);
//! }
//! ```

mod browser;
mod parser;
mod traits;

pub use browser::ServiceBrowser;
pub use parser::TxtRecordParser;
pub use traits::{BrowseEvent, ServiceSource};

#[cfg(any(test, feature = "mock"))]
pub use traits::MockServiceSource;

/// HomeKit Accessory Protocol service type for mDNS discovery.
pub const HAP_SERVICE_TYPE: &str = "_hap._tcp.local.";
