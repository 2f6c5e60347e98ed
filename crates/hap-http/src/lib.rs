//! # hap-http
//!
//! HTTP transport for HomeKit IP accessories.
//!
//! This crate provides:
//! - Request formatting for the HAP endpoints
//! - Incremental response parsing, including chunked bodies and `EVENT/1.0` pushes
//! - Plain and encrypted connections with a background session reader
//! - The `AccessoryTransport` seam and its network implementation

mod connection;
mod request;
mod response;
mod traits;
mod transport;

pub use connection::HapConnection;
pub use request::{HttpMethod, HttpRequest, CONTENT_TYPE_HAP_JSON, CONTENT_TYPE_PAIRING_TLV8};
pub use response::{HttpResponse, MessageKind};
pub use traits::{AccessoryTransport, TransportNotification};
pub use transport::{HttpTransport, TransportConfig};

#[cfg(any(test, feature = "mock"))]
pub use traits::MockAccessoryTransport;
