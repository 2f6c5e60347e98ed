//! mDNS service browser implementation.

use crate::parser::TxtRecordParser;
use crate::traits::{BrowseEvent, ServiceSource};
use crate::HAP_SERVICE_TYPE;
use futures::stream::BoxStream;
use hap_core::error::DiscoveryError;
use hap_core::{DeviceRecord, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, trace, warn};

/// mDNS browser for `_hap._tcp` services.
pub struct ServiceBrowser {
    daemon: ServiceDaemon,
}

impl ServiceBrowser {
    /// Create a new service browser.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to create mDNS daemon: {}", e)))?;
        Ok(Self { daemon })
    }

    /// Parse a resolved mDNS service into a `DeviceRecord`.
    fn parse_service_info(info: &ServiceInfo) -> Option<DeviceRecord> {
        let fullname = info.get_fullname();
        let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();

        if addresses.is_empty() {
            warn!(service = fullname, "service has no addresses, skipping");
            return None;
        }

        let txt: HashMap<String, String> = info
            .get_properties()
            .iter()
            .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
            .collect();

        let name = TxtRecordParser::instance_name(fullname, HAP_SERVICE_TYPE);

        match TxtRecordParser::parse_hap_txt(name, &txt, addresses, info.get_port()) {
            Ok(record) => {
                debug!(id = %record.id, name = %record.name, model = %record.model, "parsed accessory");
                Some(record)
            }
            Err(e) => {
                warn!(service = fullname, error = %e, "failed to parse service, skipping");
                None
            }
        }
    }

    /// Handle a service event and optionally return a browse event.
    fn handle_service_event(event: ServiceEvent) -> Option<BrowseEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                trace!(service = info.get_fullname(), "service resolved");
                Self::parse_service_info(&info).map(BrowseEvent::Seen)
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                trace!(service = %fullname, "service removed");
                let name = TxtRecordParser::instance_name(&fullname, HAP_SERVICE_TYPE);
                Some(BrowseEvent::Removed(name.to_string()))
            }
            ServiceEvent::SearchStarted(_) => {
                trace!("search started");
                None
            }
            ServiceEvent::SearchStopped(_) => {
                trace!("search stopped");
                None
            }
            _ => None,
        }
    }
}

impl ServiceSource for ServiceBrowser {
    fn start(&self) -> Result<BoxStream<'static, BrowseEvent>> {
        let receiver = self
            .daemon
            .browse(HAP_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse HAP: {}", e)))?;

        // The daemon drops the sender after `stop_browse`, ending the stream
        let stream = async_stream::stream! {
            while let Ok(event) = receiver.recv_async().await {
                if let Some(browse_event) = Self::handle_service_event(event) {
                    yield browse_event;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn stop(&self) {
        if let Err(e) = self.daemon.stop_browse(HAP_SERVICE_TYPE) {
            trace!(error = %e, "stop_browse");
        }
    }
}

impl Drop for ServiceBrowser {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}
