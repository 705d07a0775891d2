use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{info, warn};

use crate::lifecycle::{StopFlag, Ticker};
use crate::state::MonitorEvent;

pub const DEFAULT_SERVICE_TYPE: &str = "_airplay._tcp";
pub const DEFAULT_INSTANCE: &str = "Test AirPlay";
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveredService {
    pub name: String,
    pub addr: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("No {service_type} services found")]
    NoServices { service_type: String },
    #[error("Invalid selection {input:?}: expected an index below {count}")]
    InvalidSelection { input: String, count: usize },
    #[cfg(not(feature = "mdns"))]
    #[error("Service discovery is not compiled in; pass --connect <ADDR>")]
    Unavailable,
}

/// Resolves a service type to the instances currently answering for it.
pub trait Discovery {
    fn resolve(&self, service_type: &str, timeout: Duration) -> Result<Vec<DiscoveredService>>;
}

/// Keeps an advertisement fresh.
pub trait Announcer {
    fn refresh(&mut self) -> Result<()>;
}

/// What the server publishes about itself.
#[derive(Clone, Debug)]
pub struct Registration {
    pub service_type: String,
    pub instance: String,
    pub port: u16,
    pub properties: Vec<(String, String)>,
}

impl Registration {
    pub fn new(service_type: &str, instance: &str, port: u16) -> Self {
        Self {
            service_type: register_name(service_type),
            instance: instance.to_string(),
            port,
            properties: vec![
                ("txtvers".to_string(), "1".to_string()),
                ("device".to_string(), instance.to_string()),
            ],
        }
    }

    pub fn txt_records(&self) -> Vec<String> {
        self.properties.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// `_x._tcp` -> `_x._tcp.local.`
pub fn browse_name(service_type: &str) -> String {
    format!("{}.local.", register_name(service_type))
}

/// `_x._tcp.local.` -> `_x._tcp`
pub fn register_name(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    trimmed.strip_suffix(".local").unwrap_or(trimmed).to_string()
}

/// Deduplicate by name and order for a stable numbered listing.
pub fn collect_services(found: impl IntoIterator<Item = (String, SocketAddr)>) -> Vec<DiscoveredService> {
    found
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(name, addr)| DiscoveredService { name, addr })
        .collect()
}

pub fn ensure_found(services: Vec<DiscoveredService>, service_type: &str) -> Result<Vec<DiscoveredService>, DiscoveryError> {
    if services.is_empty() {
        Err(DiscoveryError::NoServices { service_type: register_name(service_type) })
    } else {
        Ok(services)
    }
}

// Pure decision function for easier testing
pub fn select_service<'a>(services: &'a [DiscoveredService], input: &str) -> Result<&'a DiscoveredService, DiscoveryError> {
    let invalid = || DiscoveryError::InvalidSelection { input: input.trim().to_string(), count: services.len() };
    let index: usize = input.trim().parse().map_err(|_| invalid())?;
    services.get(index).ok_or_else(invalid)
}

/// Re-announce every `interval` until `stop`, publishing each successful refresh.
pub fn announce_loop(
    announcer: &mut dyn Announcer,
    interval: Duration,
    events: &Sender<MonitorEvent>,
    stop: &StopFlag,
) {
    let mut ticker = Ticker::delayed(interval);
    while ticker.wait(stop) {
        match announcer.refresh() {
            Ok(()) => {
                let _ = events.send(MonitorEvent::Announced(SystemTime::now()));
            }
            Err(e) => warn!(?e, "mDNS refresh failed"),
        }
    }
}

/// Where an advertisement is published. Registering an already registered instance re-announces it.
#[cfg(any(feature = "mdns", test))]
pub trait Registry {
    fn register(&mut self, registration: &Registration) -> Result<()>;
    fn unregister(&mut self, registration: &Registration) -> Result<()>;
}

/// A live advertisement. Refresh re-registers in place, so the instance is never withdrawn before drop.
#[cfg(any(feature = "mdns", test))]
pub struct Advertisement<R: Registry> {
    registry: R,
    registration: Registration,
}

#[cfg(any(feature = "mdns", test))]
impl<R: Registry> Advertisement<R> {
    pub fn publish(mut registry: R, registration: Registration) -> Result<Self> {
        registry.register(&registration)?;
        info!(
            service_type = %registration.service_type,
            instance = %registration.instance,
            port = registration.port,
            "Registered mDNS service"
        );
        Ok(Self { registry, registration })
    }
}

#[cfg(any(feature = "mdns", test))]
impl<R: Registry> Announcer for Advertisement<R> {
    fn refresh(&mut self) -> Result<()> {
        self.registry.register(&self.registration)
    }
}

#[cfg(any(feature = "mdns", test))]
impl<R: Registry> Drop for Advertisement<R> {
    fn drop(&mut self) {
        match self.registry.unregister(&self.registration) {
            Ok(()) => info!(instance = %self.registration.instance, "Unregistered mDNS service"),
            Err(e) => warn!(?e, "mDNS unregister failed"),
        }
    }
}

#[cfg(feature = "mdns")]
pub use self::mdns::{MdnsBrowser, MdnsRegistry};

#[cfg(feature = "mdns")]
mod mdns {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    use anyhow::{Context, Result};
    use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
    use tracing::debug;

    use super::{browse_name, collect_services, DiscoveredService, Discovery, Registration, Registry};

    pub struct MdnsBrowser;

    impl Discovery for MdnsBrowser {
        fn resolve(&self, service_type: &str, timeout: Duration) -> Result<Vec<DiscoveredService>> {
            let ty = browse_name(service_type);
            let daemon = ServiceDaemon::new().context("Starting mDNS daemon")?;
            let events = daemon.browse(&ty).with_context(|| format!("Browsing {ty}"))?;

            let deadline = Instant::now() + timeout;
            let mut found = Vec::new();
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                match events.recv_timeout(left) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let addrs = info.get_addresses();
                        let ip = addrs.iter().find(|ip| ip.is_ipv4()).or_else(|| addrs.iter().next());
                        if let Some(ip) = ip {
                            debug!(name = info.get_fullname(), %ip, port = info.get_port(), "Resolved service");
                            found.push((info.get_fullname().to_string(), SocketAddr::new(*ip, info.get_port())));
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            let _ = daemon.stop_browse(&ty);
            let _ = daemon.shutdown();
            Ok(collect_services(found))
        }
    }

    /// mdns-sd responder daemon. Addresses follow the host's interfaces.
    pub struct MdnsRegistry {
        daemon: ServiceDaemon,
    }

    impl MdnsRegistry {
        pub fn new() -> Result<Self> {
            Ok(Self { daemon: ServiceDaemon::new().context("mDNS responder init")? })
        }

        fn service_info(registration: &Registration) -> Result<ServiceInfo> {
            let host: String = registration
                .instance
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            let properties: HashMap<String, String> = registration.properties.iter().cloned().collect();
            let info = ServiceInfo::new(
                &browse_name(&registration.service_type),
                &registration.instance,
                &format!("{host}.local."),
                "",
                registration.port,
                properties,
            )
            .with_context(|| format!("Describing {}", registration.instance))?;
            Ok(info.enable_addr_auto())
        }
    }

    impl Registry for MdnsRegistry {
        fn register(&mut self, registration: &Registration) -> Result<()> {
            let info = Self::service_info(registration)?;
            self.daemon.register(info).context("Announcing mDNS service")
        }

        fn unregister(&mut self, registration: &Registration) -> Result<()> {
            let fullname = format!("{}.{}", registration.instance, browse_name(&registration.service_type));
            self.daemon.unregister(&fullname).context("Withdrawing mDNS service")?;
            Ok(())
        }
    }

    impl Drop for MdnsRegistry {
        fn drop(&mut self) {
            let _ = self.daemon.shutdown();
        }
    }
}

/// Server-side advertisement thread body. Registration failure is logged and the run continues unadvertised.
pub fn advertise(registration: Registration, interval: Duration, events: &Sender<MonitorEvent>, stop: &StopFlag) {
    #[cfg(feature = "mdns")]
    {
        match MdnsRegistry::new().and_then(|registry| Advertisement::publish(registry, registration)) {
            Ok(mut announcer) => {
                let _ = events.send(MonitorEvent::Announced(SystemTime::now()));
                announce_loop(&mut announcer, interval, events, stop);
            }
            Err(e) => warn!(error = ?e, "mDNS responder init failed; continuing without mDNS"),
        }
    }
    #[cfg(not(feature = "mdns"))]
    {
        let _ = (interval, events, stop);
        info!(instance = %registration.instance, "Built without mdns; not advertising");
    }
}
