//! mDNS service advertisement for the `_daap._tcp` share.
//!
//! Best-effort: a machine without a working mDNS stack still serves
//! clients that know the address. Registration and withdrawal are
//! serialized under one lock, and the record is withdrawn on drop.

use std::collections::HashMap;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::timeout;

/// DAAP service type (trailing dot required by mdns-sd).
const SERVICE_TYPE: &str = "_daap._tcp.local.";

/// How long to browse when probing whether an instance name is taken.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Why the share could not be advertised.
#[derive(Debug, Error)]
pub enum AdvertiseError {
    /// The mDNS daemon rejected the operation.
    #[error("mdns error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// No LAN-reachable IP to put in the record.
    #[error("no usable local ip: {0}")]
    NoLocalIp(String),
}

/// Advertises one DAAP share over mDNS/DNS-SD.
pub struct Advertiser {
    daemon: ServiceDaemon,
    /// Fullname of the currently registered record, if any. Doubles as
    /// the register/unregister lock.
    registered: Mutex<Option<String>>,
}

impl Advertiser {
    /// Spins up the mDNS responder.
    pub fn new() -> Result<Self, mdns_sd::Error> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            registered: Mutex::new(None),
        })
    }

    /// Probes the network for an existing `_daap._tcp` instance with this
    /// name. Used before registering so a collision surfaces as an event
    /// instead of silent shadowing.
    pub async fn name_in_use(&self, instance: &str) -> bool {
        let receiver = match self.daemon.browse(SERVICE_TYPE) {
            Ok(receiver) => receiver,
            Err(e) => {
                log::debug!("[mDNS] name probe unavailable: {}", e);
                return false;
            }
        };

        let prefix = format!("{instance}.");
        let mut taken = false;
        let deadline = std::time::Instant::now() + PROBE_TIMEOUT;
        while std::time::Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceFound(_, fullname))) => {
                    if fullname
                        .to_lowercase()
                        .starts_with(&prefix.to_lowercase())
                    {
                        taken = true;
                        break;
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            log::debug!("[mDNS] failed to stop name probe: {:?}", e);
        }
        taken
    }

    /// Registers the share at `port`, withdrawing any record this
    /// advertiser put up earlier.
    ///
    /// The TXT record carries the keys DAAP clients read: `txtvers=1`,
    /// `Password`, `Machine Name`, and optionally `Machine ID`.
    pub fn register(
        &self,
        instance: &str,
        port: u16,
        password_protected: bool,
        machine_id: Option<&str>,
    ) -> Result<(), AdvertiseError> {
        let mut registered = self.registered.lock();
        if let Some(previous) = registered.take() {
            if let Err(e) = self.daemon.unregister(&previous) {
                log::debug!("[mDNS] failed to withdraw previous record: {}", e);
            }
        }

        let ip = local_ip_address::local_ip()
            .map_err(|e| AdvertiseError::NoLocalIp(e.to_string()))?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let dns_hostname = hostname
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>();

        let mut txt = HashMap::new();
        txt.insert("txtvers".to_string(), "1".to_string());
        txt.insert(
            "Password".to_string(),
            if password_protected { "true" } else { "false" }.to_string(),
        );
        txt.insert("Machine Name".to_string(), instance.to_string());
        if let Some(machine_id) = machine_id {
            txt.insert("Machine ID".to_string(), machine_id.to_string());
        }

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            instance,
            &format!("{dns_hostname}.local."),
            ip,
            port,
            Some(txt),
        )?;
        let fullname = service.get_fullname().to_string();
        self.daemon.register(service)?;

        log::info!("[mDNS] advertising '{}' on port {}", instance, port);
        *registered = Some(fullname);
        Ok(())
    }

    /// Withdraws the record. Safe to call repeatedly; failures during
    /// teardown are swallowed.
    pub fn unregister(&self) {
        let mut registered = self.registered.lock();
        if let Some(fullname) = registered.take() {
            if let Err(e) = self.daemon.unregister(&fullname) {
                log::warn!("[mDNS] failed to unregister service: {}", e);
            }
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.unregister();
    }
}
