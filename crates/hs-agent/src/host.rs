//! Host registration with the coordinator

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use hs_core::{EventBus, HostEvent, HostIdentity};
use hs_protocol::{HostRecord, RegisterHostRequest};

use crate::auth::{ApiRequest, AuthClient, ClientError};

pub const REGISTER_PATH: &str = "/api/v1/hosts/get-or-create";

/// Address this host advertises when none is configured
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Registration details for this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl Registration {
    pub fn new(name: impl Into<String>, advertise_ip: Option<&str>, port: u16) -> Self {
        let ip = advertise_ip
            .map(str::to_string)
            .filter(|ip| !ip.trim().is_empty())
            .or_else(|| detect_local_ip().map(|ip| ip.to_string()))
            .unwrap_or_else(|| Ipv4Addr::LOCALHOST.to_string());

        Self {
            name: name.into(),
            ip,
            port,
        }
    }

    fn matches(&self, known: &HostIdentity) -> bool {
        !known.id.is_empty()
            && known.name == self.name
            && known.ip == self.ip
            && known.port == self.port
    }
}

/// Look up or create this host's record, reusing `known` when nothing changed
pub async fn ensure_registered(
    client: &AuthClient,
    registration: &Registration,
    known: Option<&HostIdentity>,
    events: &EventBus,
) -> Result<HostIdentity, ClientError> {
    if let Some(known) = known.filter(|k| registration.matches(k)) {
        tracing::info!("Using stored host id {}", known.id);
        return Ok(known.clone());
    }

    tracing::info!(
        "Registering host {} at {}:{}",
        registration.name,
        registration.ip,
        registration.port
    );

    let req = ApiRequest::post(REGISTER_PATH)
        .protected()
        .json(&RegisterHostRequest {
            name: registration.name.clone(),
            ip_address: registration.ip.clone(),
            port: registration.port,
        })?;
    let record: HostRecord = client.execute_json(req).await?;

    let identity = HostIdentity {
        id: record.id,
        name: record.name.unwrap_or_else(|| registration.name.clone()),
        ip: registration.ip.clone(),
        port: registration.port,
    };
    tracing::info!("Registered as host {}", identity.id);
    events.publish(HostEvent::Registered {
        host_id: identity.id.clone(),
    });
    Ok(identity)
}
