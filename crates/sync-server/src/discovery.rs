//! UDP discovery beacon: broadcasts this server's identity every 3
//! seconds on [`DISCOVERY_INTERVAL_SECS`] so clients on the same LAN can
//! find it without a configured host, and answers any client's probe
//! datagram directly.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

/// Interval between broadcast beacons.
pub const DISCOVERY_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Beacon {
    service: &'static str,
    server_id: String,
    port: u16,
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct Probe {
    #[allow(dead_code)]
    service: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Run the discovery responder forever: broadcast a beacon every
/// [`DISCOVERY_INTERVAL_SECS`], and answer any inbound `{service,
/// type:"probe"}` datagram with the same beacon, addressed directly back
/// to the prober.
pub async fn run(discovery_port: u16, server_id: String, hostname: String, sync_port: u16) {
    let socket = match UdpSocket::bind(("0.0.0.0", discovery_port)).await {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, discovery_port, "failed to bind discovery socket");
            return;
        }
    };
    if let Err(err) = socket.set_broadcast(true) {
        tracing::warn!(%err, "failed to enable broadcast on discovery socket");
    }

    let beacon = Beacon { service: "advanced-sync", server_id, port: sync_port, hostname };
    let payload = serde_json::to_vec(&beacon).expect("Beacon always serializes");
    let broadcast_addr: SocketAddr = ([255, 255, 255, 255], discovery_port).into();

    let mut ticker = tokio::time::interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = socket.send_to(&payload, broadcast_addr).await {
                    tracing::debug!(%err, "discovery broadcast send failed");
                }
            }
            recv = socket.recv_from(&mut buf) => {
                let Ok((n, from)) = recv else { continue };
                if let Ok(probe) = serde_json::from_slice::<Probe>(&buf[..n]) {
                    if probe.kind == "probe" {
                        let _ = socket.send_to(&payload, from).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_serializes_with_expected_field_names() {
        let beacon = Beacon {
            service: "advanced-sync",
            server_id: "abc123".into(),
            port: 8787,
            hostname: "host".into(),
        };
        let json = serde_json::to_string(&beacon).unwrap();
        assert!(json.contains("\"serverId\":\"abc123\""));
        assert!(json.contains("\"service\":\"advanced-sync\""));
    }

    #[test]
    fn probe_recognizes_type_field() {
        let json = r#"{"service":"advanced-sync","type":"probe"}"#;
        let probe: Probe = serde_json::from_str(json).unwrap();
        assert_eq!(probe.kind, "probe");
    }
}
