//! Network probing helpers
//!
//! A reachability check runs before any shell session is attempted, and the
//! local address facing a device is needed when the message bus runs on this
//! machine.

use std::net::IpAddr;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use robolaunch_core::prelude::*;

/// Default bound for the reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check whether a TCP connection to `host:port` can be opened within `limit`.
pub async fn tcp_reachable(host: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => {
            debug!("{}:{} is reachable", host, port);
            true
        }
        Ok(Err(e)) => {
            debug!("{}:{} is not reachable: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("{}:{} did not answer within {:?}", host, port, limit);
            false
        }
    }
}

/// Local address of the interface that routes towards `host`.
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick a
/// route, which is enough to learn our own address on that route.
pub async fn local_address_towards(host: &str, port: u16) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .inspect_err(|e| debug!("UDP bind failed: {}", e))
        .ok()?;
    socket
        .connect((host, port))
        .await
        .inspect_err(|e| debug!("No route towards {}: {}", host, e))
        .ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Whether `host` names this machine's loopback interface
pub fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
