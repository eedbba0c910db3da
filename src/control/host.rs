//! Host identity reported by `get_info`

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::protocol::HostInfo;

/// Address of the interface that routes to the outside world.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick a
/// source address.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}

pub fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn host_info() -> HostInfo {
    HostInfo {
        ip: local_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .to_string(),
        hostname: hostname(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_info_is_populated() {
        let info = host_info();
        assert!(info.ip.parse::<IpAddr>().is_ok());
        assert!(!info.hostname.is_empty());
    }
}
