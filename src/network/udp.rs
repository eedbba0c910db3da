//! UDP transport: one packet per datagram

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::codec::AudioPacket;
use crate::config::{NetworkConfig, Protocol};
use crate::error::NetworkError;

/// Create the unconnected outbound socket, bound to an ephemeral port
pub fn create_send_socket(
    destination: &SocketAddr,
    send_buffer: usize,
) -> std::io::Result<UdpSocket> {
    let (domain, bind_addr) = match destination {
        SocketAddr::V4(_) => (
            Domain::IPV4,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        ),
        SocketAddr::V6(_) => (
            Domain::IPV6,
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        ),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?;
    if let Err(e) = socket.set_send_buffer_size(send_buffer) {
        tracing::debug!("Could not set UDP send buffer to {}: {}", send_buffer, e);
    }
    socket.bind(&bind_addr.into())?;

    Ok(socket.into())
}

/// Create the receive socket bound to `0.0.0.0:port`, non-blocking so it can
/// be handed to tokio
pub fn create_recv_socket(port: u16, recv_buffer: usize) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        tracing::debug!("Could not set UDP receive buffer to {}: {}", recv_buffer, e);
    }
    socket.set_nonblocking(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// Sends each packet as a single datagram to a fixed destination
pub struct UdpPacketSender {
    socket: Option<UdpSocket>,
    destination: SocketAddr,
}

impl UdpPacketSender {
    pub fn new(destination: SocketAddr, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let socket = create_send_socket(&destination, config.udp_send_buffer_bytes)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::debug!("UDP socket created for {}", destination);

        Ok(Self {
            socket: Some(socket),
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl super::PacketSender for UdpPacketSender {
    fn send(&mut self, packet: &AudioPacket) -> Result<usize, NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::NotConnected)?;
        let datagram = packet.encode();

        socket
            .send_to(&datagram, self.destination)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}
