//! Network transports for the audio stream
//!
//! The sending side is blocking and runs on the sender's transmit worker
//! thread. The receiving side is async and lives inside the receiver session.

pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

use crate::codec::AudioPacket;
use crate::config::{NetworkConfig, Protocol};
use crate::error::NetworkError;

pub use tcp::{bind_listener, TcpPacketSender};
pub use udp::{create_recv_socket, create_send_socket, UdpPacketSender};

/// Outbound half of a transport
pub trait PacketSender: Send {
    /// Send one packet. Errors are per packet; the sender stays usable.
    fn send(&mut self, packet: &AudioPacket) -> Result<usize, NetworkError>;

    /// Release the socket
    fn close(&mut self);

    fn protocol(&self) -> Protocol;
}

/// Build the sender for `protocol`. TCP does not connect here; it connects
/// on the first send.
pub fn create_sender(
    protocol: Protocol,
    destination: SocketAddr,
    config: &NetworkConfig,
) -> Result<Box<dyn PacketSender>, NetworkError> {
    match protocol {
        Protocol::Udp => Ok(Box::new(UdpPacketSender::new(destination, config)?)),
        Protocol::Tcp => Ok(Box::new(TcpPacketSender::new(
            destination,
            config.tcp_connect_timeout(),
        ))),
    }
}
