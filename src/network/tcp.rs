//! TCP transport for the USB tether
//!
//! The sender connects lazily: the reverse port forward that carries the
//! tether is often not ready when streaming starts, so each send attempt
//! connects if needed and a failed attempt just drops the packet. There is
//! no background reconnect loop.

use bytes::{BufMut, BytesMut};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use crate::codec::{packet, AudioPacket};
use crate::config::Protocol;
use crate::error::NetworkError;

/// Bind the receiver's listener on `0.0.0.0:port`
pub fn bind_listener(port: u16) -> std::io::Result<tokio::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    // Single sender; a short backlog is enough for a reconnecting client
    socket.listen(4)?;

    tokio::net::TcpListener::from_std(socket.into())
}

/// Length-prefixed TCP sender with lazy (re)connect
pub struct TcpPacketSender {
    destination: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    frame_buf: BytesMut,
    connects: u64,
}

impl TcpPacketSender {
    pub fn new(destination: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            destination,
            connect_timeout,
            stream: None,
            frame_buf: BytesMut::with_capacity(8 * 1024),
            connects: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Successful connects so far, including reconnects
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    fn ensure_connected(&mut self) -> Result<&mut TcpStream, NetworkError> {
        if self.stream.is_none() {
            tracing::debug!("Connecting TCP to {}...", self.destination);

            let stream = TcpStream::connect_timeout(&self.destination, self.connect_timeout)
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            stream
                .set_nodelay(true)
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            // A peer that stops reading must not wedge the transmit worker
            stream
                .set_write_timeout(Some(self.connect_timeout))
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

            self.connects += 1;
            tracing::info!("TCP connected to {}", self.destination);
            self.stream = Some(stream);
        }

        self.stream.as_mut().ok_or(NetworkError::NotConnected)
    }
}

impl super::PacketSender for TcpPacketSender {
    fn send(&mut self, packet: &AudioPacket) -> Result<usize, NetworkError> {
        self.frame_buf.clear();
        self.frame_buf.put_u32(packet.encoded_len() as u32);
        packet::encode_into(
            &mut self.frame_buf,
            packet.sequence,
            packet.timestamp_ms,
            &packet.payload,
        );
        let frame = self.frame_buf.split().freeze();

        let stream = self.ensure_connected()?;
        let result = stream.write_all(&frame).and_then(|_| stream.flush());

        match result {
            Ok(()) => Ok(frame.len()),
            Err(e) => {
                // Force a fresh connection on the next send
                self.close();
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}

impl Drop for TcpPacketSender {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
