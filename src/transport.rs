//! Non-blocking UDP socket abstraction.
//!
//! One socket per endpoint. `receive_all` drains the socket until it would
//! block; `send` emits a single datagram best-effort. Send failures are not
//! retried — the reliability layer's redundancy and the 20 Hz snapshot
//! cadence absorb loss.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::protocol::MAX_PACKET_SIZE;

/// Errors surfaced to the shell. Everything past socket setup is tolerant
/// by design and never produces an error.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind UDP socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("invalid address '{0}'")]
    Address(String),
}

/// Running totals for one endpoint's socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct UdpTransport {
    socket: UdpSocket,
    recv_buf: [u8; MAX_PACKET_SIZE],
    stats: NetworkStats,
}

impl UdpTransport {
    /// Binds a non-blocking, address-reusing UDP socket. Port 0 picks an
    /// ephemeral port.
    pub fn bind(port: u16) -> Result<Self, NetError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = Self::configure(addr).map_err(|source| NetError::Bind { port, source })?;

        Ok(Self {
            socket,
            recv_buf: [0; MAX_PACKET_SIZE],
            stats: NetworkStats::default(),
        })
    }

    fn configure(addr: SocketAddrV4) -> io::Result<UdpSocket> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::V4(addr).into())?;
        Ok(socket.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one datagram. Errors and short writes are counted but otherwise
    /// ignored; the caller never needs to react.
    pub fn send(&mut self, bytes: &[u8], addr: SocketAddr) {
        match self.socket.send_to(bytes, addr) {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
            }
            Err(e) => {
                log::debug!("send to {} failed: {}", addr, e);
            }
        }
    }

    /// Drains the socket, returning every pending datagram with its origin.
    pub fn receive_all(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;
                    datagrams.push((self.recv_buf[..len].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    // Linux surfaces ICMP unreachable as a recv error on
                    // unconnected sockets. Nothing on the wire is fatal.
                    log::debug!("recv failed: {}", e);
                    break;
                }
            }
        }

        datagrams
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}
