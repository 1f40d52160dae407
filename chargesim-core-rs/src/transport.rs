//! UDP transport for the simulator

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::SimulatorError;

/// Receive buffer size. Anything larger than a command packet is
/// discarded anyway, so this only has to exceed the largest packet.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Shared handle to the simulator's single UDP socket.
///
/// Clones share the socket; sending and receiving can happen from
/// different tasks at the same time.
#[derive(Debug, Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
}

impl Transport {
    /// Bind the socket. Failure here is fatal for the simulator.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SimulatorError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SimulatorError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.socket.local_addr()
    }

    /// Non-blocking receive. Returns `Ok(None)` if no datagram is queued.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, io::Error> {
        match self.socket.try_recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send one datagram. No retry.
    pub async fn send(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), io::Error> {
        debug!("Sending {} bytes to {}", bytes.len(), addr);
        self.socket.send_to(bytes, addr).await?;
        Ok(())
    }
}
