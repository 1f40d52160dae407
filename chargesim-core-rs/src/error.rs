//! Error types

use std::net::SocketAddr;
use thiserror::Error;

use crate::types::ProtocolGeneration;

/// Reasons a received datagram is rejected by the codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("malformed {generation} packet: expected {expected} bytes, got {actual}")]
    WrongLength {
        generation: ProtocolGeneration,
        expected: usize,
        actual: usize,
    },

    #[error("malformed packet: bad magic 0x{found:04x}")]
    BadMagic { found: u16 },
}

/// Errors surfaced by the simulator to its owner
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
