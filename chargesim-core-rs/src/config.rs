//! Configuration for the charger simulator

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::SimulatorError;
use crate::fault_injection::FaultConfig;
use crate::types::{ProtocolGeneration, DEFAULT_PORT};

/// Complete simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Local address the UDP socket binds to
    pub bind_addr: SocketAddr,

    /// Wire format spoken with the manager
    pub generation: ProtocolGeneration,

    /// Version stamped on outgoing packets (generation default if unset)
    pub protocol_version: Option<u8>,

    /// Whether a vehicle is plugged in at startup
    pub car_connected: bool,

    /// Period of the state report
    pub send_interval: Duration,

    /// Sleep between receive attempts when the socket is empty
    pub poll_interval: Duration,

    /// Faults applied to outgoing packets
    pub faults: FaultConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            generation: ProtocolGeneration::Current,
            protocol_version: None,
            car_connected: true,
            send_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            faults: FaultConfig::none(),
        }
    }
}

impl SimulatorConfig {
    /// Create config for a listen address and generation
    pub fn new(bind_addr: SocketAddr, generation: ProtocolGeneration) -> Self {
        Self {
            bind_addr,
            generation,
            ..Default::default()
        }
    }

    /// Reject values the loops cannot run with
    pub fn validate(&self) -> Result<(), SimulatorError> {
        if self.send_interval.is_zero() {
            return Err(SimulatorError::InvalidConfig(
                "send_interval must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SimulatorError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Version actually written into outgoing headers
    pub fn effective_protocol_version(&self) -> u8 {
        self.protocol_version
            .unwrap_or_else(|| self.generation.default_protocol_version())
    }

    /// Set protocol version override
    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Set initial vehicle presence
    pub fn with_car_connected(mut self, connected: bool) -> Self {
        self.car_connected = connected;
        self
    }

    /// Set state report period
    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Set receive poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set fault toggles
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }
}
