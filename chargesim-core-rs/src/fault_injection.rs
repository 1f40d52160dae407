//! Fault injection for negative testing of the manager
//!
//! Each toggle perturbs only the outgoing state packet:
//! - Frozen sequence number
//! - Frozen uptime
//! - Out-of-range protocol version
//! - Forced control pilot disconnect echo
//!
//! None of them touch the charger state itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{StatePacket, WRONG_PROTOCOL_VERSION};

/// Fault toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Keep sending the same sequence number
    pub freeze_sequence: bool,
    /// Keep sending the last reported uptime
    pub freeze_uptime: bool,
    /// Send `WRONG_PROTOCOL_VERSION` instead of the configured version
    pub wrong_protocol_version: bool,
    /// Always set the cp disconnect echo flag
    pub echo_cp_disconnect: bool,
}

impl FaultConfig {
    /// No faults (happy path)
    pub fn none() -> Self {
        Self::default()
    }

    /// Every fault at once
    pub fn all() -> Self {
        Self {
            freeze_sequence: true,
            freeze_uptime: true,
            wrong_protocol_version: true,
            echo_cp_disconnect: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.freeze_sequence
            || self.freeze_uptime
            || self.wrong_protocol_version
            || self.echo_cp_disconnect
    }
}

impl std::str::FromStr for FaultConfig {
    type Err = String;

    /// Parse a comma separated fault list, e.g. `freeze-sequence,wrong-version`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = FaultConfig::none();

        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_lowercase().as_str() {
                "none" => {}
                "all" => config = FaultConfig::all(),
                "freeze-sequence" | "freeze_sequence" => config.freeze_sequence = true,
                "freeze-uptime" | "freeze_uptime" => config.freeze_uptime = true,
                "wrong-version" | "wrong_version" | "wrong-protocol-version" => {
                    config.wrong_protocol_version = true
                }
                "echo-cp-disconnect" | "echo_cp_disconnect" => config.echo_cp_disconnect = true,
                _ => return Err(format!("Unknown fault: {}", name)),
            }
        }

        Ok(config)
    }
}

/// Applies the configured faults to outgoing packets
#[derive(Debug, Clone)]
pub struct FaultInjector {
    config: FaultConfig,
    last_uptime_ms: Option<u32>,
}

impl FaultInjector {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            last_uptime_ms: None,
        }
    }

    /// Whether the send loop should hold the sequence counter
    pub fn freezes_sequence(&self) -> bool {
        self.config.freeze_sequence
    }

    /// Perturb one outgoing packet.
    ///
    /// The first packet always carries the true uptime; with `freeze_uptime`
    /// every later packet repeats the last reported value.
    pub fn apply(&mut self, packet: &mut StatePacket) {
        if self.config.freeze_uptime {
            if let Some(last) = self.last_uptime_ms {
                packet.evse_uptime_ms = last;
            }
        }
        self.last_uptime_ms = Some(packet.evse_uptime_ms);

        if self.config.wrong_protocol_version {
            packet.header.version = WRONG_PROTOCOL_VERSION;
        }

        if self.config.echo_cp_disconnect {
            packet.flags.cp_disconnect = true;
        }

        if self.config.is_active() {
            debug!(
                "Faults applied: seq={} version={} uptime={}",
                packet.header.sequence, packet.header.version, packet.evse_uptime_ms
            );
        }
    }
}
