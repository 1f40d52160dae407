//! Core types for the charge-manager protocol

use serde::{Deserialize, Serialize};

/// Default UDP port the charger listens on
pub const DEFAULT_PORT: u16 = 34128;

/// Magic value at the start of every current-generation packet
pub const PACKET_MAGIC: u16 = 34127;

/// Maximum current the simulated charger advertises (mA)
pub const SUPPORTED_CURRENT_MA: u16 = 32000;

/// Version stamped on outgoing packets when the wrong-version fault is active
pub const WRONG_PROTOCOL_VERSION: u8 = 234;

/// Wire format generation.
///
/// The two generations are incompatible; which one is spoken is a matter
/// of configuration and never inferred from packet contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// 8-bit sequence numbers, no magic or length field
    Legacy,
    /// 16-bit sequence numbers, magic and total-length header fields
    Current,
}

impl ProtocolGeneration {
    /// Exact size of a command packet (manager -> charger)
    pub const fn command_len(self) -> usize {
        match self {
            ProtocolGeneration::Legacy => 6,
            ProtocolGeneration::Current => 12,
        }
    }

    /// Exact size of a state packet (charger -> manager)
    pub const fn state_len(self) -> usize {
        match self {
            ProtocolGeneration::Legacy => 20,
            ProtocolGeneration::Current => 72,
        }
    }

    /// Sequence numbers wrap modulo this value
    pub const fn sequence_modulus(self) -> u32 {
        match self {
            ProtocolGeneration::Legacy => 1 << 8,
            ProtocolGeneration::Current => 1 << 16,
        }
    }

    /// Protocol version written into outgoing headers unless overridden
    pub const fn default_protocol_version(self) -> u8 {
        match self {
            ProtocolGeneration::Legacy => 3,
            ProtocolGeneration::Current => 1,
        }
    }

    /// Charger state reported for a connected vehicle with no allocation.
    ///
    /// Legacy firmware reports "ready to charge" here, the current one
    /// "waiting for release".
    pub const fn idle_connected_charger_state(self) -> ChargerStatus {
        match self {
            ProtocolGeneration::Legacy => ChargerStatus::ReadyToCharge,
            ProtocolGeneration::Current => ChargerStatus::WaitingForRelease,
        }
    }
}

impl std::fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolGeneration::Legacy => write!(f, "legacy"),
            ProtocolGeneration::Current => write!(f, "current"),
        }
    }
}

impl std::str::FromStr for ProtocolGeneration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" | "v0" => Ok(ProtocolGeneration::Legacy),
            "current" | "v1" => Ok(ProtocolGeneration::Current),
            _ => Err(format!("Unknown protocol generation: {}", s)),
        }
    }
}

/// IEC 61851 charging phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Iec61851State {
    /// State A: no vehicle
    Idle = 0,
    /// State B: vehicle connected, not charging
    EvPresent = 1,
    /// State C: charging
    Charging = 2,
    /// State E/F
    Error = 4,
}

/// Charger state as reported to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChargerStatus {
    NotConnected = 0,
    WaitingForRelease = 1,
    ReadyToCharge = 2,
    Charging = 3,
    Error = 4,
}

/// Flags carried by a command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandFlags {
    /// Control pilot is to be permanently disconnected
    pub cp_disconnect: bool,
}

impl CommandFlags {
    pub const CP_DISCONNECT_BIT: u8 = 6;

    /// Parse from the wire byte. Reserved bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            cp_disconnect: bits & (1 << Self::CP_DISCONNECT_BIT) != 0,
        }
    }

    pub fn bits(self) -> u8 {
        u8::from(self.cp_disconnect) << Self::CP_DISCONNECT_BIT
    }
}

/// Flags carried by a state packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateFlags {
    /// Current allocation is controlled by the manager
    pub managed: bool,
    /// Echo of the control pilot disconnect request
    pub cp_disconnect: bool,
}

impl StateFlags {
    pub const MANAGED_BIT: u8 = 7;
    pub const CP_DISCONNECT_BIT: u8 = 6;

    /// Parse from the wire byte. Phase bits (5..0) are not simulated.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            managed: bits & (1 << Self::MANAGED_BIT) != 0,
            cp_disconnect: bits & (1 << Self::CP_DISCONNECT_BIT) != 0,
        }
    }

    pub fn bits(self) -> u8 {
        (u8::from(self.managed) << Self::MANAGED_BIT)
            | (u8::from(self.cp_disconnect) << Self::CP_DISCONNECT_BIT)
    }
}

/// Generation-independent view of a packet header.
///
/// Magic, length and padding are implied by the generation and handled
/// by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub sequence: u16,
    pub version: u8,
}

/// Manager -> charger allocation command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandPacket {
    pub header: PacketHeader,
    pub allocated_current_ma: u16,
    pub flags: CommandFlags,
}

/// Charger -> manager state report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatePacket {
    pub header: PacketHeader,
    pub feature_flags: u32,
    pub evse_uptime_ms: u32,
    pub charging_time_ms: u32,
    pub allowed_charging_current_ma: u16,
    pub supported_current_ma: u16,
    pub iec61851_state: u8,
    pub charger_state: u8,
    pub error_state: u8,
    pub flags: StateFlags,
    pub line_voltages: [f32; 3],
    pub line_currents: [f32; 3],
    pub line_power_factors: [f32; 3],
    pub energy_rel: f32,
    pub energy_abs: f32,
}
