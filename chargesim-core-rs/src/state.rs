//! Charger state machine
//!
//! Driven from two sides:
//! - commands from the manager (`on_command`)
//! - the driver toggling vehicle presence (`set_vehicle_presence`)
//!
//! and sampled once per send tick for the time-derived fields.

use serde::Serialize;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::{
    ChargerStatus, Iec61851State, PacketHeader, ProtocolGeneration, StateFlags, StatePacket,
    SUPPORTED_CURRENT_MA,
};

/// Derive the reported states from presence and allocation
pub fn recompute(
    generation: ProtocolGeneration,
    car_connected: bool,
    allocated_current_ma: u16,
) -> (Iec61851State, ChargerStatus) {
    match (car_connected, allocated_current_ma) {
        (false, _) => (Iec61851State::Idle, ChargerStatus::NotConnected),
        (true, 0) => (
            Iec61851State::EvPresent,
            generation.idle_connected_charger_state(),
        ),
        (true, _) => (Iec61851State::Charging, ChargerStatus::Charging),
    }
}

/// Timer values produced by one send tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timers {
    pub uptime_ms: u32,
    pub charging_time_ms: u32,
}

/// Device-side state of the simulated charger
#[derive(Debug, Clone)]
pub struct ChargerState {
    generation: ProtocolGeneration,
    start_time: Instant,

    car_connected: bool,
    allocated_current_ma: u16,
    cp_disconnect_requested: bool,
    iec61851_state: Iec61851State,
    charger_state: ChargerStatus,
    error_state: u8,
    charging_time_start: Option<Instant>,

    next_sequence: u16,
    last_peer_address: Option<SocketAddr>,
}

/// Read-only copy of the charger state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargerSnapshot {
    pub generation: ProtocolGeneration,
    pub car_connected: bool,
    pub allocated_current_ma: u16,
    pub cp_disconnect_requested: bool,
    pub iec61851_state: Iec61851State,
    pub charger_state: ChargerStatus,
    pub error_state: u8,
    pub charging: bool,
    pub next_sequence: u16,
    pub last_peer_address: Option<SocketAddr>,
}

impl ChargerState {
    /// Fresh state at simulator start. The vehicle starts out plugged in.
    pub fn new(generation: ProtocolGeneration, start_time: Instant) -> Self {
        Self {
            generation,
            start_time,
            car_connected: true,
            allocated_current_ma: 0,
            cp_disconnect_requested: false,
            iec61851_state: Iec61851State::Idle,
            charger_state: ChargerStatus::NotConnected,
            error_state: 0,
            charging_time_start: None,
            next_sequence: 0,
            last_peer_address: None,
        }
    }

    pub fn iec61851_state(&self) -> Iec61851State {
        self.iec61851_state
    }

    pub fn charger_state(&self) -> ChargerStatus {
        self.charger_state
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    pub fn last_peer_address(&self) -> Option<SocketAddr> {
        self.last_peer_address
    }

    pub fn is_charging_timer_running(&self) -> bool {
        self.charging_time_start.is_some()
    }

    /// Handle an allocation command from the manager
    pub fn on_command(&mut self, allocated_current_ma: u16, cp_disconnect: bool) {
        self.allocated_current_ma = allocated_current_ma;
        self.cp_disconnect_requested = cp_disconnect;

        if allocated_current_ma == 0 && self.iec61851_state == Iec61851State::Charging {
            self.charging_time_start = None;
            self.iec61851_state = Iec61851State::EvPresent;
            self.charger_state = ChargerStatus::WaitingForRelease;
            info!("Allocation withdrawn, charging stopped");
        }

        self.update();
    }

    /// Plug in or unplug the simulated vehicle
    pub fn set_vehicle_presence(&mut self, connected: bool) {
        if self.car_connected != connected {
            info!("Vehicle {}", if connected { "connected" } else { "disconnected" });
        }
        self.car_connected = connected;
        self.update();
    }

    /// Remember where the last valid command came from
    pub fn record_peer(&mut self, addr: SocketAddr) {
        if self.last_peer_address != Some(addr) {
            info!("Manager peer is now {}", addr);
        }
        self.last_peer_address = Some(addr);
    }

    /// Advance the charging timer for this tick and return the timer values.
    pub fn sample(&mut self, now: Instant) -> Timers {
        let charging = self.iec61851_state == Iec61851State::Charging;
        match (charging, self.charging_time_start) {
            (true, None) => {
                debug!("Charging timer started");
                self.charging_time_start = Some(now);
            }
            (false, Some(_)) => {
                debug!("Charging timer cleared");
                self.charging_time_start = None;
            }
            _ => {}
        }

        Timers {
            uptime_ms: wrapping_millis(now.saturating_duration_since(self.start_time)),
            charging_time_ms: self
                .charging_time_start
                .map(|start| wrapping_millis(now.saturating_duration_since(start)))
                .unwrap_or(0),
        }
    }

    /// Build the state report for the current tick
    pub fn report(&self, timers: Timers, version: u8) -> StatePacket {
        StatePacket {
            header: PacketHeader {
                sequence: self.next_sequence,
                version,
            },
            feature_flags: 0,
            evse_uptime_ms: timers.uptime_ms,
            charging_time_ms: timers.charging_time_ms,
            allowed_charging_current_ma: self.allocated_current_ma,
            supported_current_ma: SUPPORTED_CURRENT_MA,
            iec61851_state: self.iec61851_state as u8,
            charger_state: self.charger_state as u8,
            error_state: self.error_state,
            flags: StateFlags {
                managed: true,
                cp_disconnect: self.cp_disconnect_requested,
            },
            ..StatePacket::default()
        }
    }

    /// Step the sequence counter, wrapping per generation
    pub fn advance_sequence(&mut self) {
        let next = (u32::from(self.next_sequence) + 1) % self.generation.sequence_modulus();
        self.next_sequence = next as u16;
    }

    pub fn snapshot(&self) -> ChargerSnapshot {
        ChargerSnapshot {
            generation: self.generation,
            car_connected: self.car_connected,
            allocated_current_ma: self.allocated_current_ma,
            cp_disconnect_requested: self.cp_disconnect_requested,
            iec61851_state: self.iec61851_state,
            charger_state: self.charger_state,
            error_state: self.error_state,
            charging: self.charging_time_start.is_some(),
            next_sequence: self.next_sequence,
            last_peer_address: self.last_peer_address,
        }
    }

    fn update(&mut self) {
        let (iec, charger) = recompute(self.generation, self.car_connected, self.allocated_current_ma);
        if iec != self.iec61851_state {
            debug!("IEC 61851 state {:?} -> {:?}", self.iec61851_state, iec);
        }
        self.iec61851_state = iec;
        self.charger_state = charger;
    }
}

/// Milliseconds truncated to 32 bits, wrapping like the firmware counter
fn wrapping_millis(d: Duration) -> u32 {
    d.as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(generation: ProtocolGeneration) -> (ChargerState, Instant) {
        let t0 = Instant::now();
        (ChargerState::new(generation, t0), t0)
    }

    #[test]
    fn test_recompute_table() {
        use ProtocolGeneration::*;

        for generation in [Legacy, Current] {
            for allocated in [0, 1, 6000, u16::MAX] {
                assert_eq!(
                    recompute(generation, false, allocated),
                    (Iec61851State::Idle, ChargerStatus::NotConnected)
                );
            }
            assert_eq!(
                recompute(generation, true, 6000),
                (Iec61851State::Charging, ChargerStatus::Charging)
            );
        }

        assert_eq!(
            recompute(Current, true, 0),
            (Iec61851State::EvPresent, ChargerStatus::WaitingForRelease)
        );
        assert_eq!(
            recompute(Legacy, true, 0),
            (Iec61851State::EvPresent, ChargerStatus::ReadyToCharge)
        );
    }

    #[test]
    fn test_initial_state() {
        let (state, _) = state(ProtocolGeneration::Current);
        let snap = state.snapshot();
        assert!(snap.car_connected);
        assert_eq!(snap.allocated_current_ma, 0);
        assert_eq!(snap.iec61851_state, Iec61851State::Idle);
        assert_eq!(snap.next_sequence, 0);
        assert_eq!(snap.last_peer_address, None);
        assert!(!snap.charging);
    }

    #[test]
    fn test_command_drives_state() {
        let (mut state, _) = state(ProtocolGeneration::Current);

        state.on_command(0, false);
        assert_eq!(state.iec61851_state(), Iec61851State::EvPresent);
        assert_eq!(state.charger_state(), ChargerStatus::WaitingForRelease);

        state.on_command(6000, false);
        assert_eq!(state.iec61851_state(), Iec61851State::Charging);
        assert_eq!(state.charger_state() as u8, 3);
    }

    #[test]
    fn test_legacy_stop_reports_ready_to_charge() {
        let (mut state, _) = state(ProtocolGeneration::Legacy);
        state.on_command(6000, false);
        state.on_command(0, false);

        assert_eq!(state.iec61851_state(), Iec61851State::EvPresent);
        assert_eq!(state.charger_state(), ChargerStatus::ReadyToCharge);
    }

    #[test]
    fn test_unplugged_is_idle_regardless_of_allocation() {
        let (mut state, _) = state(ProtocolGeneration::Current);
        state.on_command(16000, false);
        state.set_vehicle_presence(false);

        assert_eq!(state.iec61851_state(), Iec61851State::Idle);
        assert_eq!(state.charger_state() as u8, 0);

        state.set_vehicle_presence(true);
        assert_eq!(state.iec61851_state(), Iec61851State::Charging);
    }

    #[test]
    fn test_allowed_current_echoes_allocation() {
        let (mut state, t0) = state(ProtocolGeneration::Current);
        state.set_vehicle_presence(false);
        state.on_command(12345, true);

        let packet = state.report(state.clone().sample(t0), 1);
        assert_eq!(packet.allowed_charging_current_ma, 12345);
        assert_eq!(packet.supported_current_ma, 32000);
        assert!(packet.flags.managed);
        assert!(packet.flags.cp_disconnect);
    }

    #[test]
    fn test_charging_timer_lifecycle() {
        let (mut state, t0) = state(ProtocolGeneration::Current);

        state.on_command(6000, false);
        assert!(!state.is_charging_timer_running());

        // First tick in CHARGING starts the timer
        let timers = state.sample(t0 + Duration::from_secs(1));
        assert_eq!(timers.charging_time_ms, 0);
        assert_eq!(timers.uptime_ms, 1000);

        let timers = state.sample(t0 + Duration::from_secs(3));
        assert_eq!(timers.charging_time_ms, 2000);
        assert_eq!(timers.uptime_ms, 3000);

        // Withdrawing the allocation stops charging immediately
        state.on_command(0, false);
        assert!(!state.is_charging_timer_running());
        let timers = state.sample(t0 + Duration::from_secs(4));
        assert_eq!(timers.charging_time_ms, 0);
        assert_eq!(state.iec61851_state(), Iec61851State::EvPresent);
    }

    #[test]
    fn test_unplug_clears_timer_on_next_tick() {
        let (mut state, t0) = state(ProtocolGeneration::Legacy);
        state.on_command(6000, false);
        state.sample(t0);

        state.set_vehicle_presence(false);
        assert!(state.is_charging_timer_running());

        let timers = state.sample(t0 + Duration::from_secs(2));
        assert_eq!(timers.charging_time_ms, 0);
        assert!(!state.is_charging_timer_running());
    }

    #[test]
    fn test_timer_restarts_on_new_session() {
        let (mut state, t0) = state(ProtocolGeneration::Current);
        state.on_command(6000, false);
        state.sample(t0);
        state.on_command(0, false);
        state.sample(t0 + Duration::from_secs(5));

        state.on_command(6000, false);
        let timers = state.sample(t0 + Duration::from_secs(10));
        assert_eq!(timers.charging_time_ms, 0);
        let timers = state.sample(t0 + Duration::from_secs(11));
        assert_eq!(timers.charging_time_ms, 1000);
    }

    #[test]
    fn test_sequence_wraps_per_generation() {
        let (mut legacy, _) = state(ProtocolGeneration::Legacy);
        for _ in 0..256 {
            legacy.advance_sequence();
        }
        assert_eq!(legacy.next_sequence(), 0);
        legacy.advance_sequence();
        assert_eq!(legacy.next_sequence(), 1);

        let (mut current, _) = state(ProtocolGeneration::Current);
        for _ in 0..256 {
            current.advance_sequence();
        }
        assert_eq!(current.next_sequence(), 256);
        for _ in 256..65536 {
            current.advance_sequence();
        }
        assert_eq!(current.next_sequence(), 0);
    }

    #[test]
    fn test_record_peer() {
        let (mut state, _) = state(ProtocolGeneration::Current);
        let addr: SocketAddr = "192.168.1.10:34127".parse().unwrap();
        state.record_peer(addr);
        assert_eq!(state.last_peer_address(), Some(addr));
    }
}
