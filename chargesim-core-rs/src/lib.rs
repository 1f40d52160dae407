//! Charger Simulator Core Library
//!
//! Simulates the charger side of the UDP charge-manager protocol so an
//! energy manager can be integration-tested without charging hardware.
//! Speaks both wire generations and can inject faults into its reports.

pub mod types;
pub mod error;
pub mod codec;
pub mod state;
pub mod fault_injection;
pub mod config;
pub mod transport;
pub mod simulator;

pub use types::*;
pub use error::{MalformedPacket, SimulatorError};
pub use codec::WireCodec;
pub use state::{recompute, ChargerSnapshot, ChargerState, Timers};
pub use fault_injection::{FaultConfig, FaultInjector};
pub use config::SimulatorConfig;
pub use transport::Transport;
pub use simulator::Simulator;
