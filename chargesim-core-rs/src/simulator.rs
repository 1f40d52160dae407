//! Charger simulator
//!
//! Owns the socket, the charger state and the fault injector, and runs two
//! loops on the tokio runtime:
//!
//! ```text
//! datagram ─► receive loop ─► decode_command ─► ChargerState::on_command
//!
//! tick ─► send loop ─► ChargerState::sample ─► FaultInjector::apply
//!                                  ─► encode_state ─► datagram to last peer
//! ```
//!
//! Both loops share one mutex around the state and never hold it across
//! an `.await`. Shutdown is a flag each loop checks once per iteration.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::WireCodec;
use crate::config::SimulatorConfig;
use crate::error::{MalformedPacket, SimulatorError};
use crate::fault_injection::FaultInjector;
use crate::state::{ChargerSnapshot, ChargerState};
use crate::transport::{Transport, MAX_DATAGRAM_SIZE};

/// State shared between the loops and the driver
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: ChargerState,
    pub(crate) faults: FaultInjector,
}

/// A running charger simulator
pub struct Simulator {
    local_addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulator {
    /// Bind the socket and start both loops.
    ///
    /// Only an invalid config or a bind failure is reported; everything
    /// after that is handled inside the loops.
    pub async fn start(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        let transport = Transport::bind(config.bind_addr).await?;
        let local_addr = transport.local_addr()?;

        // Starts plugged in and IDLE; the first command derives the real state
        let mut state = ChargerState::new(config.generation, Instant::now());
        if !config.car_connected {
            state.set_vehicle_presence(false);
        }

        let shared = Arc::new(Mutex::new(Shared {
            state,
            faults: FaultInjector::new(config.faults),
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let codec = WireCodec::new(config.generation);

        info!(
            "Charger simulator listening on {} ({} protocol, version {})",
            local_addr,
            config.generation,
            config.effective_protocol_version()
        );
        if config.faults.is_active() {
            warn!("Fault injection active: {:?}", config.faults);
        }

        let receive = tokio::spawn(receive_loop(
            transport.clone(),
            shared.clone(),
            codec,
            config.poll_interval,
            shutdown.clone(),
        ));
        let send = tokio::spawn(send_loop(
            transport,
            shared.clone(),
            codec,
            config.effective_protocol_version(),
            config.send_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            shared,
            shutdown,
            tasks: vec![receive, send],
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Plug in or unplug the simulated vehicle
    pub fn set_vehicle_presence(&self, connected: bool) {
        self.shared.lock().state.set_vehicle_presence(connected);
    }

    /// Current charger state
    pub fn snapshot(&self) -> ChargerSnapshot {
        self.shared.lock().state.snapshot()
    }

    /// Stop both loops and wait for them to exit
    pub async fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Simulator task failed: {}", e);
            }
        }
        info!("Charger simulator stopped");
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

async fn receive_loop(
    transport: Transport,
    shared: Arc<Mutex<Shared>>,
    codec: WireCodec,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while !shutdown.load(Ordering::Relaxed) {
        match transport.try_recv(&mut buf) {
            Ok(Some((len, src))) => {
                // Malformed datagrams are dropped without touching the state
                match handle_datagram(&shared, &codec, &buf[..len], src) {
                    Ok(()) => {}
                    Err(e @ MalformedPacket::WrongLength { .. }) => {
                        debug!("Dropping datagram from {}: {}", src, e)
                    }
                    Err(e @ MalformedPacket::BadMagic { .. }) => {
                        warn!("Dropping datagram from {}: {}", src, e)
                    }
                }
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!("UDP receive error: {}", e);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!("Receive loop stopped");
}

async fn send_loop(
    transport: Transport,
    shared: Arc<Mutex<Shared>>,
    codec: WireCodec,
    version: u8,
    send_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let start = tokio::time::Instant::now() + send_interval;
    let mut ticker = tokio::time::interval_at(start, send_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let Some((bytes, peer)) = prepare_report(&shared, &codec, version, Instant::now()) else {
            continue;
        };

        if let Err(e) = transport.send(&bytes, peer).await {
            warn!("Failed to send state to {}: {}", peer, e);
        }
    }

    debug!("Send loop stopped");
}

/// Decode one datagram and apply it to the state.
///
/// On error the state is left untouched and the caller decides how loudly
/// to log the drop.
pub(crate) fn handle_datagram(
    shared: &Mutex<Shared>,
    codec: &WireCodec,
    bytes: &[u8],
    src: SocketAddr,
) -> Result<(), MalformedPacket> {
    let command = codec.decode_command(bytes)?;

    debug!(
        "recv seq={} version={} allocated={}mA cp_disconnect={} from {}",
        command.header.sequence,
        command.header.version,
        command.allocated_current_ma,
        command.flags.cp_disconnect,
        src
    );

    let mut shared = shared.lock();
    shared.state.record_peer(src);
    shared
        .state
        .on_command(command.allocated_current_ma, command.flags.cp_disconnect);

    Ok(())
}

/// Run one send tick against the state.
///
/// Returns the encoded packet and its destination, or `None` while no
/// manager has been heard from yet.
pub(crate) fn prepare_report(
    shared: &Mutex<Shared>,
    codec: &WireCodec,
    version: u8,
    now: Instant,
) -> Option<(Vec<u8>, SocketAddr)> {
    let mut guard = shared.lock();
    let Shared { state, faults } = &mut *guard;

    let peer = state.last_peer_address()?;
    let timers = state.sample(now);

    let mut packet = state.report(timers, version);
    faults.apply(&mut packet);

    if !faults.freezes_sequence() {
        state.advance_sequence();
    }
    drop(guard);

    debug!(
        "send seq={} version={} iec61851={} charger={} uptime={} charging_time={} allowed={}mA",
        packet.header.sequence,
        packet.header.version,
        packet.iec61851_state,
        packet.charger_state,
        packet.evse_uptime_ms,
        packet.charging_time_ms,
        packet.allowed_charging_current_ma
    );

    Some((codec.encode_state(&packet), peer))
}
