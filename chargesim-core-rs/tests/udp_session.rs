//! End-to-end tests: a fake energy manager talks to a running simulator
//! over loopback UDP.

use chargesim_core::{
    CommandFlags, CommandPacket, FaultConfig, PacketHeader, ProtocolGeneration, Simulator,
    SimulatorConfig, SimulatorError, StatePacket, WireCodec, WRONG_PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn test_config(generation: ProtocolGeneration) -> SimulatorConfig {
    SimulatorConfig::new("127.0.0.1:0".parse().unwrap(), generation)
        .with_send_interval(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(5))
}

struct Manager {
    socket: UdpSocket,
    codec: WireCodec,
    target: SocketAddr,
    seq: u16,
}

impl Manager {
    async fn new(generation: ProtocolGeneration, target: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            codec: WireCodec::new(generation),
            target,
            seq: 0,
        }
    }

    async fn allocate(&mut self, allocated_current_ma: u16) {
        let bytes = self.codec.encode_command(&CommandPacket {
            header: PacketHeader { sequence: self.seq, version: 1 },
            allocated_current_ma,
            flags: CommandFlags::default(),
        });
        self.seq = self.seq.wrapping_add(1) % 256;
        self.socket.send_to(&bytes, self.target).await.unwrap();
    }

    async fn recv_state(&self) -> StatePacket {
        let mut buf = [0u8; 256];
        let (len, src) = timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .expect("no state packet from simulator")
            .unwrap();
        assert_eq!(src, self.target);
        assert_eq!(len, self.codec.generation().state_len());
        self.codec.decode_state(&buf[..len]).unwrap()
    }

    async fn recv_until(&self, mut pred: impl FnMut(&StatePacket) -> bool) -> StatePacket {
        for _ in 0..40 {
            let packet = self.recv_state().await;
            if pred(&packet) {
                return packet;
            }
        }
        panic!("simulator never reported the expected state");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_charging_session_over_udp() {
    let sim = Simulator::start(test_config(ProtocolGeneration::Current))
        .await
        .unwrap();
    let mut manager = Manager::new(ProtocolGeneration::Current, sim.local_addr()).await;

    manager.allocate(6000).await;

    let charging = manager.recv_until(|p| p.charging_time_ms > 0).await;
    assert_eq!(charging.iec61851_state, 2);
    assert_eq!(charging.charger_state, 3);
    assert_eq!(charging.allowed_charging_current_ma, 6000);
    assert_eq!(charging.supported_current_ma, 32000);
    assert!(charging.flags.managed);
    assert_eq!(charging.header.version, 1);

    // Consecutive reports carry consecutive sequence numbers
    let next = manager.recv_state().await;
    assert_eq!(next.header.sequence, charging.header.sequence.wrapping_add(1));

    manager.allocate(0).await;
    let stopped = manager.recv_until(|p| p.iec61851_state == 1).await;
    assert_eq!(stopped.charging_time_ms, 0);
    assert_eq!(stopped.charger_state, 1);

    sim.set_vehicle_presence(false);
    let idle = manager.recv_until(|p| p.iec61851_state == 0).await;
    assert_eq!(idle.charger_state, 0);

    timeout(RECV_TIMEOUT, sim.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_datagrams_are_ignored() {
    let sim = Simulator::start(test_config(ProtocolGeneration::Current))
        .await
        .unwrap();
    let manager = Manager::new(ProtocolGeneration::Current, sim.local_addr()).await;
    let before = sim.snapshot();

    // Too short, too long, and right size with a bad magic
    manager.socket.send_to(&[0u8; 5], sim.local_addr()).await.unwrap();
    manager.socket.send_to(&[0u8; 40], sim.local_addr()).await.unwrap();
    let mut bad_magic = manager.codec.encode_command(&CommandPacket {
        allocated_current_ma: 16000,
        ..CommandPacket::default()
    });
    bad_magic[0] = 0;
    manager.socket.send_to(&bad_magic, sim.local_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = sim.snapshot();
    assert_eq!(before, after);
    assert_eq!(after.last_peer_address, None);

    // Nobody to report to, so nothing arrives
    let mut buf = [0u8; 256];
    let silent = timeout(Duration::from_millis(200), manager.socket.recv_from(&mut buf)).await;
    assert!(silent.is_err());

    sim.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_legacy_generation_with_faults() {
    let config = test_config(ProtocolGeneration::Legacy).with_faults(FaultConfig {
        freeze_sequence: true,
        wrong_protocol_version: true,
        ..FaultConfig::default()
    });
    let sim = Simulator::start(config).await.unwrap();
    let mut manager = Manager::new(ProtocolGeneration::Legacy, sim.local_addr()).await;

    manager.allocate(0).await;

    let first = manager.recv_state().await;
    let second = manager.recv_state().await;
    assert_eq!(first.header.sequence, 0);
    assert_eq!(second.header.sequence, 0);
    assert_eq!(first.header.version, WRONG_PROTOCOL_VERSION);

    // Legacy firmware reports "ready to charge" for a plugged-in idle car
    assert_eq!(second.iec61851_state, 1);
    assert_eq!(second.charger_state, 2);

    sim.shutdown().await;
}

#[tokio::test]
async fn test_zero_poll_interval_is_rejected() {
    let config = SimulatorConfig::new("127.0.0.1:0".parse().unwrap(), ProtocolGeneration::Legacy)
        .with_poll_interval(Duration::ZERO);
    assert!(matches!(
        Simulator::start(config).await,
        Err(SimulatorError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let holder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let taken = holder.local_addr().unwrap();

    let config = SimulatorConfig::new(taken, ProtocolGeneration::Current);
    match Simulator::start(config).await {
        Err(SimulatorError::Bind { addr, .. }) => assert_eq!(addr, taken),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("bind on an occupied port succeeded"),
    }
}
