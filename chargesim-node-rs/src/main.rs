//! Charger Simulator Node
//!
//! Runs a simulated charger that an energy manager can allocate current to.
//!
//! # Usage
//!
//! ```bash
//! # Current protocol on the default port
//! chargesim-node --listen 192.168.178.27
//!
//! # Legacy protocol, manager should see a frozen uptime
//! chargesim-node --generation legacy --faults freeze-uptime
//! ```

use chargesim_core::{FaultConfig, ProtocolGeneration, Simulator, SimulatorConfig, DEFAULT_PORT};
use clap::Parser;
use std::io::{self, BufRead};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulated charger for energy manager integration tests
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Local address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    listen: IpAddr,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Wire format (legacy, current)
    #[arg(short, long, default_value = "current")]
    generation: ProtocolGeneration,

    /// Override the protocol version sent in state packets
    #[arg(long)]
    protocol_version: Option<u8>,

    /// Comma separated faults (freeze-sequence, freeze-uptime, wrong-version, echo-cp-disconnect, all)
    #[arg(short, long, default_value = "none")]
    faults: FaultConfig,

    /// Start without a vehicle plugged in
    #[arg(long)]
    no_car: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Commands read from stdin
#[derive(Debug)]
enum Command {
    Presence(bool),
    State,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = SimulatorConfig::new(SocketAddr::new(args.listen, args.port), args.generation)
        .with_car_connected(!args.no_car)
        .with_faults(args.faults);
    if let Some(version) = args.protocol_version {
        config = config.with_protocol_version(version);
    }

    let sim = Simulator::start(config).await?;

    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);

    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  connect       - Plug the vehicle in");
        println!("  disconnect    - Unplug the vehicle");
        println!("  ma <value>    - Simulated consumption in mA (0 = no vehicle)");
        println!("  state         - Show charger state");
        println!("  quit          - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }

            let command = match parts[0] {
                "connect" => Command::Presence(true),
                "disconnect" => Command::Presence(false),
                "ma" if parts.len() >= 2 => match parts[1].parse::<f64>() {
                    Ok(value) => Command::Presence(value != 0.0),
                    Err(_) => {
                        println!("Invalid value (must be a number)");
                        continue;
                    }
                },
                "state" => Command::State,
                "quit" | "exit" => Command::Quit,
                _ => {
                    println!("Unknown command. Try: connect, disconnect, ma <value>, state, quit");
                    continue;
                }
            };

            if command_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            command = command_rx.recv() => match command {
                Some(Command::Presence(connected)) => sim.set_vehicle_presence(connected),
                Some(Command::State) => {
                    println!("{}", serde_json::to_string_pretty(&sim.snapshot())?);
                }
                Some(Command::Quit) => break,
                None => {
                    // stdin closed, keep simulating until interrupted
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    info!("Shutting down");
    sim.shutdown().await;

    Ok(())
}
