//! Interactive motor monitor.
//!
//! Connects to a controller, prints every status line with its angle, and
//! sends each line typed on stdin as a command.
//!
//! ```text
//! cargo run --example monitor -- --tcp 192.168.1.40:8888
//! cargo run --example monitor --features ble
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use motorlink::transport::{Connector, TcpConnector};
use motorlink::{SessionConfig, SessionManager};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Monitor and drive a stepper-motor controller")]
struct Args {
    /// Controller TCP endpoint. Without it, the controller is found over BLE.
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Advertised device names to accept.
    #[arg(long = "name", default_values_t = ["StepperMotor".to_string(), "Arduino".to_string()])]
    names: Vec<String>,

    /// Discovery timeout in seconds.
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    /// Optional JSON session configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("motorlink=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SessionConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::new(),
    }
    .device_names(args.names.clone())
    .scan_timeout(Duration::from_secs(args.scan_timeout));

    match args.tcp {
        Some(addr) => {
            let name = config.device_names.first().cloned().unwrap_or_default();
            run(TcpConnector::new().endpoint(name, addr), config).await?
        }
        None => run_ble(config).await?,
    }
    Ok(())
}

#[cfg(feature = "ble")]
async fn run_ble(config: SessionConfig) -> motorlink::Result<()> {
    let connector = motorlink::transport::ble::BleConnector::new().await?;
    run(connector, config).await
}

#[cfg(not(feature = "ble"))]
async fn run_ble(_config: SessionConfig) -> motorlink::Result<()> {
    Err(motorlink::LinkError::InvalidArgument(
        "built without BLE support; pass --tcp <addr> or enable feature `ble`".to_string(),
    ))
}

async fn run<C: Connector>(connector: C, config: SessionConfig) -> motorlink::Result<()> {
    let manager = SessionManager::new(connector, config);
    manager.subscribe(|msg| match msg.angle() {
        Some(angle) => println!("< {}  [{angle:.1} deg]", msg.text),
        None => println!("< {}", msg.text),
    });

    println!("Scanning...");
    let session = manager.connect().await?;
    println!("Connected to {}. Type commands (a90, r-15, z, s, p, v3, h), 'quit' to exit.", session.peer());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.eq_ignore_ascii_case("quit") {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                match manager.send_text(line).await {
                    Ok(()) => println!("> {line}"),
                    Err(e) => eprintln!("! {e}"),
                }
            }
            _ = session.closed() => {
                eprintln!("! connection lost");
                break;
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}
