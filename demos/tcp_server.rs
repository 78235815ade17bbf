//! Multi-peer TCP server with an operator console.
//!
//! Controllers on Wi-Fi connect to this host; lines they send are printed,
//! and console commands are broadcast to all of them.
//!
//! ```text
//! cargo run --example tcp_server -- --port 8888
//! ```

use std::sync::Arc;

use clap::Parser;
use motorlink::config::{ServerConfig, DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
use motorlink::server::{OperatorCommand, OperatorOutcome, TcpServer, HELP};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Accept controller connections and broadcast commands")]
struct Args {
    /// Interface to listen on.
    #[arg(long, default_value = DEFAULT_BIND_ADDRESS)]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("motorlink=info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_address: args.host,
        port: args.port,
        ..ServerConfig::default()
    };

    let server = Arc::new(TcpServer::bind(&config).await?);
    println!("Server started on {}", server.local_addr()?);
    server
        .dispatcher()
        .subscribe(|msg| println!("From {}: {}", msg.peer, msg.text));

    let cancel = CancellationToken::new();
    let accept = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { server.run(cancel).await })
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match OperatorCommand::parse(&line) {
                    Ok(command) => command,
                    Err(_) => {
                        println!("Unknown command. Type 'help' for available commands.");
                        continue;
                    }
                };
                match server.execute(&command).await {
                    OperatorOutcome::Peers(peers) if peers.is_empty() => println!("No clients connected"),
                    OperatorOutcome::Peers(peers) => {
                        println!("Connected clients:");
                        for (i, peer) in peers.iter().enumerate() {
                            println!("  {}. {} ({})", i + 1, peer.peer, peer.state);
                        }
                    }
                    OperatorOutcome::Broadcast { attempted: 0 } => println!("No clients connected"),
                    OperatorOutcome::Broadcast { attempted } => {
                        println!("Sent to {attempted} client(s)")
                    }
                    OperatorOutcome::Help(text) => println!("{text}"),
                    OperatorOutcome::Quit => break,
                }
            }
        }
    }

    println!("Shutting down server...");
    cancel.cancel();
    accept.await??;
    Ok(())
}
