//! PeerMesh signaling relay server -- room discovery and handshake relay
//! for browser peer-to-peer mesh calls.
//!
//! An axum WebSocket server that introduces peers sharing a room and
//! forwards their SDP/ICE handshake payloads. The relay never touches
//! media -- it only brokers who talks to whom.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3001
//! cargo run --bin peermesh-relay
//!
//! # Run on custom address
//! cargo run --bin peermesh-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! PEERMESH_ADDR=127.0.0.1:8080 cargo run --bin peermesh-relay
//! ```

use clap::Parser;
use peermesh_relay::config::{RelayCliArgs, RelayConfig};
use peermesh_relay::relay;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting peermesh relay server");

    match relay::start_server(&config.bind_addr).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
