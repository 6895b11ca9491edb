//! Bridge entry point.
//!
//! Loads the TOML configuration, wires the CAN system to the MQTT bridge,
//! and runs until SIGINT/SIGTERM. Exit code 0 on graceful stop; non-zero on
//! fatal configuration or MQTT authentication errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scheiber_bridge::can::CanBus;
use scheiber_bridge::core::{BridgeConfig, BridgeError, Result};
use scheiber_bridge::mqtt::MqttBridge;
use scheiber_bridge::system::System;

/// Scheiber CAN to MQTT bridge with Home Assistant discovery.
#[derive(Parser, Debug)]
#[command(name = "scheiber-bridge", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    config: PathBuf,

    /// Never send CAN frames or execute MQTT commands
    #[arg(long)]
    read_only: bool,
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(&args.config).map_err(|e| {
        BridgeError::Config(format!(
            "cannot read {}: {}",
            args.config.display(),
            e
        ))
    })?;

    let mut config: BridgeConfig =
        toml::from_str(&raw).map_err(|e| BridgeError::Config(e.to_string()))?;

    if args.read_only {
        config.read_only = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: BridgeConfig) -> Result<()> {
    let bus = Arc::new(CanBus::new(&config.can_interface, config.read_only));
    let system = Arc::new(System::from_config(&config, Arc::clone(&bus))?);
    let (bridge, eventloop) = MqttBridge::new(&config, &system)?;
    let bridge = Arc::new(bridge);

    system.start()?;
    bridge.announce();

    let runner = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.run(eventloop).await })
    };

    let outcome = tokio::select! {
        result = runner => match result {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Ok(()),
            Err(e) => Err(BridgeError::Connection(format!("MQTT task failed: {}", e))),
        },
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    system.stop();
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        can_interface = %config.can_interface,
        devices = config.devices.len(),
        read_only = config.read_only,
        "starting bridge"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
    }
}
