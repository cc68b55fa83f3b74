//! E1.33 device daemon.
//!
//!   e133-device --config device.toml
//!   e133-device --listen 127.0.0.1 --port 5569 --health-check-interval-ms 500

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use e133_device::{DeviceConfig, E133Device, LabelResponder};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "e133-device")]
#[command(about = "E1.33 device: answers RDM requests over UDP and TCP")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "E133_DEVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind both sockets to
    #[arg(long)]
    listen: Option<Ipv4Addr>,

    /// UDP and TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Heartbeat period for the TCP connection
    #[arg(long)]
    health_check_interval_ms: Option<u64>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => DeviceConfig::load(path)?,
            None => DeviceConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.health_check_interval_ms {
            config.health_check_interval_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("e133_device=info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    let device = E133Device::new(config.clone());
    tracing::info!("Device CID is {}", device.cid());

    device.set_root_endpoint(Arc::new(LabelResponder::new(
        config.root_uid,
        config.root_label.as_str(),
    )));

    let mut registered = Vec::new();
    for endpoint in &config.endpoints {
        let uid = config.endpoint_uid(endpoint);
        let label = endpoint
            .label
            .clone()
            .unwrap_or_else(|| format!("Endpoint {}", endpoint.id));
        device
            .registry()
            .register(endpoint.id, Arc::new(LabelResponder::new(uid, label)))
            .with_context(|| format!("registering endpoint {}", endpoint.id))?;
        registered.push(endpoint.id);
    }

    let running = device.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for id in registered {
        running.registry().unregister(id)?;
    }
    let stats = running.tcp_stats();
    tracing::info!(
        "TCP connections: {}, unhealthy: {}",
        stats.connection_events,
        stats.unhealthy_events
    );
    running.shutdown().await;
    Ok(())
}
