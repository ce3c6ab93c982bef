// src/main.rs
// Connects with the configured properties, opens a channel and reports what the backend offers.

use amqp_bridge::{config, Channel, Connection};
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,amqp_bridge=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let properties = config::load().context("Failed to load connection properties")?;
    let mut connection = Connection::new(properties);

    connection
        .connect()
        .with_context(|| format!("Failed to connect to {}:{}", connection.host(), connection.port()))?;

    let mut channel = Channel::new(&connection).context("Failed to open a channel")?;
    channel.set_prefetch_count(10)?;

    let unknown = |value: Option<String>| value.unwrap_or_else(|| "unknown".to_string());
    info!(
        backend = %connection.backend(),
        channel_id = channel.channel_id(),
        used_channels = connection.used_channels(),
        max_channels = %unknown(connection.max_channels().map(|v| v.to_string())),
        max_frame_size = %unknown(connection.max_frame_size().map(|v| v.to_string())),
        heartbeat = %unknown(connection.heartbeat_interval().map(|v| v.to_string())),
        prefetch_count = channel.prefetch_count(),
        "Broker reachable"
    );

    drop(channel);
    if !connection.disconnect()? {
        warn!("Connection did not close cleanly");
    }

    Ok(())
}
