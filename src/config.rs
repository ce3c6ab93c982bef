// src/config.rs
use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::properties::ConnectionProperties;

pub const CONFIG_FILE_NAME: &str = "amqp-bridge.json";

/// Environment variable for each connection property, with how to read it.
const ENV_VARS: [(&str, &str, EnvKind); 13] = [
    ("AMQP_HOST", "host", EnvKind::Text),
    ("AMQP_PORT", "port", EnvKind::Integer),
    ("AMQP_VHOST", "vhost", EnvKind::Text),
    ("AMQP_LOGIN", "login", EnvKind::Text),
    ("AMQP_PASSWORD", "password", EnvKind::Text),
    ("AMQP_READ_TIMEOUT", "read_timeout", EnvKind::Seconds),
    ("AMQP_WRITE_TIMEOUT", "write_timeout", EnvKind::Seconds),
    ("AMQP_CONNECT_TIMEOUT", "connect_timeout", EnvKind::Seconds),
    ("AMQP_HEARTBEAT", "heartbeat", EnvKind::Integer),
    ("AMQP_KEEPALIVE", "keepalive", EnvKind::Flag),
    ("AMQP_CHANNEL_MAX", "channel_max", EnvKind::Integer),
    ("AMQP_FRAME_MAX", "frame_max", EnvKind::Integer),
    ("AMQP_USE_NATIVE_DRIVER", "use_native_driver", EnvKind::Flag),
];

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Text,
    Integer,
    Seconds,
    Flag,
}

fn parse_env_value(name: &str, raw: &str, kind: EnvKind) -> Result<Value> {
    let raw = raw.trim();
    let value = match kind {
        EnvKind::Text => Value::from(raw),
        EnvKind::Integer => Value::from(
            raw.parse::<u64>()
                .with_context(|| format!("{} must be a non-negative integer, got `{}`", name, raw))?,
        ),
        EnvKind::Seconds => Value::from(
            raw.parse::<f64>()
                .with_context(|| format!("{} must be a number of seconds, got `{}`", name, raw))?,
        ),
        EnvKind::Flag => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Value::from(true),
            "0" | "false" | "no" | "off" => Value::from(false),
            _ => return Err(anyhow!("{} must be a boolean, got `{}`", name, raw)),
        },
    };
    Ok(value)
}

/// Collect overrides from a variable lookup. Unset variables keep their defaults.
fn overrides_from<F>(lookup: F) -> Result<Vec<(String, Value)>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Vec::new();
    for (name, key, kind) in ENV_VARS {
        if let Some(raw) = lookup(name) {
            overrides.push((key.to_string(), parse_env_value(name, &raw, kind)?));
        }
    }
    Ok(overrides)
}

/// Connection properties from `AMQP_*` environment variables, after loading `.env`.
pub fn properties_from_env() -> Result<ConnectionProperties> {
    dotenv().ok();

    let overrides = overrides_from(|name| env::var(name).ok())?;
    debug!(count = overrides.len(), "Loaded connection overrides from environment");

    ConnectionProperties::from_overrides(overrides)
        .context("Environment contains invalid connection properties")
}

pub fn find_config_file() -> Result<PathBuf> {
    let config_dir_file = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", Path::new(CONFIG_FILE_NAME).to_path_buf()),
        ("Current directory (alternative)", config_dir_file),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, ./config or your home directory",
        CONFIG_FILE_NAME
    ))
}

/// Read a JSON object of overrides and lay it over the defaults.
pub fn load_properties(path: &Path) -> Result<ConnectionProperties> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let properties = ConnectionProperties::from_json(&content)
        .with_context(|| format!("Config file {} contains invalid connection properties", path.display()))?;

    info!(path = %path.display(), "Loaded connection properties");
    Ok(properties)
}

/// Config file if one is found, environment otherwise.
pub fn load() -> Result<ConnectionProperties> {
    match find_config_file() {
        Ok(path) => load_properties(&path),
        Err(_) => properties_from_env(),
    }
}
