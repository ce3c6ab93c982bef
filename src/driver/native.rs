// src/driver/native.rs
// Native driver: the full-featured backend, with persistent connections and introspection.

use lapin::options::{BasicQosOptions, BasicRecoverOptions};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel as LapinChannel, Connection as LapinConnection, ConnectionProperties as LapinProperties};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

use super::{Blocking, ChannelDriver, Driver, DriverKind};
use crate::errors::{DriverError, NOT_IMPLEMENTED};
use crate::properties::ConnectionProperties;

type PersistentRegistry = Mutex<HashMap<String, Arc<LapinConnection>>>;

// Persistent connections outlive the façade objects that opened them
static PERSISTENT: OnceLock<PersistentRegistry> = OnceLock::new();

fn registry() -> &'static PersistentRegistry {
    PERSISTENT.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_registry<T>(f: impl FnOnce(&mut HashMap<String, Arc<LapinConnection>>) -> T) -> Result<T, DriverError> {
    let mut guard = registry()
        .lock()
        .map_err(|_| DriverError::new("Persistent connection registry lock poisoned"))?;
    Ok(f(&mut guard))
}

/// Build the broker URI from the full property set.
pub(crate) fn native_uri(properties: &ConnectionProperties) -> AMQPUri {
    let query = AMQPQueryString {
        frame_max: (properties.frame_max > 0).then_some(properties.frame_max),
        channel_max: (properties.channel_max > 0).then_some(properties.channel_max),
        heartbeat: Some(properties.heartbeat),
        connection_timeout: properties
            .connect_timeout_duration()
            .map(|timeout| timeout.as_millis() as u64),
        ..AMQPQueryString::default()
    };

    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: properties.login.clone(),
                password: properties.password.clone(),
            },
            host: properties.host.clone(),
            port: properties.port,
        },
        vhost: properties.vhost.clone(),
        query,
    }
}

pub struct NativeDriver {
    properties: ConnectionProperties,
    blocking: Blocking,
    connection: Option<Arc<LapinConnection>>,
    persistent: bool,
    channels: Vec<LapinChannel>,
}

impl NativeDriver {
    pub fn new(properties: ConnectionProperties) -> Result<Self, DriverError> {
        // RPCs both write and read, so they wait for the longer of the two timeouts
        let blocking = Blocking::new(properties.read_write_timeout_duration())?;

        Ok(Self {
            properties,
            blocking,
            connection: None,
            persistent: false,
            channels: Vec::new(),
        })
    }

    fn open(&self) -> Result<LapinConnection, DriverError> {
        let uri = native_uri(&self.properties);
        info!(
            host = %self.properties.host,
            port = self.properties.port,
            vhost = %self.properties.vhost,
            "Opening native AMQP connection"
        );

        // The URI carries the connect timeout; lapin enforces it
        self.blocking
            .run_with(None, LapinConnection::connect_uri(uri, LapinProperties::default()))
    }

    fn close(&mut self, connection: Arc<LapinConnection>) -> Result<(), DriverError> {
        self.channels.clear();
        if connection.status().connected() {
            self.blocking
                .run(async move { connection.close(200, "Normal shutdown").await })?;
        }
        Ok(())
    }

    fn close_transient(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.close(connection) {
                warn!(error = %e, "Closing the previous native connection failed, reopening anyway");
            }
        }
    }

    fn connected(&self) -> Option<&Arc<LapinConnection>> {
        self.connection
            .as_ref()
            .filter(|connection| connection.status().connected())
    }
}

impl Driver for NativeDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Native
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        if self.connected().is_some() {
            debug!("Native connection already open");
            return Ok(());
        }

        let connection = self.open()?;
        self.connection = Some(Arc::new(connection));
        self.persistent = false;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        if self.persistent {
            return Err(DriverError::new(
                "Attempt to close a persistent connection with disconnect. Use pdisconnect instead.",
            ));
        }

        match self.connection.take() {
            Some(connection) => self.close(connection),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected().is_some()
    }

    fn open_channel(&mut self) -> Result<Box<dyn ChannelDriver>, DriverError> {
        let connection = self.connected().cloned().ok_or_else(DriverError::not_connected)?;
        let channel = self
            .blocking
            .run(async move { connection.create_channel().await })?;

        debug!(channel_id = channel.id(), "Native channel opened");
        self.channels.retain(|open| open.status().connected());
        self.channels.push(channel.clone());

        Ok(Box::new(NativeChannel {
            channel,
            blocking: self.blocking.clone(),
            prefetch_count: 0,
            prefetch_size: 0,
        }))
    }

    fn used_channels(&self) -> u16 {
        if self.connected().is_none() {
            return 0;
        }
        self.channels
            .iter()
            .filter(|channel| channel.status().connected())
            .count() as u16
    }

    fn reconnect(&mut self) -> Result<(), DriverError> {
        if self.persistent {
            return self.preconnect();
        }

        // A handle whose connect failed holds no connection and just connects again
        self.close_transient();
        self.connect()
    }

    fn pconnect(&mut self) -> Result<(), DriverError> {
        let key = self.properties.persistent_key();
        let endpoint = self.properties.endpoint_key();

        let existing = with_registry(|registry| {
            registry
                .get(&key)
                .filter(|connection| connection.status().connected())
                .cloned()
        })?;

        let connection = match existing {
            Some(connection) => {
                debug!(endpoint = %endpoint, "Reusing persistent connection");
                connection
            }
            None => {
                let connection = Arc::new(self.open()?);
                with_registry(|registry| registry.insert(key.clone(), connection.clone()))?;
                info!(endpoint = %endpoint, "Registered persistent connection");
                connection
            }
        };

        self.connection = Some(connection);
        self.persistent = true;
        Ok(())
    }

    fn pdisconnect(&mut self) -> Result<(), DriverError> {
        if !self.persistent {
            return Err(DriverError::new(
                "Attempt to close a transient connection with pdisconnect. Use disconnect instead.",
            ));
        }

        let key = self.properties.persistent_key();
        with_registry(|registry| registry.remove(&key))?;

        self.persistent = false;
        match self.connection.take() {
            Some(connection) => self.close(connection),
            None => Ok(()),
        }
    }

    fn preconnect(&mut self) -> Result<(), DriverError> {
        if self.persistent {
            self.pdisconnect()?;
        } else {
            self.close_transient();
        }
        self.pconnect()
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn max_channels(&self) -> Option<u16> {
        self.connected().map(|c| c.configuration().channel_max())
    }

    fn max_frame_size(&self) -> Option<u32> {
        self.connected().map(|c| c.configuration().frame_max())
    }

    fn heartbeat_interval(&self) -> Option<u16> {
        self.connected().map(|c| c.configuration().heartbeat())
    }
}

/// Channel on the native backend. Remembers the QoS it applied so it can be
/// queried back, which is what the native handle offers callers.
pub struct NativeChannel {
    channel: LapinChannel,
    blocking: Blocking,
    prefetch_count: u16,
    prefetch_size: u32,
}

impl ChannelDriver for NativeChannel {
    fn channel_id(&self) -> u16 {
        self.channel.id()
    }

    fn tx_select(&mut self) -> Result<(), DriverError> {
        let channel = self.channel.clone();
        self.blocking.run(async move { channel.tx_select().await })
    }

    fn tx_commit(&mut self) -> Result<(), DriverError> {
        let channel = self.channel.clone();
        self.blocking.run(async move { channel.tx_commit().await })
    }

    fn tx_rollback(&mut self) -> Result<(), DriverError> {
        let channel = self.channel.clone();
        self.blocking.run(async move { channel.tx_rollback().await })
    }

    fn qos(&mut self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), DriverError> {
        if prefetch_size > 0 {
            return Err(DriverError::new("prefetch_size is not supported by this driver")
                .with_code(NOT_IMPLEMENTED));
        }

        let channel = self.channel.clone();
        self.blocking.run(async move {
            channel
                .basic_qos(prefetch_count, BasicQosOptions { global })
                .await
        })?;

        self.prefetch_count = prefetch_count;
        self.prefetch_size = prefetch_size;
        Ok(())
    }

    fn set_prefetch_count(&mut self, count: u16) -> Result<(), DriverError> {
        self.qos(0, count, false)
    }

    fn set_prefetch_size(&mut self, size: u32) -> Result<(), DriverError> {
        // Count and size are exclusive: setting one clears the other
        self.prefetch_count = 0;
        self.qos(size, 0, false)
    }

    fn prefetch_count(&self) -> Option<u16> {
        Some(self.prefetch_count)
    }

    fn prefetch_size(&self) -> Option<u32> {
        Some(self.prefetch_size)
    }

    fn basic_recover(&mut self, requeue: bool) -> Result<(), DriverError> {
        let channel = self.channel.clone();
        self.blocking
            .run(async move { channel.basic_recover(BasicRecoverOptions { requeue }).await })
    }

    fn is_connected(&self) -> Option<bool> {
        Some(self.channel.status().connected())
    }
}
