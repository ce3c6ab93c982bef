// src/driver/stream.rs
// Stream driver: a plain socket connection opened from a fixed argument list.
// It keeps no negotiated-limit introspection, no persistence and no channel status.

use lapin::options::{BasicQosOptions, BasicRecoverOptions};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo, SASLMechanism};
use lapin::{Channel as LapinChannel, Connection as LapinConnection, ConnectionProperties as LapinProperties};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Blocking, ChannelDriver, Driver, DriverKind};
use crate::errors::{DriverError, NOT_IMPLEMENTED};
use crate::properties::ConnectionProperties;

pub const LOGIN_METHOD: SASLMechanism = SASLMechanism::Plain;
pub const LOCALE: &str = "en_US";

/// Everything the stream connection is opened with, derived from the
/// connection properties. `channel_max` and `frame_max` are not part of it.
/// lapin never sends the legacy `insist` bit, so that field is always `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamArguments {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub vhost: String,
    pub insist: bool,
    pub login_method: SASLMechanism,
    pub locale: &'static str,
    pub connect_timeout: f64,
    pub read_write_timeout: f64,
    pub tls: bool,
    pub keepalive: bool,
    pub heartbeat: u16,
}

impl StreamArguments {
    pub fn from_properties(properties: &ConnectionProperties) -> Self {
        Self {
            host: properties.host.clone(),
            port: properties.port,
            login: properties.login.clone(),
            password: properties.password.clone(),
            vhost: properties.vhost.clone(),
            insist: false,
            login_method: LOGIN_METHOD,
            locale: LOCALE,
            connect_timeout: properties.connect_timeout,
            read_write_timeout: properties.read_write_timeout(),
            tls: false,
            keepalive: properties.keepalive,
            heartbeat: properties.heartbeat,
        }
    }

    fn read_write_timeout_duration(&self) -> Option<Duration> {
        (self.read_write_timeout > 0.0).then(|| Duration::from_secs_f64(self.read_write_timeout))
    }

    pub(crate) fn uri(&self) -> AMQPUri {
        let query = AMQPQueryString {
            heartbeat: Some(self.heartbeat),
            connection_timeout: (self.connect_timeout > 0.0)
                .then(|| (self.connect_timeout * 1000.0) as u64),
            auth_mechanism: Some(self.login_method),
            ..AMQPQueryString::default()
        };

        AMQPUri {
            scheme: if self.tls { AMQPScheme::AMQPS } else { AMQPScheme::AMQP },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.login.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query,
        }
    }

    fn lapin_properties(&self) -> LapinProperties {
        let mut properties = LapinProperties::default();
        properties.locale = self.locale.to_string();
        properties
    }
}

pub struct StreamDriver {
    arguments: StreamArguments,
    blocking: Blocking,
    connection: Option<LapinConnection>,
    channel_id: u16,
}

impl StreamDriver {
    pub fn new(arguments: StreamArguments) -> Result<Self, DriverError> {
        let blocking = Blocking::new(arguments.read_write_timeout_duration())?;

        Ok(Self {
            arguments,
            blocking,
            connection: None,
            channel_id: 0,
        })
    }

    pub fn arguments(&self) -> &StreamArguments {
        &self.arguments
    }
}

impl Driver for StreamDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Stream
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        if self.is_connected() {
            debug!("Stream connection already open");
            return Ok(());
        }

        if self.arguments.keepalive {
            warn!("TCP keepalive was requested but is left to the operating system defaults");
        }

        info!(
            host = %self.arguments.host,
            port = self.arguments.port,
            vhost = %self.arguments.vhost,
            "Opening stream AMQP connection"
        );

        let uri = self.arguments.uri();
        let properties = self.arguments.lapin_properties();
        let connection = self
            .blocking
            .run_with(None, LapinConnection::connect_uri(uri, properties))?;

        self.connection = Some(connection);
        self.channel_id = 0;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        self.channel_id = 0;
        match self.connection.take() {
            Some(connection) => self
                .blocking
                .run(async move { connection.close(200, "Normal shutdown").await }),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |connection| connection.status().connected())
    }

    fn open_channel(&mut self) -> Result<Box<dyn ChannelDriver>, DriverError> {
        let connection = self
            .connection
            .as_ref()
            .filter(|connection| connection.status().connected())
            .ok_or_else(DriverError::not_connected)?;

        let channel = self.blocking.run(connection.create_channel())?;
        self.channel_id = channel.id();
        debug!(channel_id = self.channel_id, "Stream channel opened");

        Ok(Box::new(StreamChannel {
            channel,
            blocking: self.blocking.clone(),
        }))
    }

    /// The id of the most recently opened channel.
    fn used_channels(&self) -> u16 {
        if !self.is_connected() {
            return 0;
        }
        self.channel_id
    }
}

pub struct StreamChannel {
    channel: LapinChannel,
    blocking: Blocking,
}

impl ChannelDriver for StreamChannel {
    fn channel_id(&self) -> u16 {
        self.channel.id()
    }

    fn tx_select(&mut self) -> Result<(), DriverError> {
        self.blocking.run(self.channel.tx_select())
    }

    fn tx_commit(&mut self) -> Result<(), DriverError> {
        self.blocking.run(self.channel.tx_commit())
    }

    fn tx_rollback(&mut self) -> Result<(), DriverError> {
        self.blocking.run(self.channel.tx_rollback())
    }

    fn qos(&mut self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), DriverError> {
        if prefetch_size > 0 {
            return Err(DriverError::new("prefetch_size is not supported by this driver")
                .with_code(NOT_IMPLEMENTED));
        }
        self.blocking
            .run(self.channel.basic_qos(prefetch_count, BasicQosOptions { global }))
    }

    fn basic_recover(&mut self, requeue: bool) -> Result<(), DriverError> {
        self.blocking
            .run(self.channel.basic_recover(BasicRecoverOptions { requeue }))
    }
}
