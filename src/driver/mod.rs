// src/driver/mod.rs
// Backend drivers behind the connection and channel façades

pub mod native;
pub mod stream;

use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use crate::errors::DriverError;
use crate::properties::ConnectionProperties;

pub use native::NativeDriver;
pub use stream::{StreamArguments, StreamDriver};

/// Which backend a connection was built for. Chosen once, from `use_native_driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Native,
    Stream,
}

impl DriverKind {
    pub fn from_properties(properties: &ConnectionProperties) -> Self {
        if properties.use_native_driver {
            DriverKind::Native
        } else {
            DriverKind::Stream
        }
    }

    pub const fn capabilities(self) -> Capabilities {
        match self {
            DriverKind::Native => Capabilities::NATIVE,
            DriverKind::Stream => Capabilities::STREAM,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Native => f.write_str("native"),
            DriverKind::Stream => f.write_str("stream"),
        }
    }
}

/// What a backend can do. The façades consult this instead of the kind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// `pconnect`, `pdisconnect` and `preconnect` exist.
    pub persistent_connections: bool,
    /// The driver reconnects by itself rather than through disconnect + connect.
    pub native_reconnect: bool,
    /// Negotiated channel max, frame max and heartbeat can be read back.
    pub introspection: bool,
    /// Channels report their own status.
    pub channel_status: bool,
    /// Channels can report the prefetch count and size they were given.
    pub prefetch_query: bool,
    /// A failed close is reported as `false` instead of an error.
    pub lenient_close: bool,
}

impl Capabilities {
    pub const NATIVE: Capabilities = Capabilities {
        persistent_connections: true,
        native_reconnect: true,
        introspection: true,
        channel_status: true,
        prefetch_query: true,
        lenient_close: false,
    };

    pub const STREAM: Capabilities = Capabilities {
        persistent_connections: false,
        native_reconnect: false,
        introspection: false,
        channel_status: false,
        prefetch_query: false,
        lenient_close: true,
    };
}

/// A connection handle of one backend.
///
/// Every call blocks until the backend finishes or hits its own timeout.
/// Operations a backend does not offer keep the default bodies, which either
/// report the gap as an error or return `None` for metrics it cannot know.
pub trait Driver {
    fn kind(&self) -> DriverKind;

    fn connect(&mut self) -> Result<(), DriverError>;

    fn disconnect(&mut self) -> Result<(), DriverError>;

    fn is_connected(&self) -> bool;

    fn open_channel(&mut self) -> Result<Box<dyn ChannelDriver>, DriverError>;

    /// Number of channels in use on this connection, `0` when disconnected.
    fn used_channels(&self) -> u16;

    fn reconnect(&mut self) -> Result<(), DriverError> {
        Err(DriverError::unsupported("Native reconnect", self.kind()))
    }

    fn pconnect(&mut self) -> Result<(), DriverError> {
        Err(DriverError::unsupported("Persistent connections", self.kind()))
    }

    fn pdisconnect(&mut self) -> Result<(), DriverError> {
        Err(DriverError::unsupported("Persistent connections", self.kind()))
    }

    fn preconnect(&mut self) -> Result<(), DriverError> {
        Err(DriverError::unsupported("Persistent connections", self.kind()))
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn max_channels(&self) -> Option<u16> {
        None
    }

    fn max_frame_size(&self) -> Option<u32> {
        None
    }

    fn heartbeat_interval(&self) -> Option<u16> {
        None
    }
}

/// A channel handle opened by a [`Driver`].
pub trait ChannelDriver {
    fn channel_id(&self) -> u16;

    fn tx_select(&mut self) -> Result<(), DriverError>;

    fn tx_commit(&mut self) -> Result<(), DriverError>;

    fn tx_rollback(&mut self) -> Result<(), DriverError>;

    fn qos(&mut self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), DriverError>;

    fn basic_recover(&mut self, requeue: bool) -> Result<(), DriverError>;

    fn set_prefetch_count(&mut self, count: u16) -> Result<(), DriverError> {
        self.qos(0, count, false)
    }

    fn set_prefetch_size(&mut self, size: u32) -> Result<(), DriverError> {
        self.qos(size, 0, false)
    }

    fn prefetch_count(&self) -> Option<u16> {
        None
    }

    fn prefetch_size(&self) -> Option<u32> {
        None
    }

    /// Channel-level status, when the backend tracks one.
    fn is_connected(&self) -> Option<bool> {
        None
    }
}

/// Builds the driver handle for a connection. Called on every
/// `connect`/`pconnect`, so each call yields a fresh, not yet connected handle.
pub trait DriverFactory {
    fn create(
        &self,
        kind: DriverKind,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn Driver>, DriverError>;
}

/// The default factory: both backends run on lapin.
#[derive(Debug, Default, Clone, Copy)]
pub struct LapinDriverFactory;

impl DriverFactory for LapinDriverFactory {
    fn create(
        &self,
        kind: DriverKind,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn Driver>, DriverError> {
        let driver: Box<dyn Driver> = match kind {
            DriverKind::Native => Box::new(NativeDriver::new(properties.clone())?),
            DriverKind::Stream => Box::new(StreamDriver::new(StreamArguments::from_properties(properties))?),
        };
        Ok(driver)
    }
}

/// Runs lapin futures to completion on a private current-thread runtime.
///
/// Shared between a driver and the channels it opens, so it must not be used
/// from inside another tokio runtime.
#[derive(Clone)]
pub(crate) struct Blocking {
    runtime: Rc<Runtime>,
    timeout: Option<Duration>,
}

impl Blocking {
    pub(crate) fn new(timeout: Option<Duration>) -> Result<Self, DriverError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Rc::new(runtime),
            timeout,
        })
    }

    pub(crate) fn run<F, T>(&self, operation: F) -> Result<T, DriverError>
    where
        F: Future<Output = Result<T, lapin::Error>>,
    {
        self.run_with(self.timeout, operation)
    }

    pub(crate) fn run_with<F, T>(&self, timeout: Option<Duration>, operation: F) -> Result<T, DriverError>
    where
        F: Future<Output = Result<T, lapin::Error>>,
    {
        match timeout {
            Some(limit) => self
                .runtime
                .block_on(async { tokio::time::timeout(limit, operation).await })?
                .map_err(DriverError::from),
            None => self.runtime.block_on(operation).map_err(DriverError::from),
        }
    }
}
