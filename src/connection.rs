// src/connection.rs
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::driver::{Capabilities, Driver, DriverFactory, DriverKind, LapinDriverFactory};
use crate::errors::{AmqpError, DriverError, Result};
use crate::properties::ConnectionProperties;

/// Holds the driver handle. Channels keep a weak reference to this slot, so
/// it stays in place while the handle inside is replaced.
#[derive(Default)]
pub(crate) struct DriverSlot {
    driver: RefCell<Option<Box<dyn Driver>>>,
}

impl DriverSlot {
    pub(crate) fn is_connected(&self) -> bool {
        self.driver
            .borrow()
            .as_ref()
            .map_or(false, |driver| driver.is_connected())
    }

    fn get(&self) -> Ref<'_, Option<Box<dyn Driver>>> {
        self.driver.borrow()
    }

    pub(crate) fn driver_mut(&self) -> RefMut<'_, Option<Box<dyn Driver>>> {
        self.driver.borrow_mut()
    }

    fn replace(&self, driver: Box<dyn Driver>) {
        *self.driver.borrow_mut() = Some(driver);
    }
}

/// One broker connection over whichever backend the properties select.
///
/// No I/O happens until [`connect`](Self::connect) or
/// [`pconnect`](Self::pconnect). Property setters only affect the next
/// connect; an open handle keeps the values it was opened with.
pub struct Connection {
    id: String,
    properties: ConnectionProperties,
    kind: DriverKind,
    factory: Rc<dyn DriverFactory>,
    slot: Rc<DriverSlot>,
}

impl Connection {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self::with_factory(properties, Rc::new(LapinDriverFactory))
    }

    /// Overlay `overrides` onto the default properties, rejecting invalid values.
    pub fn from_overrides<I, K>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Ok(Self::new(ConnectionProperties::from_overrides(overrides)?))
    }

    pub fn with_factory(properties: ConnectionProperties, factory: Rc<dyn DriverFactory>) -> Self {
        let kind = DriverKind::from_properties(&properties);
        let id = format!("connection-{}", &Uuid::new_v4().to_string()[..8]);

        debug!(
            connection_id = %id,
            backend = %kind,
            host = %properties.host,
            port = properties.port,
            "Creating connection"
        );

        Self {
            id,
            properties,
            kind,
            factory,
            slot: Rc::new(DriverSlot::default()),
        }
    }

    fn create_driver(&self) -> Result<Box<dyn Driver>> {
        self.factory
            .create(self.kind, &self.properties)
            .map_err(|e| self.connection_error(e))
    }

    fn connection_error(&self, error: DriverError) -> AmqpError {
        error!(connection_id = %self.id, backend = %self.kind, error = %error, "Connection operation failed");
        AmqpError::ConnectionError(error)
    }

    fn unsupported(&self, operation: &str) -> AmqpError {
        self.connection_error(DriverError::unsupported(operation, self.kind))
    }

    /// Instantiate a fresh driver handle and open it. Failures are not retried.
    pub fn connect(&mut self) -> Result<()> {
        if self.slot.is_connected() {
            debug!(connection_id = %self.id, "Already connected");
            return Ok(());
        }

        info!(
            connection_id = %self.id,
            backend = %self.kind,
            host = %self.properties.host,
            port = self.properties.port,
            "Connecting to AMQP broker"
        );

        let mut driver = self.create_driver()?;
        let outcome = driver.connect();
        // The handle is kept even when opening failed, so disconnect/reconnect can still reach it
        self.slot.replace(driver);
        outcome.map_err(|e| self.connection_error(e))?;

        info!(connection_id = %self.id, "Connected to AMQP broker");
        Ok(())
    }

    /// Close the active handle.
    ///
    /// On backends with lenient close, a failure is logged and reported as
    /// `Ok(false)`; the connection is unusable afterwards either way.
    pub fn disconnect(&mut self) -> Result<bool> {
        let mut slot = self.slot.driver_mut();
        let driver = match slot.as_mut() {
            Some(driver) => driver,
            None => return Ok(true),
        };

        info!(connection_id = %self.id, "Disconnecting from AMQP broker");
        match driver.disconnect() {
            Ok(()) => Ok(true),
            Err(e) if self.capabilities().lenient_close => {
                warn!(connection_id = %self.id, error = %e, "Closing the connection failed");
                Ok(false)
            }
            Err(e) => {
                drop(slot);
                Err(self.connection_error(e))
            }
        }
    }

    /// Reopen the connection with the current properties.
    ///
    /// Backends without their own reconnect go through `disconnect` then
    /// `connect`, which rebuilds the handle from scratch.
    pub fn reconnect(&mut self) -> Result<()> {
        info!(connection_id = %self.id, backend = %self.kind, "Reconnecting");

        if self.capabilities().native_reconnect {
            let outcome = match self.slot.driver_mut().as_mut() {
                Some(driver) => driver.reconnect(),
                None => Err(DriverError::not_connected()),
            };
            return outcome.map_err(|e| self.connection_error(e));
        }

        self.disconnect()?;
        self.connect()
    }

    /// Open, or reuse, a persistent connection. Only the native backend has them.
    pub fn pconnect(&mut self) -> Result<()> {
        if !self.capabilities().persistent_connections {
            return Err(self.unsupported("Persistent connections"));
        }

        info!(connection_id = %self.id, host = %self.properties.host, "Opening persistent connection");
        if let Some(transient) = self
            .slot
            .driver_mut()
            .as_mut()
            .filter(|driver| driver.is_connected() && !driver.is_persistent())
        {
            if let Err(e) = transient.disconnect() {
                warn!(connection_id = %self.id, error = %e, "Closing the transient connection failed");
            }
        }

        let mut driver = self.create_driver()?;
        let outcome = driver.pconnect();
        self.slot.replace(driver);
        outcome.map_err(|e| self.connection_error(e))
    }

    pub fn pdisconnect(&mut self) -> Result<bool> {
        if !self.capabilities().persistent_connections {
            return Err(self.unsupported("Persistent connections"));
        }

        let outcome = match self.slot.driver_mut().as_mut() {
            Some(driver) => driver.pdisconnect(),
            None => Err(DriverError::not_connected()),
        };
        outcome.map(|()| true).map_err(|e| self.connection_error(e))
    }

    pub fn preconnect(&mut self) -> Result<()> {
        if !self.capabilities().persistent_connections {
            return Err(self.unsupported("Persistent connections"));
        }

        let outcome = match self.slot.driver_mut().as_mut() {
            Some(driver) => driver.preconnect(),
            None => Err(DriverError::not_connected()),
        };
        outcome.map_err(|e| self.connection_error(e))
    }

    pub fn is_connected(&self) -> bool {
        self.slot.is_connected()
    }

    pub fn is_persistent(&self) -> bool {
        self.with_driver(|driver| driver.is_persistent()).unwrap_or(false)
    }

    /// Negotiated channel limit; `None` when the backend cannot tell.
    pub fn max_channels(&self) -> Option<u16> {
        self.with_driver(|driver| driver.max_channels()).flatten()
    }

    pub fn max_frame_size(&self) -> Option<u32> {
        self.with_driver(|driver| driver.max_frame_size()).flatten()
    }

    pub fn heartbeat_interval(&self) -> Option<u16> {
        self.with_driver(|driver| driver.heartbeat_interval()).flatten()
    }

    pub fn used_channels(&self) -> u16 {
        if !self.is_connected() {
            return 0;
        }
        self.with_driver(|driver| driver.used_channels()).unwrap_or(0)
    }

    fn with_driver<T>(&self, f: impl FnOnce(&dyn Driver) -> T) -> Option<T> {
        self.slot.get().as_deref().map(f)
    }

    pub(crate) fn slot(&self) -> &Rc<DriverSlot> {
        &self.slot
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> DriverKind {
        self.kind
    }

    pub fn uses_native_driver(&self) -> bool {
        self.kind == DriverKind::Native
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    pub fn host(&self) -> &str {
        &self.properties.host
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.properties.host = host.into();
    }

    pub fn login(&self) -> &str {
        &self.properties.login
    }

    pub fn set_login(&mut self, login: impl Into<String>) {
        self.properties.login = login.into();
    }

    pub fn password(&self) -> &str {
        &self.properties.password
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.properties.password = password.into();
    }

    pub fn vhost(&self) -> &str {
        &self.properties.vhost
    }

    pub fn set_vhost(&mut self, vhost: impl Into<String>) {
        self.properties.vhost = vhost.into();
    }

    pub fn port(&self) -> u16 {
        self.properties.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.properties.port = port;
    }

    pub fn read_timeout(&self) -> f64 {
        self.properties.read_timeout
    }

    pub fn set_read_timeout(&mut self, seconds: f64) -> Result<()> {
        self.properties.read_timeout = checked_timeout("read_timeout", seconds)?;
        Ok(())
    }

    pub fn write_timeout(&self) -> f64 {
        self.properties.write_timeout
    }

    pub fn set_write_timeout(&mut self, seconds: f64) -> Result<()> {
        self.properties.write_timeout = checked_timeout("write_timeout", seconds)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> f64 {
        self.properties.connect_timeout
    }

    #[deprecated(note = "use read_timeout")]
    pub fn timeout(&self) -> f64 {
        self.read_timeout()
    }

    #[deprecated(note = "use set_read_timeout")]
    pub fn set_timeout(&mut self, seconds: f64) -> Result<()> {
        self.set_read_timeout(seconds)
    }

    pub fn heartbeat(&self) -> u16 {
        self.properties.heartbeat
    }
}

fn checked_timeout(key: &str, seconds: f64) -> Result<f64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(AmqpError::invalid_property(
            key,
            format!("expected a non-negative number of seconds, got {}", seconds),
        ))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("backend", &self.kind)
            .field("host", &self.properties.host)
            .field("port", &self.properties.port)
            .field("vhost", &self.properties.vhost)
            .field("connected", &self.is_connected())
            .finish()
    }
}
