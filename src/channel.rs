// src/channel.rs
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info};

use crate::connection::{Connection, DriverSlot};
use crate::driver::{Capabilities, ChannelDriver, DriverKind};
use crate::errors::{AmqpError, DriverError, Result};

/// A channel opened on a [`Connection`], dispatching to that connection's backend.
///
/// The channel does not keep its connection alive. Using it after the
/// connection disconnected is the caller's mistake; operations then fail
/// with whatever error the backend reports.
///
/// On backends without prefetch introspection the channel shadows the last
/// prefetch count and size it sent. That shadow is the only source for
/// [`prefetch_count`](Self::prefetch_count) and
/// [`prefetch_size`](Self::prefetch_size) there; it does not see QoS changes
/// made any other way.
pub struct Channel {
    connection: Weak<DriverSlot>,
    driver: Box<dyn ChannelDriver>,
    kind: DriverKind,
    capabilities: Capabilities,
    prefetch_count: u16,
    prefetch_size: u32,
}

impl Channel {
    /// Open a channel on `connection`, which must already be connected.
    pub fn new(connection: &Connection) -> Result<Self> {
        let slot = connection.slot();
        let kind = connection.backend();

        let driver = {
            let mut handle = slot.driver_mut();
            let driver = handle
                .as_mut()
                .filter(|driver| driver.is_connected())
                .ok_or_else(|| {
                    AmqpError::ConnectionError(DriverError::new(
                        "Could not create channel. No connection available.",
                    ))
                })?;
            driver.open_channel().map_err(|e| {
                error!(connection_id = %connection.id(), error = %e, "Opening channel failed");
                AmqpError::ChannelError(e)
            })?
        };

        info!(
            connection_id = %connection.id(),
            backend = %kind,
            channel_id = driver.channel_id(),
            "Channel opened"
        );

        Ok(Self {
            connection: Rc::downgrade(slot),
            driver,
            kind,
            capabilities: connection.capabilities(),
            prefetch_count: 0,
            prefetch_size: 0,
        })
    }

    fn channel_error(&self, operation: &str, error: DriverError) -> AmqpError {
        error!(
            channel_id = self.driver.channel_id(),
            backend = %self.kind,
            operation,
            error = %error,
            "Channel operation failed"
        );
        AmqpError::ChannelError(error)
    }

    pub fn channel_id(&self) -> u16 {
        self.driver.channel_id()
    }

    pub fn backend(&self) -> DriverKind {
        self.kind
    }

    /// Whether the originating connection still exists.
    pub fn connection_alive(&self) -> bool {
        self.connection.strong_count() > 0
    }

    /// Put the channel in transaction mode. The backend holds the transaction state.
    pub fn start_transaction(&mut self) -> Result<()> {
        debug!(channel_id = self.channel_id(), "Starting transaction");
        self.driver
            .tx_select()
            .map_err(|e| self.channel_error("tx_select", e))
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        debug!(channel_id = self.channel_id(), "Committing transaction");
        self.driver
            .tx_commit()
            .map_err(|e| self.channel_error("tx_commit", e))
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        debug!(channel_id = self.channel_id(), "Rolling back transaction");
        self.driver
            .tx_rollback()
            .map_err(|e| self.channel_error("tx_rollback", e))
    }

    /// Send a per-consumer QoS with both knobs as given.
    pub fn qos(&mut self, prefetch_size: u32, prefetch_count: u16) -> Result<()> {
        debug!(
            channel_id = self.channel_id(),
            prefetch_size,
            prefetch_count,
            "Setting QoS"
        );
        self.driver
            .qos(prefetch_size, prefetch_count, false)
            .map_err(|e| self.channel_error("basic_qos", e))
    }

    /// Limit unacknowledged deliveries by count. Clears any prefetch size.
    pub fn set_prefetch_count(&mut self, count: u16) -> Result<()> {
        if self.capabilities.prefetch_query {
            debug!(channel_id = self.channel_id(), count, "Setting prefetch count");
            return self
                .driver
                .set_prefetch_count(count)
                .map_err(|e| self.channel_error("set_prefetch_count", e));
        }

        self.prefetch_count = count;
        self.prefetch_size = 0;
        self.qos(0, count)
    }

    /// Limit unacknowledged deliveries by size in bytes. Clears any prefetch count.
    pub fn set_prefetch_size(&mut self, size: u32) -> Result<()> {
        if self.capabilities.prefetch_query {
            debug!(channel_id = self.channel_id(), size, "Setting prefetch size");
            return self
                .driver
                .set_prefetch_size(size)
                .map_err(|e| self.channel_error("set_prefetch_size", e));
        }

        self.prefetch_count = 0;
        self.prefetch_size = size;
        self.qos(self.prefetch_size, self.prefetch_count)
    }

    pub fn prefetch_count(&self) -> u16 {
        if self.capabilities.prefetch_query {
            if let Some(count) = self.driver.prefetch_count() {
                return count;
            }
        }
        self.prefetch_count
    }

    pub fn prefetch_size(&self) -> u32 {
        if self.capabilities.prefetch_query {
            if let Some(size) = self.driver.prefetch_size() {
                return size;
            }
        }
        self.prefetch_size
    }

    /// Ask the broker to redeliver unacknowledged messages.
    pub fn basic_recover(&mut self, requeue: bool) -> Result<()> {
        debug!(channel_id = self.channel_id(), requeue, "Recovering unacknowledged messages");
        self.driver
            .basic_recover(requeue)
            .map_err(|e| self.channel_error("basic_recover", e))
    }

    /// Channel status where the backend reports one. Otherwise this is the
    /// connection's status, which misses a channel closed by the broker.
    pub fn is_connected(&self) -> bool {
        if self.capabilities.channel_status {
            if let Some(connected) = self.driver.is_connected() {
                return connected;
            }
        }

        self.connection
            .upgrade()
            .map_or(false, |slot| slot.is_connected())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("channel_id", &self.driver.channel_id())
            .field("backend", &self.kind)
            .field("prefetch_count", &self.prefetch_count)
            .field("prefetch_size", &self.prefetch_size)
            .finish()
    }
}
