// src/lib.rs
//! One connection and channel API over two interchangeable AMQP 0-9-1 drivers.
//!
//! A [`Connection`] is built from [`ConnectionProperties`]; `use_native_driver`
//! picks the backend once, at construction. [`Channel`]s are opened on a
//! connected `Connection` and dispatch to the same backend.
//!
//! Backends differ in what they can do. Metrics a backend cannot report come
//! back as `None`; operations it lacks fail with [`AmqpError::ConnectionError`].
//!
//! Everything here is blocking and single-owner: `Connection` and `Channel`
//! are neither `Send` nor `Sync`.

pub mod channel;
pub mod config;
pub mod connection;
pub mod driver;
pub mod errors;
pub mod flags;
pub mod properties;

pub use channel::Channel;
pub use connection::Connection;
pub use driver::{Capabilities, ChannelDriver, Driver, DriverFactory, DriverKind, LapinDriverFactory};
pub use errors::{AmqpError, DriverError, Result};
pub use flags::ExchangeType;
pub use properties::ConnectionProperties;
