// src/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::driver::DriverKind;
use crate::flags::OS_SOCKET_TIMEOUT_ERRNO;

/// AMQP reply code for methods the broker (or client) does not implement.
pub const NOT_IMPLEMENTED: i32 = 540;

/// A failure reported by a backend driver, before the façade decides whether
/// it is a connection or a channel problem.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    code: Option<i32>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The operation exists in the façade but the selected backend lacks it.
    pub fn unsupported(operation: &str, backend: DriverKind) -> Self {
        Self::new(format!("{} not implemented when using the {} driver!", operation, backend))
    }

    pub fn not_connected() -> Self {
        Self::new("No connection available")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

// Converting from lapin errors, keeping the reply code or errno when there is one
impl From<LapinError> for DriverError {
    fn from(error: LapinError) -> Self {
        let code = match &error {
            LapinError::ProtocolError(amqp_error) => Some(i32::from(amqp_error.get_id())),
            LapinError::IOError(io_error) => io_error.raw_os_error(),
            _ => None,
        };

        let driver_error = DriverError::new(error.to_string()).with_source(error);
        match code {
            Some(code) => driver_error.with_code(code),
            None => driver_error,
        }
    }
}

impl From<Elapsed> for DriverError {
    fn from(elapsed: Elapsed) -> Self {
        DriverError::new("Socket operation timed out")
            .with_code(OS_SOCKET_TIMEOUT_ERRNO)
            .with_source(elapsed)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(error: std::io::Error) -> Self {
        let driver_error = DriverError::new(error.to_string());
        match error.raw_os_error() {
            Some(code) => driver_error.with_code(code).with_source(error),
            None => driver_error.with_source(error),
        }
    }
}

#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("AMQP connection error: {0}")]
    ConnectionError(#[source] DriverError),

    #[error("AMQP channel error: {0}")]
    ChannelError(#[source] DriverError),

    #[error("Invalid connection properties: {0}")]
    InvalidProperties(#[from] SerdeError),

    #[error("Invalid connection property `{key}`: {reason}")]
    InvalidProperty { key: String, reason: String },
}

// Custom Result type for bridge operations
pub type Result<T> = std::result::Result<T, AmqpError>;

impl AmqpError {
    pub fn connection(error: impl Into<DriverError>) -> Self {
        AmqpError::ConnectionError(error.into())
    }

    pub fn channel(error: impl Into<DriverError>) -> Self {
        AmqpError::ChannelError(error.into())
    }

    pub fn invalid_property(key: &str, reason: impl fmt::Display) -> Self {
        AmqpError::InvalidProperty {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The backend's error code, when the failure carried one.
    pub fn code(&self) -> Option<i32> {
        match self {
            AmqpError::ConnectionError(e) | AmqpError::ChannelError(e) => e.code(),
            _ => None,
        }
    }

    /// The backend's original message, without the façade's prefix.
    pub fn message(&self) -> String {
        match self {
            AmqpError::ConnectionError(e) | AmqpError::ChannelError(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, AmqpError::ConnectionError(_))
    }

    pub fn is_channel_error(&self) -> bool {
        matches!(self, AmqpError::ChannelError(_))
    }
}

impl From<&str> for DriverError {
    fn from(message: &str) -> Self {
        DriverError::new(message)
    }
}

impl From<String> for DriverError {
    fn from(message: String) -> Self {
        DriverError::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_keeps_message_and_code() {
        let err = AmqpError::connection(DriverError::new("ACCESS_REFUSED").with_code(403));

        assert!(err.is_connection_error());
        assert_eq!(err.code(), Some(403));
        assert_eq!(err.message(), "ACCESS_REFUSED");
        assert_eq!(err.to_string(), "AMQP connection error: ACCESS_REFUSED");
    }

    #[test]
    fn test_unsupported_names_operation_and_backend() {
        let err = DriverError::unsupported("Persistent connections", DriverKind::Stream);
        assert_eq!(
            err.message(),
            "Persistent connections not implemented when using the stream driver!"
        );
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_io_error_keeps_errno() {
        let io = std::io::Error::from_raw_os_error(111);
        let err = DriverError::from(io);
        assert_eq!(err.code(), Some(111));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_channel_error_source_chain() {
        let err = AmqpError::channel("PRECONDITION_FAILED");
        assert!(err.is_channel_error());
        assert_eq!(StdError::source(&err).map(|s| s.to_string()), Some("PRECONDITION_FAILED".to_string()));
    }
}
