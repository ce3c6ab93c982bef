// src/flags.rs
// Protocol flag table shared with callers building declare/publish/consume arguments.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const NOPARAM: u32 = 0;
pub const JUST_CONSUME: u32 = 1;
pub const DURABLE: u32 = 2;
pub const PASSIVE: u32 = 4;
pub const EXCLUSIVE: u32 = 8;
pub const AUTODELETE: u32 = 16;
pub const INTERNAL: u32 = 32;
pub const NOLOCAL: u32 = 64;
pub const AUTOACK: u32 = 128;
pub const IFEMPTY: u32 = 256;
pub const IFUNUSED: u32 = 512;
pub const MANDATORY: u32 = 1024;
pub const IMMEDIATE: u32 = 2048;
pub const MULTIPLE: u32 = 4096;
pub const NOWAIT: u32 = 8192;
pub const REQUEUE: u32 = 16384;

/// Error code reported when a socket read or write times out.
pub const OS_SOCKET_TIMEOUT_ERRNO: i32 = 536870947;

/// Upper bound on channels per connection when the broker does not negotiate one.
pub const MAX_CHANNELS: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_distinct_bits() {
        let flags = [
            JUST_CONSUME, DURABLE, PASSIVE, EXCLUSIVE, AUTODELETE, INTERNAL, NOLOCAL, AUTOACK,
            IFEMPTY, IFUNUSED, MANDATORY, IMMEDIATE, MULTIPLE, NOWAIT, REQUEUE,
        ];

        let mut combined = NOPARAM;
        for flag in flags {
            assert_eq!(flag.count_ones(), 1, "flag {} is not a single bit", flag);
            assert_eq!(combined & flag, 0, "flag {} overlaps another flag", flag);
            combined |= flag;
        }
        assert_eq!(combined, 32767);
    }

    #[test]
    fn test_exchange_type_strings() {
        assert_eq!(ExchangeType::Direct.to_string(), "direct");
        assert_eq!(ExchangeType::Headers.as_str(), "headers");
        assert_eq!(serde_json::to_string(&ExchangeType::Fanout).unwrap(), "\"fanout\"");
        let topic: ExchangeType = serde_json::from_str("\"topic\"").unwrap();
        assert_eq!(topic, ExchangeType::Topic);
    }
}
