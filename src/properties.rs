// src/properties.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::{AmqpError, Result};

/// Names of every option the bridge understands. Anything else supplied by the
/// caller is kept in [`ConnectionProperties::extra`] and ignored by both drivers.
pub const RECOGNIZED_KEYS: [&str; 13] = [
    "host",
    "port",
    "vhost",
    "login",
    "password",
    "read_timeout",
    "write_timeout",
    "connect_timeout",
    "heartbeat",
    "keepalive",
    "channel_max",
    "frame_max",
    "use_native_driver",
];

/// Effective connection settings: caller overrides laid over fixed defaults.
///
/// Timeouts are in seconds, `0` disables them. `keepalive` is only honoured by
/// the stream driver; `channel_max` and `frame_max` only by the native driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProperties {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub login: String,
    pub password: String,
    pub read_timeout: f64,
    pub write_timeout: f64,
    pub connect_timeout: f64,
    pub heartbeat: u16,
    pub keepalive: bool,
    pub channel_max: u16,
    pub frame_max: u32,
    pub use_native_driver: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            login: "guest".to_string(),
            password: "guest".to_string(),
            read_timeout: 0.0,
            write_timeout: 0.0,
            connect_timeout: 0.0,
            heartbeat: 0,
            keepalive: false,
            channel_max: 0,
            frame_max: 0,
            use_native_driver: true,
            extra: BTreeMap::new(),
        }
    }
}

impl ConnectionProperties {
    /// Overlay `overrides` key by key onto the defaults and validate the result.
    pub fn from_overrides<I, K>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut merged = Self::default().to_map();
        for (key, value) in overrides {
            merged.insert(key.into(), value);
        }

        let properties: ConnectionProperties = serde_json::from_value(Value::Object(merged))?;
        properties.validate()?;
        Ok(properties)
    }

    /// Parse a JSON object of overrides.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        match value {
            Value::Object(map) => Self::from_overrides(map),
            other => Err(AmqpError::invalid_property(
                "<root>",
                format!("expected a JSON object, found {}", other),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AmqpError::invalid_property("host", "must not be empty"));
        }

        for (key, seconds) in [
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(AmqpError::invalid_property(
                    key,
                    format!("expected a non-negative number of seconds, got {}", seconds),
                ));
            }
        }

        Ok(())
    }

    /// The full effective mapping, recognized and unknown keys alike.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("host".into(), Value::from(self.host.clone()));
        map.insert("port".into(), Value::from(self.port));
        map.insert("vhost".into(), Value::from(self.vhost.clone()));
        map.insert("login".into(), Value::from(self.login.clone()));
        map.insert("password".into(), Value::from(self.password.clone()));
        map.insert("read_timeout".into(), Value::from(self.read_timeout));
        map.insert("write_timeout".into(), Value::from(self.write_timeout));
        map.insert("connect_timeout".into(), Value::from(self.connect_timeout));
        map.insert("heartbeat".into(), Value::from(self.heartbeat));
        map.insert("keepalive".into(), Value::from(self.keepalive));
        map.insert("channel_max".into(), Value::from(self.channel_max));
        map.insert("frame_max".into(), Value::from(self.frame_max));
        map.insert("use_native_driver".into(), Value::from(self.use_native_driver));
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_map().remove(key)
    }

    pub fn is_recognized(key: &str) -> bool {
        RECOGNIZED_KEYS.contains(&key)
    }

    pub fn read_timeout_duration(&self) -> Option<Duration> {
        seconds(self.read_timeout)
    }

    pub fn write_timeout_duration(&self) -> Option<Duration> {
        seconds(self.write_timeout)
    }

    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        seconds(self.connect_timeout)
    }

    /// Read and write timeouts collapsed into one, as a single-socket driver needs.
    pub fn read_write_timeout(&self) -> f64 {
        self.read_timeout.max(self.write_timeout)
    }

    pub fn read_write_timeout_duration(&self) -> Option<Duration> {
        seconds(self.read_write_timeout())
    }

    /// Endpoint label for logs. Carries no password.
    pub fn endpoint_key(&self) -> String {
        format!("{}@{}:{}{}", self.login, self.host, self.port, self.vhost)
    }

    /// Registry key for persistent connections: endpoint, credentials and the
    /// requested limits. Never log it.
    pub(crate) fn persistent_key(&self) -> String {
        format!(
            "{}:{}@{}:{}{}?channel_max={}&frame_max={}&heartbeat={}",
            self.login,
            self.password,
            self.host,
            self.port,
            self.vhost,
            self.channel_max,
            self.frame_max,
            self.heartbeat
        )
    }
}

fn seconds(value: f64) -> Option<Duration> {
    if value > 0.0 {
        Some(Duration::from_secs_f64(value))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let props = ConnectionProperties::default();
        assert_eq!(props.host, "localhost");
        assert_eq!(props.port, 5672);
        assert_eq!(props.vhost, "/");
        assert_eq!(props.login, "guest");
        assert_eq!(props.password, "guest");
        assert_eq!(props.read_timeout, 0.0);
        assert_eq!(props.heartbeat, 0);
        assert!(!props.keepalive);
        assert_eq!(props.channel_max, 0);
        assert_eq!(props.frame_max, 0);
        assert!(props.use_native_driver);
        assert!(props.extra.is_empty());
    }

    #[test]
    fn test_overlay_is_key_by_key() {
        let overrides = vec![
            ("port", json!(5673)),
            ("use_native_driver", json!(false)),
            ("read_timeout", json!(2.5)),
        ];
        let props = ConnectionProperties::from_overrides(overrides).unwrap();

        let mut expected = ConnectionProperties::default().to_map();
        expected.insert("port".into(), json!(5673));
        expected.insert("use_native_driver".into(), json!(false));
        expected.insert("read_timeout".into(), json!(2.5));

        assert_eq!(props.to_map(), expected);
    }

    #[test]
    fn test_every_recognized_key_is_in_the_map() {
        let map = ConnectionProperties::default().to_map();
        for key in RECOGNIZED_KEYS {
            assert!(map.contains_key(key), "missing {}", key);
        }
        assert_eq!(map.len(), RECOGNIZED_KEYS.len());
    }

    #[test]
    fn test_unknown_keys_are_retained() {
        let props = ConnectionProperties::from_overrides(vec![
            ("client_name", json!("billing")),
            ("host", json!("rabbit.internal")),
        ])
        .unwrap();

        assert_eq!(props.host, "rabbit.internal");
        assert_eq!(props.extra.get("client_name"), Some(&json!("billing")));
        assert_eq!(props.get("client_name"), Some(json!("billing")));
        assert!(!ConnectionProperties::is_recognized("client_name"));
    }

    #[test]
    fn test_integer_timeouts_are_accepted() {
        let props = ConnectionProperties::from_overrides(vec![("connect_timeout", json!(3))]).unwrap();
        assert_eq!(props.connect_timeout, 3.0);
        assert_eq!(props.connect_timeout_duration(), Some(Duration::from_secs(3)));
        assert_eq!(props.read_timeout_duration(), None);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let err = ConnectionProperties::from_overrides(vec![("port", json!("amqp"))]).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidProperties(_)));

        let err = ConnectionProperties::from_overrides(vec![("port", json!(70000))]).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidProperties(_)));
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        let err =
            ConnectionProperties::from_overrides(vec![("write_timeout", json!(-1))]).unwrap_err();
        match err {
            AmqpError::InvalidProperty { key, .. } => assert_eq!(key, "write_timeout"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let err = ConnectionProperties::from_overrides(vec![("host", json!(""))]).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidProperty { .. }));
    }

    #[test]
    fn test_from_json_requires_object() {
        let props = ConnectionProperties::from_json(r#"{"vhost": "/orders", "heartbeat": 30}"#).unwrap();
        assert_eq!(props.vhost, "/orders");
        assert_eq!(props.heartbeat, 30);

        assert!(ConnectionProperties::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_read_write_timeout_is_the_maximum() {
        let props = ConnectionProperties {
            read_timeout: 3.0,
            write_timeout: 7.5,
            ..ConnectionProperties::default()
        };
        assert_eq!(props.read_write_timeout(), 7.5);
    }

    #[test]
    fn test_endpoint_key() {
        let props = ConnectionProperties::default();
        assert_eq!(props.endpoint_key(), "guest@localhost:5672/");
    }

    #[test]
    fn test_persistent_key_separates_passwords_and_limits() {
        let right = ConnectionProperties {
            password: "right".to_string(),
            frame_max: 4096,
            ..ConnectionProperties::default()
        };
        let wrong = ConnectionProperties {
            password: "wrong".to_string(),
            ..right.clone()
        };
        let smaller_frames = ConnectionProperties {
            frame_max: 2048,
            ..right.clone()
        };

        assert_eq!(right.endpoint_key(), wrong.endpoint_key());
        assert_ne!(right.persistent_key(), wrong.persistent_key());
        assert_ne!(right.persistent_key(), smaller_frames.persistent_key());
        assert_eq!(right.persistent_key(), right.clone().persistent_key());
        assert!(!right.endpoint_key().contains("right"));
    }
}
