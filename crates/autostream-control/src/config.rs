//! Service configuration from environment variables.
//!
//! | Variable                | Default            |
//! |-------------------------|--------------------|
//! | `LISTEN_ADDR`           | `0.0.0.0:3000`     |
//! | `BUS`                   | `mqtt` (`memory` for a broker-less dev run) |
//! | `MQTT_BROKER_HOST`      | `localhost`        |
//! | `MQTT_BROKER_PORT`      | `1883`             |
//! | `MQTT_USERNAME`         | unset              |
//! | `MQTT_PASSWORD`         | unset              |
//! | `MQTT_MAX_PACKET_SIZE`  | `1048576` bytes    |
//! | `MQTT_REQUEST_TOPIC`    | `requests`         |
//! | `MQTT_RESPONSE_TOPIC`   | `responses`        |
//! | `MQTT_LIVENESS_TOPIC`   | `liveness`         |
//! | `MQTT_STATE_TOPIC`      | `state`            |
//! | `REQUEST_TIMEOUT_SECS`  | `12`               |
//! | `DISPATCH_MODE`         | `serialized`       |
//! | `STATIONS_FILE`         | unset (empty directory) |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use autostream_common::bus::MqttSettings;
use autostream_common::ids;
use autostream_common::protocol::Topics;

use crate::correlation::DispatchMode;

/// How long a caller waits for a station before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which bus implementation the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Mqtt,
    Memory,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Self::Mqtt),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected mqtt or memory, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub bus: BusKind,
    pub mqtt: MqttSettings,
    pub topics: Topics,
    pub request_timeout: Duration,
    pub dispatch_mode: DispatchMode,
    pub stations_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            bus: BusKind::Mqtt,
            mqtt: MqttSettings {
                client_id: ids::client_id("control"),
                ..MqttSettings::default()
            },
            topics: Topics::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            dispatch_mode: DispatchMode::default(),
            stations_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("LISTEN_ADDR") {
            config.listen_addr = parse("LISTEN_ADDR", v)?;
        }
        if let Some(v) = lookup("BUS") {
            config.bus = parse("BUS", v)?;
        }
        if let Some(v) = lookup("MQTT_BROKER_HOST") {
            config.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_BROKER_PORT") {
            config.mqtt.port = parse("MQTT_BROKER_PORT", v)?;
        }
        config.mqtt.username = lookup("MQTT_USERNAME");
        config.mqtt.password = lookup("MQTT_PASSWORD");
        if let Some(v) = lookup("MQTT_MAX_PACKET_SIZE") {
            config.mqtt.max_packet_size = parse("MQTT_MAX_PACKET_SIZE", v)?;
        }

        if let Some(v) = lookup("MQTT_REQUEST_TOPIC") {
            config.topics.requests = v;
        }
        if let Some(v) = lookup("MQTT_RESPONSE_TOPIC") {
            config.topics.responses = v;
        }
        if let Some(v) = lookup("MQTT_LIVENESS_TOPIC") {
            config.topics.liveness = v;
        }
        if let Some(v) = lookup("MQTT_STATE_TOPIC") {
            config.topics.state = v;
        }

        if let Some(v) = lookup("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse("REQUEST_TIMEOUT_SECS", v.clone())?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "REQUEST_TIMEOUT_SECS",
                    value: v,
                    reason: "must be at least 1".into(),
                });
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("DISPATCH_MODE") {
            config.dispatch_mode = parse("DISPATCH_MODE", v)?;
        }
        config.stations_file = lookup("STATIONS_FILE").map(PathBuf::from);

        Ok(config)
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}
