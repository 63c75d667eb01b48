//! Agent configuration: an optional TOML file overlaid by CLI flags and
//! environment variables.
//!
//! ```toml
//! station_id = "172.23.5.20:4455"
//! heartbeat_interval_secs = 10
//! request_timeout_secs = 10
//!
//! [obs]
//! host = "localhost"
//! port = 4455
//! password = "secret"
//!
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//!
//! [topics]
//! requests = "autostream/requests"
//!
//! [liveness]
//! interval_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use autostream_common::bus::MqttSettings;
use autostream_common::ids;
use autostream_common::models::StationId;
use autostream_common::protocol::Topics;

use crate::liveness::LivenessParams;

/// Autostream station agent daemon.
#[derive(Parser, Debug, Default)]
#[command(name = "autostream-agent", about = "Autostream station agent")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Station id this agent answers for (defaults to `{obs_host}:{obs_port}`).
    #[arg(long, env = "STATION_ID")]
    pub station_id: Option<String>,

    /// Control socket host.
    #[arg(long, env = "OBSWS_HOST")]
    pub obs_host: Option<String>,

    /// Control socket port.
    #[arg(long, env = "OBSWS_PORT")]
    pub obs_port: Option<u16>,

    /// Control socket password, used by the heartbeat and liveness loops.
    #[arg(long, env = "OBSWS_PASSWORD", hide_env_values = true)]
    pub obs_password: Option<String>,

    #[arg(long, env = "MQTT_BROKER_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_BROKER_PORT")]
    pub mqtt_port: Option<u16>,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Heartbeat interval in seconds.
    #[arg(long)]
    pub heartbeat_interval: Option<u64>,

    /// Liveness sampling interval in seconds.
    #[arg(long)]
    pub liveness_interval: Option<u64>,

    /// Upper bound in seconds on one relayed request. Keep it below the
    /// control service's request timeout so the caller sees this error.
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
}

/// Local control socket endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObsSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for ObsSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 4455,
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub station_id: Option<StationId>,
    pub obs: ObsSettings,
    pub mqtt: MqttSettings,
    pub topics: Topics,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub liveness: LivenessParams,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            station_id: None,
            obs: ObsSettings::default(),
            mqtt: MqttSettings {
                client_id: ids::client_id("agent"),
                ..MqttSettings::default()
            },
            topics: Topics::default(),
            heartbeat_interval_secs: 10,
            request_timeout_secs: 10,
            liveness: LivenessParams::default(),
        }
    }
}

impl AgentConfig {
    /// Read the file named by `--config` (if any), then apply flag overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let base = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.merge(cli)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    fn merge(mut self, cli: &Cli) -> Result<Self, ConfigError> {
        if let Some(id) = &cli.station_id {
            self.station_id = Some(StationId::new(id.clone()));
        }
        if let Some(host) = &cli.obs_host {
            self.obs.host = host.clone();
        }
        if let Some(port) = cli.obs_port {
            self.obs.port = port;
        }
        if let Some(password) = &cli.obs_password {
            self.obs.password = password.clone();
        }
        if let Some(host) = &cli.mqtt_host {
            self.mqtt.host = host.clone();
        }
        if let Some(port) = cli.mqtt_port {
            self.mqtt.port = port;
        }
        if cli.mqtt_username.is_some() {
            self.mqtt.username = cli.mqtt_username.clone();
        }
        if cli.mqtt_password.is_some() {
            self.mqtt.password = cli.mqtt_password.clone();
        }
        if let Some(secs) = cli.heartbeat_interval {
            self.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = cli.liveness_interval {
            self.liveness.interval_secs = secs;
        }
        if let Some(secs) = cli.request_timeout {
            self.request_timeout_secs = secs;
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "heartbeat_interval_secs",
            });
        }
        if self.liveness.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "liveness.interval_secs",
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "request_timeout_secs",
            });
        }
        Ok(self)
    }

    /// The configured station id, or the control socket endpoint.
    pub fn station_id(&self) -> StationId {
        self.station_id
            .clone()
            .unwrap_or_else(|| StationId::from_endpoint(&self.obs.host, self.obs.port))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AgentConfig::load(&Cli::default()).unwrap();
        assert_eq!(config.station_id().as_str(), "localhost:4455");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.topics.requests, "requests");
        assert!(config.mqtt.client_id.starts_with("agent_"));
    }

    #[test]
    fn file_values_are_read() {
        let config = AgentConfig::from_toml(
            r#"
            station_id = "172.23.5.20:4455"
            heartbeat_interval_secs = 5

            [obs]
            password = "secret"

            [mqtt]
            host = "broker.local"

            [topics]
            requests = "autostream/requests"

            [liveness]
            interval_secs = 30
            blank_fingerprint_len = 150
            "#,
            Path::new("agent.toml"),
        )
        .unwrap();

        assert_eq!(config.station_id().as_str(), "172.23.5.20:4455");
        assert_eq!(config.obs.password, "secret");
        assert_eq!(config.obs.port, 4455);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.topics.requests, "autostream/requests");
        assert_eq!(config.topics.responses, "responses");
        assert_eq!(config.liveness.interval_secs, 30);
        assert_eq!(config.liveness.blank_fingerprint_len, 150);
        assert_eq!(config.liveness.input_kind, "gstreamer-source");
    }

    #[test]
    fn flags_override_file() {
        let cli = Cli {
            obs_host: Some("10.0.0.5".into()),
            obs_password: Some("pw".into()),
            mqtt_username: Some("station".into()),
            heartbeat_interval: Some(3),
            request_timeout: Some(4),
            ..Cli::default()
        };
        let config = AgentConfig::default().merge(&cli).unwrap();
        assert_eq!(config.station_id().as_str(), "10.0.0.5:4455");
        assert_eq!(config.obs.password, "pw");
        assert_eq!(config.mqtt.username.as_deref(), Some("station"));
        assert_eq!(config.heartbeat_interval_secs, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cli = Cli {
            liveness_interval: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            AgentConfig::default().merge(&cli),
            Err(ConfigError::ZeroInterval { field: "liveness.interval_secs" })
        ));

        let cli = Cli {
            request_timeout: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            AgentConfig::default().merge(&cli),
            Err(ConfigError::ZeroInterval { field: "request_timeout_secs" })
        ));
    }

    #[test]
    fn bad_toml_names_the_file() {
        let err = AgentConfig::from_toml("heartbeat_interval_secs = \"often\"", Path::new("agent.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("agent.toml"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = AgentConfig::from_file(Path::new("/nonexistent/agent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
