//! Station directory: where each named station lives and how to unlock it.
//!
//! Account, group and schedule persistence belongs to a separate service;
//! the relay only needs get/put by name. [`InMemoryDirectory`] can be seeded
//! from a TOML file:
//!
//! ```toml
//! [[stations]]
//! name = "studio-a"
//! host = "10.0.0.5"
//! port = 4455
//! password = "secret"
//! ```

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use autostream_common::models::StationRecord;

use crate::config::ConfigError;

#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn get(&self, name: &str) -> Option<StationRecord>;

    /// Insert or replace. Returns `true` when the name was new.
    async fn put(&self, record: StationRecord) -> bool;

    async fn remove(&self, name: &str) -> Option<StationRecord>;

    /// All stations, ordered by name.
    async fn list(&self) -> Vec<StationRecord>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    stations: DashMap<String, StationRecord>,
}

#[derive(Debug, Deserialize)]
struct StationsFile {
    #[serde(default)]
    stations: Vec<StationRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = StationRecord>) -> Self {
        let stations = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self { stations }
    }

    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: StationsFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        Ok(Self::from_records(file.stations))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let directory = Self::from_toml(&text, path)?;
        tracing::info!(path = %path.display(), stations = directory.stations.len(), "loaded station directory");
        Ok(directory)
    }
}

#[async_trait]
impl StationDirectory for InMemoryDirectory {
    async fn get(&self, name: &str) -> Option<StationRecord> {
        self.stations.get(name).map(|r| r.value().clone())
    }

    async fn put(&self, record: StationRecord) -> bool {
        self.stations.insert(record.name.clone(), record).is_none()
    }

    async fn remove(&self, name: &str) -> Option<StationRecord> {
        self.stations.remove(name).map(|(_, record)| record)
    }

    async fn list(&self) -> Vec<StationRecord> {
        let mut records: Vec<StationRecord> = self.stations.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}
