//! Shared application state.

use std::sync::Arc;

use autostream_common::auth::CredentialProvider;
use autostream_common::models::StationRecord;

use crate::bus_handler::StationHealth;
use crate::commands::StationClient;
use crate::invoker::{Invoker, RelayError};
use crate::stations::StationDirectory;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    invoker: Invoker,
    directory: Arc<dyn StationDirectory>,
    credentials: Arc<dyn CredentialProvider>,
    /// Latest heartbeat and liveness report per station, fed by the bus handler.
    health: StationHealth,
}

impl AppState {
    pub fn new(
        invoker: Invoker,
        directory: Arc<dyn StationDirectory>,
        credentials: Arc<dyn CredentialProvider>,
        health: StationHealth,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                invoker,
                directory,
                credentials,
                health,
            }),
        }
    }

    pub fn invoker(&self) -> &Invoker {
        &self.inner.invoker
    }

    pub fn directory(&self) -> &dyn StationDirectory {
        self.inner.directory.as_ref()
    }

    pub fn health(&self) -> &StationHealth {
        &self.inner.health
    }

    /// A typed client for `record`, with its credential sealed for the bus.
    pub fn client_for(&self, record: &StationRecord) -> Result<StationClient, RelayError> {
        let station = record.station_id();
        let credential = self.inner.credentials.seal(&station, &record.password)?;
        Ok(StationClient::new(self.inner.invoker.clone(), station, credential))
    }
}
