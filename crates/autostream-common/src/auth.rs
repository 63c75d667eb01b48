//! Credential plumbing for requests bound to a station.
//!
//! The control service never talks to a station's control socket itself; it
//! seals a credential into each request and the agent presents it locally.
//! Sealing goes through [`CredentialProvider`] so a stronger scheme can
//! replace [`PlaintextCredentials`] without touching the invoker.

use thiserror::Error;

use crate::models::StationId;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential configured for station {0}")]
    Missing(StationId),
}

// ── Provider ────────────────────────────────────────────────────────

/// Produces the credential embedded in a request for `station`.
pub trait CredentialProvider: Send + Sync {
    /// `secret` is the station's stored control-socket secret.
    fn seal(&self, station: &StationId, secret: &str) -> Result<String, CredentialError>;
}

/// Passes the stored secret through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCredentials;

impl CredentialProvider for PlaintextCredentials {
    fn seal(&self, _station: &StationId, secret: &str) -> Result<String, CredentialError> {
        Ok(secret.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_passes_secret_through() {
        let station = StationId::from("10.0.0.5:4455");
        let sealed = PlaintextCredentials.seal(&station, "hunter2").unwrap();
        assert_eq!(sealed, "hunter2");
    }

    #[test]
    fn empty_secret_is_allowed() {
        // Control sockets with authentication disabled accept any password.
        let station = StationId::from("10.0.0.5:4455");
        assert_eq!(PlaintextCredentials.seal(&station, "").unwrap(), "");
    }
}
