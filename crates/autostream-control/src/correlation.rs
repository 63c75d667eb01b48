//! Correlation of bus responses with the callers waiting for them.
//!
//! A caller takes a [`Ticket`] with [`CorrelationRegister::begin`], publishes
//! its request, then parks in [`CorrelationRegister::await_result`]. The bus
//! callback hands each inbound response to [`CorrelationRegister::on_message`],
//! which fills the waiting slot at most once.
//!
//! In [`DispatchMode::Serialized`] only one ticket exists at a time across
//! the whole service, and a response is matched by station alone. In
//! [`DispatchMode::Concurrent`] every ticket carries a request id that the
//! station echoes, and a response must match both.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, OwnedMutexGuard};

use autostream_common::ids;
use autostream_common::models::StationId;
use autostream_common::protocol::ResponseEnvelope;

/// How requests are correlated with responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One request in flight service-wide; responses matched by station.
    #[default]
    Serialized,
    /// Many requests in flight; responses matched by request id and station.
    Concurrent,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serialized" => Ok(Self::Serialized),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(format!("expected serialized or concurrent, got {other}")),
        }
    }
}

/// What [`CorrelationRegister::on_message`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting caller.
    Resolved,
    /// A waiter matched but its slot was already filled.
    Duplicate,
    /// Nobody is waiting for this response.
    Stray,
}

struct Waiter {
    station: StationId,
    slot: Option<oneshot::Sender<ResponseEnvelope>>,
}

impl Waiter {
    fn new(station: StationId) -> (Self, oneshot::Receiver<ResponseEnvelope>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                station,
                slot: Some(tx),
            },
            rx,
        )
    }

    fn fill(&mut self, envelope: ResponseEnvelope) -> Resolution {
        match self.slot.take() {
            Some(tx) => {
                // The receiver only goes away with the ticket, which also
                // removes this waiter; a failed send is a lost race with end().
                let _ = tx.send(envelope);
                Resolution::Resolved
            }
            None => Resolution::Duplicate,
        }
    }
}

/// Shared register of in-flight requests. Cheap to clone.
#[derive(Clone)]
pub struct CorrelationRegister {
    inner: Arc<Inner>,
}

struct Inner {
    mode: DispatchMode,
    /// Exclusion permit for serialized mode; the owned guard lives in the ticket.
    gate: Arc<tokio::sync::Mutex<()>>,
    /// The single waiter in serialized mode. Also taken by the bus callback.
    awaited: Mutex<Option<Waiter>>,
    /// Waiters by request id in concurrent mode.
    waiters: DashMap<String, Waiter>,
}

/// Proof of an in-flight request. Dropping it ends the request.
pub struct Ticket {
    register: CorrelationRegister,
    station: StationId,
    request_id: Option<String>,
    receiver: oneshot::Receiver<ResponseEnvelope>,
    _permit: Option<OwnedMutexGuard<()>>,
}

impl Ticket {
    /// Correlation id to put on the request; `None` in serialized mode.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // Clear before the permit field drops, so the next holder starts clean.
        self.register.clear(self.request_id.as_deref());
    }
}

impl CorrelationRegister {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                awaited: Mutex::new(None),
                waiters: DashMap::new(),
            }),
        }
    }

    /// Start a request to `station`.
    ///
    /// In serialized mode this waits until every earlier ticket has ended.
    pub async fn begin(&self, station: &StationId) -> Ticket {
        let (waiter, receiver) = Waiter::new(station.clone());

        match self.inner.mode {
            DispatchMode::Serialized => {
                let permit = self.inner.gate.clone().lock_owned().await;
                *self.awaited() = Some(waiter);
                Ticket {
                    register: self.clone(),
                    station: station.clone(),
                    request_id: None,
                    receiver,
                    _permit: Some(permit),
                }
            }
            DispatchMode::Concurrent => {
                let request_id = ids::request_id();
                self.inner.waiters.insert(request_id.clone(), waiter);
                Ticket {
                    register: self.clone(),
                    station: station.clone(),
                    request_id: Some(request_id),
                    receiver,
                    _permit: None,
                }
            }
        }
    }

    /// Hand a response that arrived for `station` to its waiter, if any.
    pub fn on_message(&self, station: &StationId, envelope: ResponseEnvelope) -> Resolution {
        let resolution = match self.inner.mode {
            DispatchMode::Serialized => match self.awaited().as_mut() {
                Some(waiter) if waiter.station == *station => waiter.fill(envelope),
                _ => Resolution::Stray,
            },
            DispatchMode::Concurrent => {
                let Some(request_id) = envelope.request_id.clone() else {
                    tracing::debug!(station = %station, "response without request id dropped");
                    return Resolution::Stray;
                };
                match self.inner.waiters.get_mut(&request_id) {
                    Some(mut waiter) if waiter.station == *station => waiter.fill(envelope),
                    _ => Resolution::Stray,
                }
            }
        };

        match resolution {
            Resolution::Resolved => tracing::debug!(station = %station, "response delivered"),
            Resolution::Duplicate => tracing::debug!(station = %station, "duplicate response dropped"),
            Resolution::Stray => tracing::debug!(station = %station, "stray response dropped"),
        }
        resolution
    }

    /// Wait for the ticket's response, or synthesize a timeout envelope.
    pub async fn await_result(&self, ticket: &mut Ticket, timeout: Duration) -> ResponseEnvelope {
        match tokio::time::timeout(timeout, &mut ticket.receiver).await {
            Ok(Ok(envelope)) => envelope,
            // Sender gone means the slot was already consumed by an earlier await.
            Ok(Err(_)) | Err(_) => {
                tracing::debug!(station = %ticket.station, ?timeout, "no response in time");
                ResponseEnvelope::timeout()
            }
        }
    }

    /// End a request. Same as dropping the ticket.
    pub fn end(&self, ticket: Ticket) {
        drop(ticket);
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        match self.inner.mode {
            DispatchMode::Serialized => usize::from(self.awaited().is_some()),
            DispatchMode::Concurrent => self.inner.waiters.len(),
        }
    }

    fn clear(&self, request_id: Option<&str>) {
        match request_id {
            Some(id) => {
                self.inner.waiters.remove(id);
            }
            None => {
                *self.awaited() = None;
            }
        }
    }

    fn awaited(&self) -> MutexGuard<'_, Option<Waiter>> {
        self.inner
            .awaited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use serde_json::json;

    use super::*;

    fn station() -> StationId {
        StationId::from("10.0.0.5:4455")
    }

    #[tokio::test]
    async fn delivers_matching_response() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let mut ticket = register.begin(&station()).await;
        assert!(ticket.request_id().is_none());

        let envelope = ResponseEnvelope::ok(Some(json!({"ok": true})));
        assert_eq!(register.on_message(&station(), envelope.clone()), Resolution::Resolved);

        let got = register.await_result(&mut ticket, Duration::from_secs(1)).await;
        assert_eq!(got, envelope);
        register.end(ticket);
        assert_eq!(register.in_flight(), 0);
    }

    #[tokio::test]
    async fn slot_is_written_at_most_once() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let mut ticket = register.begin(&station()).await;

        let first = ResponseEnvelope::ok(Some(json!(1)));
        let second = ResponseEnvelope::ok(Some(json!(2)));
        assert_eq!(register.on_message(&station(), first.clone()), Resolution::Resolved);
        assert_eq!(register.on_message(&station(), second), Resolution::Duplicate);

        let got = register.await_result(&mut ticket, Duration::from_secs(1)).await;
        assert_eq!(got, first);
    }

    #[tokio::test]
    async fn other_station_is_stray() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let mut ticket = register.begin(&station()).await;

        let other = StationId::from("10.0.0.6:4455");
        let resolution = register.on_message(&other, ResponseEnvelope::ok(None));
        assert_eq!(resolution, Resolution::Stray);

        let got = register.await_result(&mut ticket, Duration::from_millis(50)).await;
        assert!(got.is_timeout());
    }

    #[tokio::test]
    async fn nothing_awaited_is_stray() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let resolution = register.on_message(&station(), ResponseEnvelope::ok(None));
        assert_eq!(resolution, Resolution::Stray);

        // A late response after end() is stray too.
        let ticket = register.begin(&station()).await;
        register.end(ticket);
        let resolution = register.on_message(&station(), ResponseEnvelope::ok(None));
        assert_eq!(resolution, Resolution::Stray);
    }

    #[tokio::test]
    async fn timeout_returns_within_bound() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let mut ticket = register.begin(&station()).await;

        let bound = Duration::from_millis(200);
        let started = Instant::now();
        let got = register.await_result(&mut ticket, bound).await;
        let elapsed = started.elapsed();

        assert_eq!(got, ResponseEnvelope::timeout());
        assert_eq!(got.error.as_deref(), Some("time limit exceeded"));
        assert!(got.data.is_none());
        assert!(elapsed >= bound);
        assert!(elapsed < bound + Duration::from_millis(500), "took {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn serialized_mode_allows_one_request_in_flight() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let register = register.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let ticket = register.begin(&station()).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                register.end(ticket);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(register.in_flight(), 0);
    }

    #[tokio::test]
    async fn dropped_ticket_releases_the_gate() {
        let register = CorrelationRegister::new(DispatchMode::Serialized);

        // A caller cancelled mid-await must not wedge the register.
        let cancelled = {
            let register = register.clone();
            tokio::spawn(async move {
                let mut ticket = register.begin(&station()).await;
                register.await_result(&mut ticket, Duration::from_secs(60)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancelled.abort();
        let _ = cancelled.await;

        let next = tokio::time::timeout(Duration::from_secs(1), register.begin(&station())).await;
        assert!(next.is_ok(), "gate still held after cancellation");
    }

    #[tokio::test]
    async fn concurrent_mode_matches_by_request_id() {
        let register = CorrelationRegister::new(DispatchMode::Concurrent);
        let mut a = register.begin(&station()).await;
        let mut b = register.begin(&station()).await;
        assert_eq!(register.in_flight(), 2);

        let id_a = a.request_id().map(str::to_string);
        let id_b = b.request_id().map(str::to_string);
        assert_ne!(id_a, id_b);

        let for_b = ResponseEnvelope::ok(Some(json!("b"))).with_request_id(id_b);
        let for_a = ResponseEnvelope::ok(Some(json!("a"))).with_request_id(id_a.clone());
        assert_eq!(register.on_message(&station(), for_b.clone()), Resolution::Resolved);
        assert_eq!(register.on_message(&station(), for_a.clone()), Resolution::Resolved);

        assert_eq!(register.await_result(&mut a, Duration::from_secs(1)).await, for_a);
        assert_eq!(register.await_result(&mut b, Duration::from_secs(1)).await, for_b);

        // Right id, wrong station.
        let wrong_station = ResponseEnvelope::ok(None).with_request_id(id_a);
        assert_eq!(
            register.on_message(&StationId::from("10.0.0.6:4455"), wrong_station),
            Resolution::Stray
        );

        register.end(a);
        register.end(b);
        assert_eq!(register.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrent_mode_drops_responses_without_id() {
        let register = CorrelationRegister::new(DispatchMode::Concurrent);
        let _ticket = register.begin(&station()).await;
        assert_eq!(
            register.on_message(&station(), ResponseEnvelope::ok(None)),
            Resolution::Stray
        );
    }

    #[test]
    fn dispatch_mode_parses() {
        assert_eq!("Serialized".parse::<DispatchMode>(), Ok(DispatchMode::Serialized));
        assert_eq!("concurrent".parse::<DispatchMode>(), Ok(DispatchMode::Concurrent));
        assert!("both".parse::<DispatchMode>().is_err());
    }
}
