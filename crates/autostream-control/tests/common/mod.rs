//! Shared fixtures: an in-process station answering over the in-memory bus.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use autostream_common::auth::PlaintextCredentials;
use autostream_common::bus::{Bus, Delivery, InMemoryBus, Subscription};
use autostream_common::models::{StationId, StationRecord};
use autostream_common::protocol::{RequestEnvelope, ResponseEnvelope, Topics};
use autostream_control::bus_handler::{self, StationHealth};
use autostream_control::correlation::{CorrelationRegister, DispatchMode};
use autostream_control::invoker::Invoker;
use autostream_control::state::AppState;
use autostream_control::stations::InMemoryDirectory;

pub const STATION_HOST: &str = "10.0.0.5";
pub const STATION_PORT: u16 = 4455;
pub const STATION_PASSWORD: &str = "pw";

pub fn station_id() -> StationId {
    StationId::from_endpoint(STATION_HOST, STATION_PORT)
}

pub fn station_record(name: &str) -> StationRecord {
    StationRecord {
        name: name.into(),
        host: STATION_HOST.into(),
        port: STATION_PORT,
        password: STATION_PASSWORD.into(),
    }
}

/// Mutable state of the simulated production application.
#[derive(Debug, Default)]
pub struct FakeObs {
    pub streaming: bool,
    pub recording: bool,
    pub current_scene: String,
    pub scenes: Vec<String>,
    /// Every command received, in order.
    pub log: Vec<String>,
    /// Last data sent with SetStreamServiceSettings.
    pub stream_settings: Option<Value>,
}

impl FakeObs {
    fn execute(&mut self, request: &RequestEnvelope) -> ResponseEnvelope {
        self.log.push(request.request.clone());
        if request.credential != STATION_PASSWORD {
            return ResponseEnvelope::err("wrong password");
        }
        match request.request.as_str() {
            "GetVersion" => ResponseEnvelope::ok(Some(json!({
                "obsVersion": "30.1.2",
                "obsWebSocketVersion": "5.4.2",
            }))),
            "GetStreamStatus" => ResponseEnvelope::ok(Some(json!({
                "outputActive": self.streaming,
                "outputTimecode": "00:01:02.003",
            }))),
            "GetRecordStatus" => ResponseEnvelope::ok(Some(json!({
                "outputActive": self.recording,
                "outputTimecode": "00:00:10.000",
            }))),
            "SetStreamServiceSettings" => {
                self.stream_settings = request.data.clone();
                ResponseEnvelope::ok(None)
            }
            "StartStream" => {
                self.streaming = true;
                ResponseEnvelope::ok(None)
            }
            "StopStream" => {
                self.streaming = false;
                ResponseEnvelope::ok(None)
            }
            "StartRecord" => {
                self.recording = true;
                ResponseEnvelope::ok(None)
            }
            "StopRecord" => {
                self.recording = false;
                ResponseEnvelope::ok(None)
            }
            "GetSceneList" => {
                let scenes: Vec<Value> = self.scenes.iter().map(|s| json!({ "sceneName": s })).collect();
                ResponseEnvelope::ok(Some(json!({
                    "currentProgramSceneName": self.current_scene,
                    "scenes": scenes,
                })))
            }
            "SetCurrentProgramScene" => {
                let scene = request
                    .data
                    .as_ref()
                    .and_then(|d| d.get("sceneName"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.current_scene = scene.to_string();
                ResponseEnvelope::ok(None)
            }
            other => ResponseEnvelope::err(format!("failed on remote command: {other}")),
        }
    }
}

/// A station agent stand-in bound to the in-memory bus.
pub struct FakeStation {
    pub obs: Arc<Mutex<FakeObs>>,
    _subscription: Subscription,
}

impl FakeStation {
    /// Answer every request for [`station_id`] after `delay`; `None` never answers.
    pub fn spawn(bus: &InMemoryBus, topics: &Topics, delay: Option<Duration>) -> Self {
        let obs = Arc::new(Mutex::new(FakeObs {
            current_scene: "Main".into(),
            scenes: vec!["Main".into(), "Break".into()],
            ..Default::default()
        }));

        let station = station_id();
        let response_topic = topics.response_topic(&station);
        let responder_bus = bus.clone();
        let responder_obs = obs.clone();

        let subscription = bus.subscribe(
            &[topics.request_topic(&station)],
            Arc::new(move |_topic: &str, payload: &[u8]| {
                let Ok(request) = RequestEnvelope::from_slice(payload) else {
                    return;
                };
                let Some(delay) = delay else {
                    responder_obs.lock().unwrap().log.push(request.request.clone());
                    return;
                };
                let response = responder_obs
                    .lock()
                    .unwrap()
                    .execute(&request)
                    .with_request_id(request.request_id.clone());
                let bus = responder_bus.clone();
                let topic = response_topic.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    bus.publish(&topic, response.to_bytes().unwrap(), Delivery::Exactly)
                        .await
                        .unwrap();
                });
            }),
        );

        Self {
            obs,
            _subscription: subscription,
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.obs.lock().unwrap().log.clone()
    }
}

/// The control side wired to an in-memory bus, as `main` wires it to MQTT.
pub struct Relay {
    pub bus: InMemoryBus,
    pub topics: Topics,
    pub invoker: Invoker,
    pub health: StationHealth,
    _subscription: Subscription,
}

impl Relay {
    pub fn new(mode: DispatchMode, timeout: Duration) -> Self {
        let bus = InMemoryBus::new();
        let topics = Topics::default();
        let register = CorrelationRegister::new(mode);
        let health = StationHealth::new();

        let subscription = bus.subscribe(
            &bus_handler::subscriptions(&topics),
            bus_handler::handler(topics.clone(), register.clone(), health.clone()),
        );
        let invoker = Invoker::new(Arc::new(bus.clone()), register, topics.clone()).with_timeout(timeout);

        Self {
            bus,
            topics,
            invoker,
            health,
            _subscription: subscription,
        }
    }

    pub fn app_state(&self, directory: InMemoryDirectory) -> AppState {
        AppState::new(
            self.invoker.clone(),
            Arc::new(directory),
            Arc::new(PlaintextCredentials),
            self.health.clone(),
        )
    }
}
