//! Mock NGSIv1 context broker.
//!
//! Serves `/NGSI9/registerContext` and `/v1/updateContext` on a random local
//! port, records every request and answers like a well-behaved broker unless
//! told to fail.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use iotagent_core::BrokerConfig;
use iotagent_ngsi::{UpdateContextRequest, UpdateContextResponse, headers};

const REGISTER_CONTEXT_PATH: &str = "/NGSI9/registerContext";
const UPDATE_CONTEXT_PATH: &str = "/v1/updateContext";
const CANCEL_DURATION: &str = "PT1S";

/// One request as received by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub service: Option<String>,
    pub subservice: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn is_registration(&self) -> bool {
        self.path == REGISTER_CONTEXT_PATH && self.body["duration"] != CANCEL_DURATION
    }

    pub fn is_cancellation(&self) -> bool {
        self.path == REGISTER_CONTEXT_PATH && self.body["duration"] == CANCEL_DURATION
    }

    pub fn is_update(&self) -> bool {
        self.path == UPDATE_CONTEXT_PATH
    }

    /// Attribute names of the first registration or context element.
    pub fn attribute_names(&self) -> Vec<String> {
        let attributes = if self.path == REGISTER_CONTEXT_PATH {
            &self.body["contextRegistrations"][0]["attributes"]
        } else {
            &self.body["contextElements"][0]["attributes"]
        };
        attributes
            .as_array()
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|a| a["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value of one attribute in the first context element.
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        self.body["contextElements"][0]["attributes"]
            .as_array()?
            .iter()
            .find(|a| a["name"] == name)
            .and_then(|a| a["value"].as_str().map(String::from))
    }
}

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    registrations: Mutex<HashSet<String>>,
    registration_failure: Mutex<Option<(u16, String)>>,
    update_failure: Mutex<Option<(u16, String)>>,
    delay: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

impl MockState {
    fn record(&self, path: &str, headers: &HeaderMap, body: &Value) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        self.requests.lock().push(RecordedRequest {
            path: path.to_string(),
            service: header(headers::SERVICE),
            subservice: header(headers::SERVICE_PATH),
            body: body.clone(),
        });
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Mock context broker bound to `127.0.0.1`.
pub struct MockContextBroker {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockContextBroker {
    /// Start serving on a random port.
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route(REGISTER_CONTEXT_PATH, post(register_context))
            .route(UPDATE_CONTEXT_PATH, post(update_context))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "Mock context broker stopped");
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Broker settings pointing at this mock.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            timeout_ms: 2000,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn registrations(&self) -> Vec<RecordedRequest> {
        self.filtered(RecordedRequest::is_registration)
    }

    pub fn cancellations(&self) -> Vec<RecordedRequest> {
        self.filtered(RecordedRequest::is_cancellation)
    }

    pub fn updates(&self) -> Vec<RecordedRequest> {
        self.filtered(RecordedRequest::is_update)
    }

    /// Registration ids currently active at the mock.
    pub fn active_registrations(&self) -> HashSet<String> {
        self.state.registrations.lock().clone()
    }

    /// Answer every registration request with this HTTP error.
    pub fn fail_registrations(&self, status: u16, reason: &str) {
        *self.state.registration_failure.lock() = Some((status, reason.to_string()));
    }

    /// Answer every update request with this HTTP error.
    pub fn fail_updates(&self, status: u16, reason: &str) {
        *self.state.update_failure.lock() = Some((status, reason.to_string()));
    }

    pub fn reset_failures(&self) {
        *self.state.registration_failure.lock() = None;
        *self.state.update_failure.lock() = None;
    }

    /// Hold every answer back for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().clear();
    }

    fn filtered(&self, keep: fn(&RecordedRequest) -> bool) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

impl Drop for MockContextBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn error_body(status: u16, reason: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(json!({"errorCode": {"code": status.to_string(), "reasonPhrase": reason}})),
    )
}

async fn register_context(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(REGISTER_CONTEXT_PATH, &headers, &body);
    state.pause().await;

    let failure = state.registration_failure.lock().clone();
    if let Some((status, reason)) = failure {
        return error_body(status, &reason);
    }

    let duration = body["duration"].as_str().unwrap_or_default().to_string();
    let requested_id = body["registrationId"].as_str().map(String::from);

    let mut registrations = state.registrations.lock();
    let registration_id = match requested_id {
        Some(id) if duration == CANCEL_DURATION => {
            if !registrations.remove(&id) {
                return error_body(404, "Registration not found");
            }
            id
        }
        Some(id) => {
            if !registrations.contains(&id) {
                return error_body(404, "Registration not found");
            }
            id
        }
        None => {
            let id = format!(
                "mock-registration-{}",
                state.next_id.fetch_add(1, Ordering::SeqCst)
            );
            registrations.insert(id.clone());
            id
        }
    };

    (
        StatusCode::OK,
        Json(json!({"duration": duration, "registrationId": registration_id})),
    )
}

async fn update_context(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(UPDATE_CONTEXT_PATH, &headers, &body);
    state.pause().await;

    let failure = state.update_failure.lock().clone();
    if let Some((status, reason)) = failure {
        return error_body(status, &reason);
    }

    match serde_json::from_value::<UpdateContextRequest>(body) {
        Ok(request) => {
            let response = UpdateContextResponse::accepted(&request);
            (
                StatusCode::OK,
                Json(serde_json::to_value(response).unwrap_or_default()),
            )
        }
        Err(e) => error_body(400, &e.to_string()),
    }
}
