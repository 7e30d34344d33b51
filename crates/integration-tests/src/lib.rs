//! Integration test support for Punchcard.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p punchcard-integration-tests
//! ```
//!
//! Everything runs in-process: [`FakeBackend`] serves the backend identity
//! API on `127.0.0.1:0` and the console router is driven with
//! `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use punchcard_console::ConsoleConfig;
use serde_json::{Value, json};
use url::Url;

/// Build an identity payload the way the backend sends it.
#[must_use]
pub fn identity_payload(merchant_id: &str, name: Option<&str>, onboarding_completed: bool) -> Value {
    json!({
        "merchantId": merchant_id,
        "customerId": format!("cust_{merchant_id}"),
        "name": name,
        "ico": null,
        "phone": null,
        "address": null,
        "websiteUrl": null,
        "onboardingCompleted": onboarding_completed
    })
}

#[derive(Default)]
struct BackendState {
    /// Known tokens and the record behind each (`None` = not provisioned).
    identities: Mutex<HashMap<String, Option<Value>>>,
    lookup_failure: Mutex<Option<StatusCode>>,
    ensure_requests: Mutex<Vec<Value>>,
    onboarding_requests: Mutex<Vec<Value>>,
    lookups: AtomicUsize,
    ensures: AtomicUsize,
}

/// In-process fake of the Punchcard backend identity API.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<BackendState>,
    base_url: Url,
}

impl FakeBackend {
    /// Serve a fresh backend on an ephemeral port.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn spawn() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/api/me", get(fetch_identity))
            .route("/api/me/ensure", post(ensure_identity))
            .route("/api/onboarding", post(complete_onboarding))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake backend");
        let addr = listener.local_addr().expect("Failed to read local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let base_url = Url::parse(&format!("http://{addr}")).expect("Invalid fake backend URL");
        Self { state, base_url }
    }

    /// Base URL of the fake.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Accept `token` for a principal that has no identity yet.
    pub fn allow(&self, token: &str) {
        self.state.identities.lock().insert(token.to_string(), None);
    }

    /// Accept `token` for a principal with an existing identity.
    pub fn provision(&self, token: &str, record: Value) {
        self.state
            .identities
            .lock()
            .insert(token.to_string(), Some(record));
    }

    /// Make every lookup answer `status`.
    pub fn fail_lookups(&self, status: StatusCode) {
        *self.state.lookup_failure.lock() = Some(status);
    }

    /// The record currently stored for `token`.
    #[must_use]
    pub fn record(&self, token: &str) -> Option<Value> {
        self.state.identities.lock().get(token).cloned().flatten()
    }

    /// Number of `GET /api/me` calls.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.state.lookups.load(Ordering::SeqCst)
    }

    /// Number of `POST /api/me/ensure` calls.
    #[must_use]
    pub fn ensures(&self) -> usize {
        self.state.ensures.load(Ordering::SeqCst)
    }

    /// Bodies received by `POST /api/me/ensure`.
    #[must_use]
    pub fn ensure_requests(&self) -> Vec<Value> {
        self.state.ensure_requests.lock().clone()
    }

    /// Bodies received by `POST /api/onboarding`.
    #[must_use]
    pub fn onboarding_requests(&self) -> Vec<Value> {
        self.state.onboarding_requests.lock().clone()
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Resolve the caller's token, or the response to send if it is unknown.
fn authorize(state: &BackendState, headers: &HeaderMap) -> Result<String, Response> {
    let token = bearer(headers).ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())?;
    if state.identities.lock().contains_key(&token) {
        Ok(token)
    } else {
        Err(StatusCode::UNAUTHORIZED.into_response())
    }
}

async fn fetch_identity(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.lookups.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = *state.lookup_failure.lock() {
        return (status, "lookup failed").into_response();
    }
    let token = match authorize(&state, &headers) {
        Ok(token) => token,
        Err(response) => return response,
    };

    match state.identities.lock().get(&token).cloned().flatten() {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "not provisioned").into_response(),
    }
}

async fn ensure_identity(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.ensures.fetch_add(1, Ordering::SeqCst);
    state.ensure_requests.lock().push(body.clone());
    let token = match authorize(&state, &headers) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let mut identities = state.identities.lock();
    let slot = identities.entry(token).or_default();
    if slot.is_some() {
        return (StatusCode::CONFLICT, "already provisioned").into_response();
    }

    let merchant_id = format!("m{}", state.ensures.load(Ordering::SeqCst));
    let record = identity_payload(&merchant_id, body["displayName"].as_str(), false);
    *slot = Some(record.clone());
    (StatusCode::CREATED, Json(record)).into_response()
}

async fn complete_onboarding(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.onboarding_requests.lock().push(body.clone());
    let token = match authorize(&state, &headers) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let mut identities = state.identities.lock();
    let Some(Some(record)) = identities.get_mut(&token) else {
        return (StatusCode::NOT_FOUND, "not provisioned").into_response();
    };
    record["name"] = body["name"].clone();
    record["onboardingCompleted"] = json!(true);
    StatusCode::NO_CONTENT.into_response()
}

/// Console configuration pointing at `api`, with a fast token retry.
///
/// # Panics
///
/// Panics if the configuration is rejected.
#[must_use]
pub fn console_config(api: &Url) -> ConsoleConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("CONSOLE_BASE_URL", "http://localhost:3000".to_string()),
        ("PUNCHCARD_API_BASE_URL", api.to_string()),
        ("TOKEN_RETRY_DELAY_MS", "5".to_string()),
    ]);
    ConsoleConfig::from_lookup(|key| vars.get(key).cloned()).expect("Invalid test configuration")
}
