//! Integration tests driving the token exchange, telemetry fetch and the
//! change monitor against a fake upstream service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::time::Duration;

use fordpass_monitor::auth::{AuthError, Credentials, TokenManager};
use fordpass_monitor::monitor::{ChangeMonitor, CycleOutcome};
use fordpass_monitor::notify::Notifier;
use fordpass_monitor::storage::StateStore;
use fordpass_monitor::telemetry::{TelemetryClient, TelemetryError};

const PRIMARY_TOKEN: &str = "primary-token";
const EXCHANGE_TOKEN: &str = "exchange-token";

struct Upstream {
    auth_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    telemetry_calls: AtomicUsize,
    expires_in: i64,
    reject_primary: bool,
    telemetry_unauthorized: bool,
    /// (range km, actual state of charge) served by the telemetry endpoint
    battery: Mutex<(f64, f64)>,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            auth_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            telemetry_calls: AtomicUsize::new(0),
            expires_in: 3600,
            reject_primary: false,
            telemetry_unauthorized: false,
            battery: Mutex::new((100.0, 80.0)),
        }
    }
}

async fn primary_auth(
    State(upstream): State<Arc<Upstream>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    upstream.auth_calls.fetch_add(1, Ordering::SeqCst);

    if body.get("username").and_then(Value::as_str).is_none()
        || body.get("password").and_then(Value::as_str).is_none()
    {
        return (
            StatusCode::OK,
            Json(json!({ "status": 400, "message": "missing credentials" })),
        );
    }

    if upstream.reject_primary {
        return (
            StatusCode::OK,
            Json(json!({ "status": 401, "message": "bad credentials" })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({ "status": 200, "access_token": PRIMARY_TOKEN })),
    )
}

async fn token_exchange(
    State(upstream): State<Arc<Upstream>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    upstream.exchange_calls.fetch_add(1, Ordering::SeqCst);

    if form.get("subject_token").map(String::as_str) != Some(PRIMARY_TOKEN)
        || form.get("grant_type").map(String::as_str)
            != Some("urn:ietf:params:oauth:grant-type:token-exchange")
        || form.get("client_id").map(String::as_str) != Some("fordpass-prod")
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid exchange request" })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({ "access_token": EXCHANGE_TOKEN, "expires_in": upstream.expires_in })),
    )
}

async fn vehicle_status(
    State(upstream): State<Arc<Upstream>>,
    Path(vin): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    upstream.telemetry_calls.fetch_add(1, Ordering::SeqCst);

    if upstream.telemetry_unauthorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "token expired" })),
        );
    }

    let expected = format!("Bearer {}", EXCHANGE_TOKEN);
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());
    if bearer != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing bearer token" })),
        );
    }

    if vin != "TESTVIN123" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown vin" })));
    }

    let (range_km, charge) = *upstream.battery.lock().unwrap();
    (
        StatusCode::OK,
        Json(json!({
            "metrics": {
                "xevBatteryRange": { "value": range_km },
                "xevBatteryActualStateOfCharge": { "value": charge },
                "xevBatteryStateOfCharge": { "value": charge },
            }
        })),
    )
}

async fn spawn_upstream(upstream: Upstream) -> (String, Arc<Upstream>) {
    let upstream = Arc::new(upstream);

    let app = Router::new()
        .route("/api/auth", post(primary_auth))
        .route("/v1/auth/oidc/token", post(token_exchange))
        .route(
            "/v1/telemetry/sources/fordpass/vehicles/:vin",
            get(vehicle_status),
        )
        .with_state(upstream.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), upstream)
}

fn credentials() -> Credentials {
    Credentials {
        username: "driver@example.com".to_string(),
        password: "hunter2".to_string(),
        vin: "TESTVIN123".to_string(),
    }
}

fn token_manager(base: &str) -> TokenManager {
    TokenManager::with_endpoints(
        credentials(),
        &format!("{}/api/auth", base),
        &format!("{}/v1/auth/oidc/token", base),
    )
}

#[derive(Clone)]
struct RecordingNotifier {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        true
    }
}

#[tokio::test]
async fn second_token_request_is_served_from_cache() {
    let (base, upstream) = spawn_upstream(Upstream::default()).await;
    let manager = token_manager(&base);

    let first = manager.valid_exchange_token().await.unwrap();
    let second = manager.valid_exchange_token().await.unwrap();

    assert_eq!(first, EXCHANGE_TOKEN);
    assert_eq!(second, EXCHANGE_TOKEN);
    assert_eq!(upstream.auth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.exchange_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_runs_the_two_stage_exchange_again() {
    // An expires_in equal to the safety margin leaves no usable lifetime,
    // so every call must refresh.
    let (base, upstream) = spawn_upstream(Upstream {
        expires_in: 60,
        ..Upstream::default()
    })
    .await;
    let manager = token_manager(&base);

    manager.valid_exchange_token().await.unwrap();
    manager.valid_exchange_token().await.unwrap();

    assert_eq!(upstream.auth_calls.load(Ordering::SeqCst), 2);
    assert_eq!(upstream.exchange_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn embedded_rejection_fails_the_primary_stage() {
    let (base, upstream) = spawn_upstream(Upstream {
        reject_primary: true,
        ..Upstream::default()
    })
    .await;
    let manager = token_manager(&base);

    let err = manager.valid_exchange_token().await.unwrap_err();

    assert!(matches!(err, AuthError::Primary(_)));
    assert_eq!(
        err.to_string(),
        "primary authentication failed: 401/bad credentials"
    );
    assert_eq!(upstream.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fetch_attaches_bearer_and_decodes_metrics() {
    let (base, upstream) = spawn_upstream(Upstream::default()).await;
    let client = TelemetryClient::with_base_url(
        Arc::new(token_manager(&base)),
        "TESTVIN123",
        &base,
    );

    let raw = client.fetch_raw_status().await.unwrap();
    let reading = raw.battery_reading().unwrap();

    assert_eq!(reading.range_miles, 62);
    assert_eq!(reading.charge_percent, 80);
    assert_eq!(upstream.telemetry_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unauthorized_fetch_surfaces_status_and_body() {
    let (base, _upstream) = spawn_upstream(Upstream {
        telemetry_unauthorized: true,
        ..Upstream::default()
    })
    .await;
    let client = TelemetryClient::with_base_url(
        Arc::new(token_manager(&base)),
        "TESTVIN123",
        &base,
    );

    let err = client.fetch_raw_status().await.unwrap_err();

    match err {
        TelemetryError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("token expired"));
        }
        other => panic!("expected status error, got: {}", other),
    }
}

#[tokio::test]
async fn monitor_notifies_once_the_battery_moves() {
    let (base, upstream) = spawn_upstream(Upstream::default()).await;
    let client = TelemetryClient::with_base_url(
        Arc::new(token_manager(&base)),
        "TESTVIN123",
        &base,
    );

    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let mut monitor = ChangeMonitor::new(
        Box::new(client),
        Box::new(notifier.clone()),
        StateStore::new(dir.path().join("state.json")),
        Duration::from_secs(60),
    );

    // First observation establishes the baseline silently.
    assert_eq!(monitor.tick().await.unwrap(), CycleOutcome::NoChange);
    assert!(notifier.calls().is_empty());

    // 100 km / 80% -> 92 km / 85%: range drops 62 -> 57, charge rises.
    *upstream.battery.lock().unwrap() = (92.0, 85.0);
    assert_eq!(monitor.tick().await.unwrap(), CycleOutcome::Changed);

    let calls = notifier.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("Range has decreased by 5 miles"));
    assert!(calls[0].1.contains("Charge has increased by 5%"));

    // The persisted state survives for a fresh process.
    let persisted = StateStore::new(dir.path().join("state.json")).load();
    assert_eq!(persisted.last_range, Some(57));
    assert_eq!(persisted.last_charge, Some(85));
    assert!(!persisted.last_update.is_empty());
}
