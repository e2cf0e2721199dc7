/**
 * API REST VIGIE - Serveur HTTP du collecteur
 *
 * RÔLE :
 * Point d'entrée des agents (POST /api/report) et surface de lecture pour le
 * dashboard (GET /api/devices, /api/devices/{id}, /api/settings).
 *
 * FONCTIONNEMENT :
 * - Le token partagé est dans le corps du rapport (compatibilité agents existants),
 *   il est vérifié avant toute écriture
 * - Corps lu en brut puis parsé : toutes les erreurs répondent en JSON
 *   {"success": false, "error": ...}
 * - Le statut "online" est calculé à la lecture depuis offline_interval
 *
 * CODES :
 * - 200 {"success": true} rapport appliqué
 * - 400 rapport malformé, 403 token invalide, 404 appareil inconnu, 500 stockage
 */

use crate::ingest::{handle_report, ReportRejection};
use crate::models::{is_offline, unix_now, Device, LatestStatus};
use crate::state::AppState;
use crate::store::StoreError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use tracing::error;

#[derive(Debug, Serialize)]
struct DeviceView {
    device_id: String,
    name: Option<String>,
    device_type: Option<String>,
    hardware: Option<String>,
    os: Option<String>,
    created_at: String,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    disk_percent: Option<f64>,
    network_recv_speed: Option<f64>,
    network_send_speed: Option<f64>,
    timestamp: Option<f64>,
    battery_percent: Option<f64>,
    battery_plugged: Option<bool>,
    received_at: Option<f64>,
    online: bool,
}

#[derive(Debug, Serialize)]
struct DevicesResponse {
    devices: Vec<DeviceView>,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    title: String,
    refresh_interval_ms: u64,
    offline_interval: u64,
}

fn to_view(device: Device, status: Option<LatestStatus>, now: f64, offline_after: f64) -> DeviceView {
    let status = status.as_ref();
    let timestamp = status.map(|s| s.report_timestamp);
    DeviceView {
        created_at: device.created_at.format(&Rfc3339).unwrap_or_default(),
        device_id: device.device_id,
        name: device.name,
        device_type: device.device_type,
        hardware: device.hardware,
        os: device.os,
        cpu_percent: status.and_then(|s| s.cpu_percent),
        memory_percent: status.and_then(|s| s.memory_percent),
        disk_percent: status.and_then(|s| s.disk_percent),
        network_recv_speed: status.and_then(|s| s.network_recv_speed),
        network_send_speed: status.and_then(|s| s.network_send_speed),
        timestamp,
        battery_percent: status.and_then(|s| s.battery_percent),
        battery_plugged: status.and_then(|s| s.battery_plugged),
        received_at: status.and_then(|s| s.received_at),
        online: !is_offline(now, timestamp, offline_after),
    }
}

fn failure(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "success": false, "error": msg }))).into_response()
}

impl IntoResponse for ReportRejection {
    fn into_response(self) -> Response {
        match self {
            ReportRejection::InvalidToken => failure(StatusCode::FORBIDDEN, "Invalid token"),
            ReportRejection::Malformed(reason) => failure(StatusCode::BAD_REQUEST, &reason),
            ReportRejection::Storage(e) => {
                error!("report not stored: {e}");
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
            }
        }
    }
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("registry read failed: {}", self.0);
        failure(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/report", post(post_report))
        .route("/api/devices", get(get_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/settings", get(get_settings))
        .with_state(app_state)
}

/// Le registre fait des appels bloquants (rusqlite) : on les sort des workers tokio
async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| E::from(StoreError::from(e)))?
}

// POST /api/report
async fn post_report(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, ReportRejection> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ReportRejection::Malformed(format!("invalid JSON: {e}")))?;
    blocking(move || handle_report(app.store.as_ref(), &app.cfg.server.token, body)).await?;
    Ok(Json(json!({ "success": true })))
}

// GET /api/devices (liste)
async fn get_devices(State(app): State<AppState>) -> Result<Json<DevicesResponse>, ApiError> {
    let offline_after = app.cfg.frontend.offline_interval as f64;
    let rows = blocking(move || -> Result<_, ApiError> {
        let mut rows = Vec::new();
        for device in app.store.list_devices()? {
            let status = app.store.get_latest_status(&device.device_id)?;
            rows.push((device, status));
        }
        Ok(rows)
    })
    .await?;

    let now = unix_now();
    let devices = rows
        .into_iter()
        .map(|(device, status)| to_view(device, status, now, offline_after))
        .collect();
    Ok(Json(DevicesResponse { devices }))
}

// GET /api/devices/{id} (détail)
async fn get_device(State(app): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let offline_after = app.cfg.frontend.offline_interval as f64;
    let found = blocking(move || -> Result<_, ApiError> {
        let Some(device) = app.store.get_device(&id)? else {
            return Ok(None);
        };
        let status = app.store.get_latest_status(&id)?;
        Ok(Some((device, status)))
    })
    .await?;

    match found {
        Some((device, status)) => Ok(Json(to_view(device, status, unix_now(), offline_after)).into_response()),
        None => Ok(failure(StatusCode::NOT_FOUND, "Unknown device")),
    }
}

// GET /api/settings (paramètres d'affichage)
async fn get_settings(State(app): State<AppState>) -> Json<SettingsView> {
    let f = &app.cfg.frontend;
    Json(SettingsView {
        title: f.title.clone(),
        refresh_interval_ms: f.refresh_interval.saturating_mul(1000),
        offline_interval: f.offline_interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use crate::store::{MemoryStore, RegistryStore, SqliteStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_with(store: Arc<dyn RegistryStore>) -> Router {
        let mut cfg = CollectorConfig::default();
        cfg.server.token = "secret".into();
        cfg.frontend.offline_interval = 60;
        build_router(AppState::new(store, cfg))
    }

    fn report(token: &str, id: &str, name: &str, force: bool, cpu: f64, ts: f64) -> Value {
        json!({
            "token": token,
            "device": {"name": name, "id": id, "type": "desktop", "hardware": "ryzen",
                       "os": "linux", "force_update": force},
            "status": {"cpu_percent": cpu, "memory_percent": 50.0, "disk_percent": 20.0,
                       "network_recv_speed": 1.5, "network_send_speed": 0.2,
                       "battery": {"percent": null, "plugged": null}},
            "timestamp": ts
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post(app: &Router, body: Value) -> (StatusCode, Value) {
        send(app, Method::POST, "/api/report", Some(body.to_string())).await
    }

    #[tokio::test]
    async fn report_then_list() {
        let app = app_with(Arc::new(MemoryStore::new()));
        let now = unix_now();
        let (code, body) = post(&app, report("secret", "pc", "PC", false, 12.0, now)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (code, body) = send(&app, Method::GET, "/api/devices", None).await;
        assert_eq!(code, StatusCode::OK);
        let entry = &body["devices"][0];
        assert_eq!(entry["device_id"], "pc");
        assert_eq!(entry["name"], "PC");
        assert_eq!(entry["device_type"], "desktop");
        assert_eq!(entry["cpu_percent"], 12.0);
        assert_eq!(entry["network_recv_speed"], 1.5);
        assert_eq!(entry["battery_percent"], Value::Null);
        assert_eq!(entry["battery_plugged"], Value::Null);
        assert_eq!(entry["timestamp"], now);
        assert_eq!(entry["online"], true);
    }

    #[tokio::test]
    async fn invalid_token_is_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let app = app_with(store.clone());
        let (code, body) = post(&app, report("wrong", "pc", "PC", false, 1.0, 1.0)).await;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"success": false, "error": "Invalid token"}));
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = app_with(Arc::new(MemoryStore::new()));
        let (code, body) = send(&app, Method::POST, "/api/report", Some("{not json".into())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (code, _) = post(&app, json!({"token": "secret", "device": {"name": "x"}})).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn device_without_report_lists_null_status() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_device(&crate::store::contract::device("idle", "Idle"), false).unwrap();
        let app = app_with(store);

        let (_, body) = send(&app, Method::GET, "/api/devices", None).await;
        let entry = &body["devices"][0];
        assert_eq!(entry["device_id"], "idle");
        assert_eq!(entry["cpu_percent"], Value::Null);
        assert_eq!(entry["timestamp"], Value::Null);
        assert_eq!(entry["online"], false);
    }

    #[tokio::test]
    async fn stale_device_is_offline() {
        let app = app_with(Arc::new(MemoryStore::new()));
        post(&app, report("secret", "old", "Old", false, 1.0, unix_now() - 600.0)).await;
        let (_, body) = send(&app, Method::GET, "/api/devices/old", None).await;
        assert_eq!(body["online"], false);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let app = app_with(Arc::new(MemoryStore::new()));
        let (code, body) = send(&app, Method::GET, "/api/devices/nope", None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn force_update_through_http() {
        let app = app_with(Arc::new(SqliteStore::open_in_memory().unwrap()));
        post(&app, report("secret", "pc", "PC", false, 1.0, 1.0)).await;
        post(&app, report("secret", "pc", "Ignored", false, 2.0, 2.0)).await;
        let (_, body) = send(&app, Method::GET, "/api/devices/pc", None).await;
        assert_eq!(body["name"], "PC");
        assert_eq!(body["cpu_percent"], 2.0);

        post(&app, report("secret", "pc", "Renamed", true, 3.0, 3.0)).await;
        let (_, body) = send(&app, Method::GET, "/api/devices/pc", None).await;
        assert_eq!(body["name"], "Renamed");
    }

    #[tokio::test]
    async fn settings_expose_display_intervals() {
        let app = app_with(Arc::new(MemoryStore::new()));
        let (_, body) = send(&app, Method::GET, "/api/settings", None).await;
        assert_eq!(body, json!({"title": "Vigie", "refresh_interval_ms": 5000, "offline_interval": 60}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_for_distinct_devices() {
        let store = Arc::new(MemoryStore::new());
        let app = app_with(store.clone());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let app = app.clone();
                tokio::spawn(async move {
                    let id = format!("dev-{i}");
                    post(&app, report("secret", &id, &id, false, i as f64, i as f64)).await
                })
            })
            .collect();
        for t in tasks {
            let (code, _) = t.await.unwrap();
            assert_eq!(code, StatusCode::OK);
        }

        assert_eq!(store.list_devices().unwrap().len(), 32);
        for i in 0..32 {
            let s = store.get_latest_status(&format!("dev-{i}")).unwrap().unwrap();
            assert_eq!(s.cpu_percent, Some(i as f64));
            assert_eq!(s.report_timestamp, i as f64);
        }
    }

    #[tokio::test]
    async fn timestamp_is_stored_exactly_as_sent() {
        let store = Arc::new(MemoryStore::new());
        let app = app_with(store.clone());
        // last digit lost without exact float parsing
        let raw = r#"{"token": "secret", "device": {"id": "pc"}, "status": {"cpu_percent": 0.1},
                      "timestamp": 1792348111.3161697}"#;
        let (code, _) = send(&app, Method::POST, "/api/report", Some(raw.to_string())).await;
        assert_eq!(code, StatusCode::OK);

        let stored = store.get_latest_status("pc").unwrap().unwrap();
        assert_eq!(stored.report_timestamp, 1792348111.3161697_f64);
        assert_eq!(stored.cpu_percent, Some(0.1));
    }

    #[tokio::test]
    async fn huge_refresh_interval_saturates() {
        let mut cfg = CollectorConfig::default();
        cfg.server.token = "secret".into();
        cfg.frontend.refresh_interval = u64::MAX;
        let app = build_router(AppState::new(Arc::new(MemoryStore::new()), cfg));
        let (code, body) = send(&app, Method::GET, "/api/settings", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["refresh_interval_ms"], u64::MAX);
    }

    /// Registre dont chaque écriture bloque le thread appelant
    struct SlowStore {
        inner: MemoryStore,
        delay: std::time::Duration,
    }

    impl RegistryStore for SlowStore {
        fn upsert_device(&self, device: &Device, force_update: bool) -> Result<(), StoreError> {
            self.inner.upsert_device(device, force_update)
        }

        fn upsert_latest_status(&self, device_id: &str, status: &LatestStatus) -> Result<(), StoreError> {
            self.inner.upsert_latest_status(device_id, status)
        }

        fn apply_report(&self, device: &Device, force_update: bool, status: &LatestStatus) -> Result<(), StoreError> {
            std::thread::sleep(self.delay);
            self.inner.apply_report(device, force_update, status)
        }

        fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
            self.inner.list_devices()
        }

        fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
            self.inner.get_device(device_id)
        }

        fn get_latest_status(&self, device_id: &str) -> Result<Option<LatestStatus>, StoreError> {
            self.inner.get_latest_status(device_id)
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_store_does_not_stall_the_runtime() {
        let delay = std::time::Duration::from_millis(400);
        let app = app_with(Arc::new(SlowStore { inner: MemoryStore::new(), delay }));

        let pending = {
            let app = app.clone();
            tokio::spawn(async move { post(&app, report("secret", "pc", "PC", false, 1.0, 1.0)).await })
        };

        // the single runtime thread must stay free while the write blocks
        let started = std::time::Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (code, _) = send(&app, Method::GET, "/api/settings", None).await;
        assert_eq!(code, StatusCode::OK);
        assert!(started.elapsed() < delay, "runtime stalled for {:?}", started.elapsed());

        let (code, _) = pending.await.unwrap();
        assert_eq!(code, StatusCode::OK);
    }
}
