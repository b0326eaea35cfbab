//! HTTP admin surface (component J, ambient): the narrow interface the
//! external admin API (§6) consumes from the core -- lookup by MAC,
//! publish-on-reply-topic, and an `is_alive` probe -- assembled into an axum
//! `Router`, grounded on `services/server/src/lib.rs`'s route-table style.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use gw_protocol::Mac;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::{oneshot, Mutex};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::AdminError;
use crate::registry::DeviceRegistry;

impl IntoResponse for AdminError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            AdminError::MissingBearer | AdminError::BadBearer => StatusCode::UNAUTHORIZED,
            AdminError::UnknownDevice => StatusCode::NOT_FOUND,
            AdminError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };
        (status, self.to_string()).into_response()
    }
}

/// How long an admin-pushed command waits for the device's paired reply
/// before the request times out.
const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-MAC oneshot waiters for admin-pushed commands (§6: `POST
/// /api/commands/<deviceId>` "waits for a paired response"). A device's next
/// publish resolves whichever waiter is registered for its MAC -- see
/// `Connection::handle_publish`'s call into `resolve`.
#[derive(Default)]
pub struct PendingResponses {
    inner: Mutex<HashMap<Mac, oneshot::Sender<serde_json::Value>>>,
}

impl PendingResponses {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn register(&self, mac: Mac) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(mac, tx);
        rx
    }

    pub async fn resolve(&self, mac: &Mac, value: serde_json::Value) {
        if let Some(tx) = self.inner.lock().await.remove(mac) {
            let _ = tx.send(value);
        }
    }

    async fn cancel(&self, mac: &Mac) {
        self.inner.lock().await.remove(mac);
    }
}

#[derive(Clone)]
pub struct AdminState {
    registry: DeviceRegistry,
    signature_key: String,
    pending: Arc<PendingResponses>,
}

impl AdminState {
    pub fn new(registry: DeviceRegistry, signature_key: String, pending: Arc<PendingResponses>) -> Self {
        Self {
            registry,
            signature_key,
            pending,
        }
    }
}

/// Build the admin router: `/healthz`, `/readyz`, and the two bearer-guarded
/// device endpoints from §6.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/commands/:device_id", post(post_command))
        .route("/api/devices/status", post(post_devices_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn readyz() -> impl IntoResponse {
    "ok"
}

/// `token = SHA-256(yyyy-MM-dd || MQTT_SIGNATURE_KEY)` in hex, evaluated in
/// server-local time (§6).
fn expected_bearer(signature_key: &str) -> String {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let digest = Sha256::digest(format!("{today}{signature_key}").as_bytes());
    hex::encode(digest)
}

fn check_bearer(headers: &HeaderMap, signature_key: &str) -> Result<(), AdminError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AdminError::MissingBearer)?;
    let value = value.to_str().map_err(|_| AdminError::MissingBearer)?;
    let presented = value.strip_prefix("Bearer ").ok_or(AdminError::MissingBearer)?;
    if presented == expected_bearer(signature_key) {
        Ok(())
    } else {
        Err(AdminError::BadBearer)
    }
}

async fn post_command(
    State(state): State<AdminState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AdminError> {
    check_bearer(&headers, &state.signature_key)?;
    let mac = Mac::from_colon_hex(&device_id).map_err(|_| AdminError::UnknownDevice)?;
    let conn = state
        .registry
        .get(&mac)
        .await
        .ok_or(AdminError::UnknownDevice)?;

    let rx = state.pending.register(mac).await;
    let body = serde_json::to_vec(&payload).expect("json value always serializes");
    conn.publish_reply(&body).await;

    match tokio::time::timeout(COMMAND_REPLY_TIMEOUT, rx).await {
        Ok(Ok(reply)) => Ok(Json(reply)),
        Ok(Err(_)) => Err(AdminError::Timeout),
        Err(_) => {
            state.pending.cancel(&mac).await;
            Err(AdminError::Timeout)
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct DevicesStatusRequest {
    #[serde(default)]
    macs: Option<Vec<String>>,
}

async fn post_devices_status(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Option<Json<DevicesStatusRequest>>,
) -> Result<impl IntoResponse, AdminError> {
    check_bearer(&headers, &state.signature_key)?;

    let requested = body.and_then(|Json(b)| b.macs);
    let macs: Vec<Mac> = match requested {
        Some(list) => list
            .iter()
            .filter_map(|raw| match Mac::from_colon_hex(raw) {
                Ok(mac) => Some(mac),
                Err(_) => {
                    warn!(mac = %raw, "ignoring malformed mac in status request");
                    None
                }
            })
            .collect(),
        None => state
            .registry
            .iterate()
            .await
            .iter()
            .filter_map(|conn| conn.mac())
            .collect(),
    };

    let mut statuses = HashMap::with_capacity(macs.len());
    for mac in macs {
        let alive = match state.registry.get(&mac).await {
            Some(conn) => conn.is_alive().await,
            None => false,
        };
        statuses.insert(mac.to_string(), alive);
    }

    Ok(Json(statuses))
}
