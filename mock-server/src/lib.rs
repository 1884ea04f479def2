//! In-memory emulation of the Machines REST API.
//!
//! Serves the `/v1` apps, machines and volumes routes with enough server-side
//! rules (lifecycle states, leases, validation) to exercise every client
//! call end to end. Nothing is persisted; each `app()` starts empty.

mod apps;
mod machines;
mod volumes;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

pub use apps::{App, CreateApp};
pub use machines::{Lease, Machine, MachineEvent, MachineVersion};
pub use volumes::{Snapshot, Volume};

pub const LEASE_NONCE_HEADER: &str = "fly-machine-lease-nonce";

#[derive(Debug, Default)]
pub struct Store {
    apps: HashMap<String, AppRecord>,
}

#[derive(Debug)]
struct AppRecord {
    app: App,
    machines: BTreeMap<String, Machine>,
    volumes: BTreeMap<String, Volume>,
}

pub type Db = Arc<RwLock<Store>>;

/// Error response: `{"error": message}` with the given status.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(status, message.into())
    }

    fn not_found(what: &str, id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} {id} not found"))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn precondition(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            format!("failed_precondition: {}", message.into()),
        )
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    let machine = "/apps/{app}/machines/{machine_id}";
    let volume = "/apps/{app}/volumes/{volume_id}";

    let api = Router::new()
        .route("/apps", get(apps::list_apps).post(apps::create_app))
        .route("/apps/{app}", get(apps::get_app).delete(apps::delete_app))
        .route(
            "/apps/{app}/machines",
            get(machines::list_machines).post(machines::create_machine),
        )
        .route(
            machine,
            get(machines::get_machine)
                .post(machines::update_machine)
                .delete(machines::delete_machine),
        )
        .route(&format!("{machine}/metadata"), get(machines::get_metadata))
        .route(
            &format!("{machine}/metadata/{{key}}"),
            post(machines::set_metadata).delete(machines::delete_metadata),
        )
        .route(&format!("{machine}/ps"), get(machines::ps))
        .route(&format!("{machine}/start"), post(machines::start))
        .route(&format!("{machine}/stop"), post(machines::stop))
        .route(&format!("{machine}/restart"), post(machines::restart))
        .route(&format!("{machine}/cordon"), post(machines::cordon))
        .route(&format!("{machine}/uncordon"), post(machines::uncordon))
        .route(&format!("{machine}/wait"), get(machines::wait))
        .route(&format!("{machine}/versions"), get(machines::versions))
        .route(
            &format!("{machine}/lease"),
            get(machines::get_lease)
                .post(machines::acquire_lease)
                .delete(machines::release_lease),
        )
        .route(&format!("{machine}/signal"), post(machines::signal))
        .route(&format!("{machine}/events"), get(machines::events))
        .route(
            "/apps/{app}/volumes",
            get(volumes::list_volumes).post(volumes::create_volume),
        )
        .route(
            volume,
            get(volumes::get_volume)
                .put(volumes::update_volume)
                .delete(volumes::delete_volume),
        )
        .route(&format!("{volume}/extend"), put(volumes::extend_volume))
        .route(
            &format!("{volume}/snapshots"),
            get(volumes::list_snapshots).post(volumes::create_snapshot),
        )
        .with_state(db)
        .layer(middleware::from_fn(require_bearer));

    Router::new()
        .nest("/v1", api)
        .layer(middleware::from_fn(log_requests))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Rejects requests without `Authorization: Bearer <token>`. Any non-empty
/// token is accepted.
async fn require_bearer(req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty());
    if !authorized {
        return ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    next.run(req).await
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    info!(%method, %uri, status = response.status().as_u16(), "handled request");
    response
}

fn find_app<'a>(store: &'a Store, app: &str) -> ApiResult<&'a AppRecord> {
    store.apps.get(app).ok_or_else(|| ApiError::not_found("app", app))
}

fn find_app_mut<'a>(store: &'a mut Store, app: &str) -> ApiResult<&'a mut AppRecord> {
    store
        .apps
        .get_mut(app)
        .ok_or_else(|| ApiError::not_found("app", app))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..14].to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn ok() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Json<Value>> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| ApiError::internal(format!("serializing response failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_renders_json_body() {
        let response = ApiError::not_found("app", "ghost").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn precondition_errors_are_prefixed() {
        let ApiError(status, message) = ApiError::precondition("machine not stopped");
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(message, "failed_precondition: machine not stopped");
    }

    #[test]
    fn unserializable_views_become_internal_errors() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not valid JSON object keys");
        let ApiError(status, message) = to_json(&bad).unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(message.starts_with("serializing response failed"));

        let Json(value) = to_json(&vec!["a"]).unwrap();
        assert_eq!(value, json!(["a"]));
    }

    #[test]
    fn short_ids_are_fourteen_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 14);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
