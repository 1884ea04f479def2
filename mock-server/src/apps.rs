use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{find_app, short_id, to_json, ApiError, ApiResult, AppRecord, Db};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub id: String,
    pub app_name: String,
    pub org_slug: String,
    pub status: String,
    pub machine_count: usize,
    pub volume_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateApp {
    pub app_name: String,
    pub org_slug: String,
}

impl AppRecord {
    fn view(&self) -> App {
        App {
            machine_count: self.machines.len(),
            volume_count: self.volumes.len(),
            ..self.app.clone()
        }
    }
}

pub(crate) async fn list_apps(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let org_slug = query
        .get("org_slug")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("org_slug is required"))?;

    let store = db.read().await;
    let mut apps: Vec<App> = store
        .apps
        .values()
        .filter(|record| &record.app.org_slug == org_slug)
        .map(AppRecord::view)
        .collect();
    apps.sort_by(|a, b| a.app_name.cmp(&b.app_name));
    Ok(Json(json!({ "total_apps": apps.len(), "apps": apps })))
}

pub(crate) async fn create_app(
    State(db): State<Db>,
    Json(input): Json<CreateApp>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if input.app_name.trim().is_empty() || input.org_slug.trim().is_empty() {
        return Err(ApiError::bad_request("app_name and org_slug must not be empty"));
    }

    let mut store = db.write().await;
    if store.apps.contains_key(&input.app_name) {
        return Err(ApiError::conflict(format!(
            "app {} already exists",
            input.app_name
        )));
    }
    let record = AppRecord {
        app: App {
            id: short_id(),
            app_name: input.app_name.clone(),
            org_slug: input.org_slug,
            status: "pending".to_string(),
            machine_count: 0,
            volume_count: 0,
        },
        machines: BTreeMap::new(),
        volumes: BTreeMap::new(),
    };
    let view = record.view();
    store.apps.insert(input.app_name, record);
    Ok((StatusCode::CREATED, to_json(&view)?))
}

pub(crate) async fn get_app(State(db): State<Db>, Path(app): Path<String>) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let record = find_app(&store, &app)?;
    to_json(&record.view())
}

pub(crate) async fn delete_app(State(db): State<Db>, Path(app): Path<String>) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    store
        .apps
        .remove(&app)
        .map(|_| StatusCode::ACCEPTED)
        .ok_or_else(|| ApiError::not_found("app", &app))
}
