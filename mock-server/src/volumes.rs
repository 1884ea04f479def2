use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{find_app, find_app_mut, now_millis, short_id, to_json, ApiError, ApiResult, Db, Store};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub state: String,
    pub size_gb: u32,
    pub region: String,
    pub encrypted: bool,
    pub snapshot_retention: u32,
    pub auto_backup_enabled: bool,
    pub created_at: u64,
    #[serde(skip)]
    snapshots: Vec<Snapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub size: u64,
    pub status: String,
    pub created_at: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateVolume {
    name: String,
    region: String,
    #[serde(default = "default_size_gb")]
    size_gb: u32,
    #[serde(default = "default_true")]
    encrypted: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateVolume {
    snapshot_retention: Option<u32>,
    auto_backup_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExtendVolume {
    size_gb: u32,
}

fn default_size_gb() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn find_volume<'a>(store: &'a Store, app: &str, id: &str) -> ApiResult<&'a Volume> {
    find_app(store, app)?
        .volumes
        .get(id)
        .ok_or_else(|| ApiError::not_found("volume", id))
}

fn find_volume_mut<'a>(store: &'a mut Store, app: &str, id: &str) -> ApiResult<&'a mut Volume> {
    find_app_mut(store, app)?
        .volumes
        .get_mut(id)
        .ok_or_else(|| ApiError::not_found("volume", id))
}

pub(crate) async fn list_volumes(State(db): State<Db>, Path(app): Path<String>) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let volumes: Vec<&Volume> = find_app(&store, &app)?.volumes.values().collect();
    to_json(&volumes)
}

pub(crate) async fn create_volume(
    State(db): State<Db>,
    Path(app): Path<String>,
    Json(input): Json<CreateVolume>,
) -> ApiResult<Json<Value>> {
    if input.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if input.size_gb == 0 || input.size_gb > 500 {
        return Err(ApiError::bad_request("size_gb must be between 1 and 500"));
    }

    let mut store = db.write().await;
    let record = find_app_mut(&mut store, &app)?;
    let volume = Volume {
        id: format!("vol_{}", short_id()),
        name: input.name,
        state: "created".to_string(),
        size_gb: input.size_gb,
        region: input.region,
        encrypted: input.encrypted,
        snapshot_retention: 5,
        auto_backup_enabled: true,
        created_at: now_millis(),
        snapshots: Vec::new(),
    };
    let view = to_json(&volume)?;
    record.volumes.insert(volume.id.clone(), volume);
    Ok(view)
}

pub(crate) async fn get_volume(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let volume = find_volume(&store, &app, &id)?;
    to_json(volume)
}

pub(crate) async fn update_volume(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Json(input): Json<UpdateVolume>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let volume = find_volume_mut(&mut store, &app, &id)?;
    if let Some(retention) = input.snapshot_retention {
        volume.snapshot_retention = retention;
    }
    if let Some(enabled) = input.auto_backup_enabled {
        volume.auto_backup_enabled = enabled;
    }
    to_json(&*volume)
}

pub(crate) async fn delete_volume(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let record = find_app_mut(&mut store, &app)?;
    let mut volume = record
        .volumes
        .remove(&id)
        .ok_or_else(|| ApiError::not_found("volume", &id))?;
    volume.state = "destroyed".to_string();
    to_json(&volume)
}

/// Volumes only grow.
pub(crate) async fn extend_volume(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Json(input): Json<ExtendVolume>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let volume = find_volume_mut(&mut store, &app, &id)?;
    if input.size_gb <= volume.size_gb {
        return Err(ApiError::bad_request(format!(
            "size_gb must be greater than current size {}",
            volume.size_gb
        )));
    }
    volume.size_gb = input.size_gb;
    Ok(Json(json!({ "needs_restart": false, "volume": &*volume })))
}

pub(crate) async fn list_snapshots(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let volume = find_volume(&store, &app, &id)?;
    to_json(&volume.snapshots)
}

pub(crate) async fn create_snapshot(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let volume = find_volume_mut(&mut store, &app, &id)?;
    let snapshot = Snapshot {
        id: format!("vs_{}", short_id()),
        size: u64::from(volume.size_gb) * 1024 * 1024 * 1024,
        status: "created".to_string(),
        created_at: now_millis(),
    };
    volume.snapshots.push(snapshot.clone());
    to_json(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_volume_defaults() {
        let input: CreateVolume =
            serde_json::from_str(r#"{"name":"data","region":"ord"}"#).unwrap();
        assert_eq!(input.size_gb, 1);
        assert!(input.encrypted);
    }

    #[test]
    fn create_volume_requires_region() {
        let result: Result<CreateVolume, _> = serde_json::from_str(r#"{"name":"data"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_volume_fields_are_optional() {
        let input: UpdateVolume = serde_json::from_str("{}").unwrap();
        assert!(input.snapshot_retention.is_none());
        assert!(input.auto_backup_enabled.is_none());
    }
}
