use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    find_app, find_app_mut, now_millis, now_secs, ok, short_id, to_json, ApiError, ApiResult, Db,
    Store, LEASE_NONCE_HEADER,
};

const SIGNALS: [&str; 13] = [
    "SIGABRT", "SIGALRM", "SIGFPE", "SIGHUP", "SIGILL", "SIGINT", "SIGKILL", "SIGPIPE", "SIGQUIT",
    "SIGSEGV", "SIGTERM", "SIGTRAP", "SIGUSR1",
];

const WAIT_STATES: [&str; 4] = ["started", "stopped", "suspended", "destroyed"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub state: String,
    pub region: String,
    pub instance_id: String,
    pub config: Value,
    pub cordoned: bool,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip)]
    metadata: HashMap<String, String>,
    #[serde(skip)]
    lease: Option<Lease>,
    #[serde(skip)]
    events: Vec<MachineEvent>,
    #[serde(skip)]
    versions: Vec<MachineVersion>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub nonce: String,
    pub expires_at: u64,
    pub owner: String,
    pub description: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub source: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MachineVersion {
    pub version: String,
    pub user_config: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateMachine {
    name: Option<String>,
    region: Option<String>,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    skip_launch: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WaitQuery {
    state: Option<String>,
    timeout: Option<u64>,
    instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AcquireLease {
    ttl: Option<u64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetMetadata {
    value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Signal {
    signal: String,
}

impl Machine {
    fn record(&mut self, kind: &str, status: &str) {
        let now = now_millis();
        self.updated_at = now;
        self.events.push(MachineEvent {
            id: short_id(),
            kind: kind.to_string(),
            status: status.to_string(),
            source: "user".to_string(),
            timestamp: now,
        });
    }

    fn new_version(&mut self) {
        self.instance_id = short_id().to_uppercase();
        self.versions.push(MachineVersion {
            version: self.instance_id.clone(),
            user_config: self.config.clone(),
        });
    }

    fn active_lease(&self) -> Option<&Lease> {
        self.lease.as_ref().filter(|l| l.expires_at > now_secs())
    }

    /// While a lease is held, mutations must present its nonce.
    fn check_lease(&self, headers: &HeaderMap) -> ApiResult<()> {
        match self.active_lease() {
            None => Ok(()),
            Some(lease) if nonce(headers) == Some(lease.nonce.as_str()) => Ok(()),
            Some(_) => Err(ApiError::conflict(format!(
                "machine {} is leased, provide {LEASE_NONCE_HEADER}",
                self.id
            ))),
        }
    }

    fn require_state(&self, state: &str, action: &str) -> ApiResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(ApiError::precondition(format!(
                "unable to {action} machine {}, not currently {state}",
                self.id
            )))
        }
    }
}

fn nonce(headers: &HeaderMap) -> Option<&str> {
    headers.get(LEASE_NONCE_HEADER).and_then(|v| v.to_str().ok())
}

fn find_machine<'a>(store: &'a Store, app: &str, id: &str) -> ApiResult<&'a Machine> {
    find_app(store, app)?
        .machines
        .get(id)
        .ok_or_else(|| ApiError::not_found("machine", id))
}

fn find_machine_mut<'a>(store: &'a mut Store, app: &str, id: &str) -> ApiResult<&'a mut Machine> {
    find_app_mut(store, app)?
        .machines
        .get_mut(id)
        .ok_or_else(|| ApiError::not_found("machine", id))
}

fn validate_config(config: &Value) -> ApiResult<()> {
    match config.get("image").and_then(Value::as_str) {
        Some(image) if !image.is_empty() => Ok(()),
        _ => Err(ApiError::bad_request("config.image is required")),
    }
}

pub(crate) async fn list_machines(State(db): State<Db>, Path(app): Path<String>) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machines: Vec<&Machine> = find_app(&store, &app)?.machines.values().collect();
    to_json(&machines)
}

pub(crate) async fn create_machine(
    State(db): State<Db>,
    Path(app): Path<String>,
    Json(input): Json<CreateMachine>,
) -> ApiResult<Json<Value>> {
    validate_config(&input.config)?;

    let mut store = db.write().await;
    let record = find_app_mut(&mut store, &app)?;
    let id = short_id();
    let now = now_millis();
    let mut machine = Machine {
        id: id.clone(),
        name: input.name.unwrap_or_else(|| format!("machine-{id}")),
        state: if input.skip_launch { "created" } else { "started" }.to_string(),
        region: input.region.unwrap_or_else(|| "ord".to_string()),
        instance_id: String::new(),
        config: input.config,
        cordoned: false,
        created_at: now,
        updated_at: now,
        metadata: HashMap::new(),
        lease: None,
        events: Vec::new(),
        versions: Vec::new(),
    };
    machine.new_version();
    let state = machine.state.clone();
    machine.record("launch", &state);
    let view = to_json(&machine)?;
    record.machines.insert(id, machine);
    Ok(view)
}

pub(crate) async fn get_machine(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    to_json(machine)
}

/// Full replacement: `config` must be present and is stored as given.
pub(crate) async fn update_machine(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> ApiResult<Json<Value>> {
    let config = input
        .get("config")
        .filter(|c| c.is_object())
        .cloned()
        .ok_or_else(|| ApiError::bad_request("config is required, partial updates are not supported"))?;
    validate_config(&config)?;

    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine.check_lease(&headers)?;
    machine.config = config;
    if let Some(region) = input.get("region").and_then(Value::as_str) {
        machine.region = region.to_string();
    }
    if let Some(name) = input.get("name").and_then(Value::as_str) {
        machine.name = name.to_string();
    }
    machine.new_version();
    machine.record("update", "replaced");
    to_json(&*machine)
}

pub(crate) async fn delete_machine(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let record = find_app_mut(&mut store, &app)?;
    let machine = record
        .machines
        .get(&id)
        .ok_or_else(|| ApiError::not_found("machine", &id))?;
    machine.check_lease(&headers)?;
    if !query.force {
        machine.require_state("stopped", "destroy")?;
    }
    record.machines.remove(&id);
    Ok(ok())
}

pub(crate) async fn get_metadata(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    to_json(&machine.metadata)
}

pub(crate) async fn set_metadata(
    State(db): State<Db>,
    Path((app, id, key)): Path<(String, String, String)>,
    Json(input): Json<SetMetadata>,
) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine.metadata.insert(key, input.value);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn delete_metadata(
    State(db): State<Db>,
    Path((app, id, key)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine
        .metadata
        .remove(&key)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiError::not_found("metadata key", &key))
}

pub(crate) async fn ps(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    if machine.state != "started" {
        return Ok(Json(json!([])));
    }
    let command = machine
        .config
        .get("init")
        .and_then(|init| init.get("cmd"))
        .cloned()
        .unwrap_or_else(|| json!(["/init"]));
    Ok(Json(json!([{
        "pid": 1,
        "command": command,
        "cpu": 0,
        "rss": 4_194_304,
        "directory": "/",
        "listen_sockets": []
    }])))
}

pub(crate) async fn start(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    if machine.state == "started" {
        return Err(ApiError::precondition(format!("machine {id} is already started")));
    }
    let previous_state = std::mem::replace(&mut machine.state, "started".to_string());
    machine.record("start", "started");
    Ok(Json(json!({ "previous_state": previous_state, "migrated": false, "new_host": "" })))
}

pub(crate) async fn stop(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine.check_lease(&headers)?;
    machine.require_state("started", "stop")?;
    machine.state = "stopped".to_string();
    machine.record("exit", "stopped");
    Ok(ok())
}

pub(crate) async fn restart(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine.require_state("started", "restart")?;
    machine.record("restart", "started");
    Ok(ok())
}

pub(crate) async fn cordon(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    set_cordoned(db, &app, &id, true).await
}

pub(crate) async fn uncordon(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    set_cordoned(db, &app, &id, false).await
}

async fn set_cordoned(db: Db, app: &str, id: &str, cordoned: bool) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, app, id)?;
    machine.cordoned = cordoned;
    let state = machine.state.clone();
    machine.record(if cordoned { "cordon" } else { "uncordon" }, &state);
    Ok(ok())
}

/// Answers immediately: 200 if the machine is already in the requested
/// state, 408 otherwise.
pub(crate) async fn wait(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<WaitQuery>,
) -> ApiResult<Json<Value>> {
    let state = query.state.unwrap_or_else(|| "started".to_string());
    if !WAIT_STATES.contains(&state.as_str()) {
        return Err(ApiError::bad_request(format!("invalid wait state {state}")));
    }
    let timeout = query.timeout.unwrap_or(60);
    if !(1..=60).contains(&timeout) {
        return Err(ApiError::bad_request("timeout must be between 1 and 60 seconds"));
    }

    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    if let Some(instance_id) = &query.instance_id {
        if *instance_id != machine.instance_id {
            return Err(ApiError::bad_request(format!(
                "instance_id {instance_id} does not match current version"
            )));
        }
    }
    if machine.state != state {
        return Err(ApiError::new(
            StatusCode::REQUEST_TIMEOUT,
            format!("deadline_exceeded: machine {id} did not reach {state} within {timeout}s"),
        ));
    }
    Ok(ok())
}

pub(crate) async fn versions(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    let newest_first: Vec<&MachineVersion> = machine.versions.iter().rev().collect();
    to_json(&newest_first)
}

pub(crate) async fn get_lease(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    let lease = machine
        .active_lease()
        .ok_or_else(|| ApiError::not_found("lease on machine", &id))?;
    Ok(Json(json!({ "status": "success", "data": lease })))
}

pub(crate) async fn acquire_lease(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Json(input): Json<AcquireLease>,
) -> ApiResult<Json<Value>> {
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    if machine.active_lease().is_some() {
        return Err(ApiError::conflict(format!("machine {id} already has an active lease")));
    }
    let lease = Lease {
        nonce: short_id(),
        expires_at: now_secs() + input.ttl.unwrap_or(30),
        owner: "mock@example.com".to_string(),
        description: input.description.unwrap_or_default(),
        version: machine.instance_id.clone(),
    };
    machine.lease = Some(lease.clone());
    Ok(Json(json!({ "status": "success", "data": lease })))
}

pub(crate) async fn release_lease(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let nonce = nonce(&headers)
        .ok_or_else(|| ApiError::bad_request(format!("missing {LEASE_NONCE_HEADER} header")))?
        .to_string();

    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    let held = machine
        .active_lease()
        .ok_or_else(|| ApiError::not_found("lease on machine", &id))?;
    if held.nonce != nonce {
        return Err(ApiError::conflict("lease nonce does not match"));
    }
    machine.lease = None;
    Ok(ok())
}

pub(crate) async fn signal(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
    Json(input): Json<Signal>,
) -> ApiResult<Json<Value>> {
    if !SIGNALS.contains(&input.signal.as_str()) {
        return Err(ApiError::bad_request(format!("unsupported signal {}", input.signal)));
    }
    let mut store = db.write().await;
    let machine = find_machine_mut(&mut store, &app, &id)?;
    machine.require_state("started", "signal")?;
    machine.record("signal", &input.signal);
    Ok(ok())
}

pub(crate) async fn events(
    State(db): State<Db>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let machine = find_machine(&store, &app, &id)?;
    let newest_first: Vec<&MachineEvent> = machine.events.iter().rev().collect();
    to_json(&newest_first)
}
