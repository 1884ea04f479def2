//! Machines API client: one method per remote endpoint.
//!
//! # Design
//! `MachinesClient` owns an immutable `Config` and a `Transport`. Every
//! operation goes through the same three steps:
//!
//! 1. `build_request` merges the call's `Overrides` onto the config, expands
//!    the endpoint's URL template and attaches auth, headers, query and body.
//!    This step is pure.
//! 2. The transport executes the request, applying the merged retry policy.
//! 3. `parse_response` classifies the outcome: a 2xx status is success,
//!    anything else is `ClientError::Status` carrying the same envelope.
//!
//! Request and response bodies are opaque `serde_json::Value`s.

use serde_json::Value;

use crate::config::{upsert_header, upsert_param, Config, Overrides};
use crate::endpoint::{expand_path, Endpoint};
use crate::error::{ApiResult, ClientError};
use crate::http::{HttpRequest, HttpResponse, Response};
use crate::transport::{Transport, UreqTransport};

/// Query arguments of a `machine_wait` long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitParams {
    pub state: String,
    pub timeout_secs: u64,
    pub instance_id: Option<String>,
}

impl WaitParams {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            instance_id: None,
        }
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("state".to_string(), self.state.clone()),
            ("timeout".to_string(), self.timeout_secs.to_string()),
        ];
        if let Some(instance_id) = &self.instance_id {
            query.push(("instance_id".to_string(), instance_id.clone()));
        }
        query
    }
}

#[derive(Debug, Clone)]
pub struct MachinesClient<T = UreqTransport> {
    config: Config,
    transport: T,
}

impl MachinesClient<UreqTransport> {
    /// Client configured from `FLY_API_TOKEN` / `FLY_API_BASE_URL`.
    pub fn from_env() -> Self {
        Self::new(Config::from_env(), UreqTransport::new())
    }
}

impl<T: Transport> MachinesClient<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the request for `endpoint` without performing any I/O.
    ///
    /// Query parameters are the config defaults, then the overrides, then
    /// the operation's own `query`; a later source wins on a shared key.
    /// An explicit `authorization` or `content-type` header replaces the
    /// one derived from auth and body.
    pub fn build_request(
        &self,
        endpoint: Endpoint,
        path_params: &[(&str, &str)],
        query: Vec<(String, String)>,
        body: Option<&Value>,
        overrides: &Overrides,
    ) -> HttpRequest {
        let config = self.config.merge(overrides);

        let mut headers = Vec::with_capacity(config.headers.len() + 2);
        if let Some(auth) = &config.auth {
            headers.push(("authorization".to_string(), auth.header_value()));
        }
        let body = body.map(Value::to_string);
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        for (name, value) in config.headers {
            upsert_header(&mut headers, name, value);
        }

        let mut params = config.params;
        for (key, value) in query {
            upsert_param(&mut params, key, value);
        }

        HttpRequest {
            method: endpoint.method(),
            url: format!(
                "{}{}",
                config.base_url,
                expand_path(endpoint.template(), path_params)
            ),
            query: params,
            headers,
            body,
        }
    }

    /// Classify a completed exchange by status code.
    pub fn parse_response(&self, raw: HttpResponse) -> ApiResult {
        let response = Response::from(raw);
        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Status(response))
        }
    }

    /// Build, send and classify one call to `endpoint`.
    pub fn call(
        &self,
        endpoint: Endpoint,
        path_params: &[(&str, &str)],
        query: Vec<(String, String)>,
        body: Option<&Value>,
        overrides: &Overrides,
    ) -> ApiResult {
        let req = self.build_request(endpoint, path_params, query, body, overrides);
        let retry = overrides.retry.as_ref().unwrap_or(&self.config.retry);
        let raw = self.transport.send(&req, retry)?;
        self.parse_response(raw)
    }

    fn simple(&self, endpoint: Endpoint, path_params: &[(&str, &str)], overrides: &Overrides) -> ApiResult {
        self.call(endpoint, path_params, Vec::new(), None, overrides)
    }

    fn with_body(
        &self,
        endpoint: Endpoint,
        path_params: &[(&str, &str)],
        body: &Value,
        overrides: &Overrides,
    ) -> ApiResult {
        self.call(endpoint, path_params, Vec::new(), Some(body), overrides)
    }

    // -----------------------------------------------------------------------
    // Apps
    // -----------------------------------------------------------------------

    pub fn app_list(&self, org_slug: &str, overrides: &Overrides) -> ApiResult {
        let query = vec![("org_slug".to_string(), org_slug.to_string())];
        self.call(Endpoint::AppList, &[], query, None, overrides)
    }

    /// Body: `{"app_name": ..., "org_slug": ...}`.
    pub fn app_create(&self, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(Endpoint::AppCreate, &[], body, overrides)
    }

    pub fn app_delete(&self, app: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::AppDelete, &[("app", app)], overrides)
    }

    pub fn app_retrieve(&self, app: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::AppRetrieve, &[("app", app)], overrides)
    }

    // -----------------------------------------------------------------------
    // Machines
    // -----------------------------------------------------------------------

    pub fn machine_list(&self, app: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineList, &[("app", app)], overrides)
    }

    pub fn machine_create(&self, app: &str, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(Endpoint::MachineCreate, &[("app", app)], body, overrides)
    }

    /// Replaces the machine configuration. The server does not merge, so
    /// `body` must carry the complete config.
    pub fn machine_update(
        &self,
        app: &str,
        machine_id: &str,
        body: &Value,
        overrides: &Overrides,
    ) -> ApiResult {
        self.with_body(
            Endpoint::MachineUpdate,
            &[("app", app), ("machine_id", machine_id)],
            body,
            overrides,
        )
    }

    pub fn machine_retrieve(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineRetrieve, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    /// Rejected by the server unless the machine is stopped.
    pub fn machine_delete(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineDelete, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_metadata_retrieve(
        &self,
        app: &str,
        machine_id: &str,
        overrides: &Overrides,
    ) -> ApiResult {
        self.simple(
            Endpoint::MachineMetadataRetrieve,
            &[("app", app), ("machine_id", machine_id)],
            overrides,
        )
    }

    /// Body: `{"value": ...}`.
    pub fn machine_metadata_update(
        &self,
        app: &str,
        machine_id: &str,
        key: &str,
        body: &Value,
        overrides: &Overrides,
    ) -> ApiResult {
        self.with_body(
            Endpoint::MachineMetadataUpdate,
            &[("app", app), ("machine_id", machine_id), ("key", key)],
            body,
            overrides,
        )
    }

    pub fn machine_metadata_delete(
        &self,
        app: &str,
        machine_id: &str,
        key: &str,
        overrides: &Overrides,
    ) -> ApiResult {
        self.simple(
            Endpoint::MachineMetadataDelete,
            &[("app", app), ("machine_id", machine_id), ("key", key)],
            overrides,
        )
    }

    pub fn machine_ps(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachinePs, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_start(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineStart, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_stop(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineStop, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_restart(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineRestart, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_cordon(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineCordon, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    pub fn machine_uncordon(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::MachineUncordon, &[("app", app), ("machine_id", machine_id)], overrides)
    }

    /// Single long-poll request; the server holds it open until the machine
    /// reaches `params.state` or `params.timeout_secs` elapses. The only
    /// client-side bound is the transport's own timeout.
    pub fn machine_wait(
        &self,
        app: &str,
        machine_id: &str,
        params: &WaitParams,
        overrides: &Overrides,
    ) -> ApiResult {
        self.call(
            Endpoint::MachineWait,
            &[("app", app), ("machine_id", machine_id)],
            params.to_query(),
            None,
            overrides,
        )
    }

    pub fn machine_versions_list(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::MachineVersionsList,
            &[("app", app), ("machine_id", machine_id)],
            overrides,
        )
    }

    pub fn machine_lease_retrieve(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::MachineLeaseRetrieve,
            &[("app", app), ("machine_id", machine_id)],
            overrides,
        )
    }

    /// Body: `{"ttl": seconds}`. The nonce comes back in the response body.
    pub fn machine_lease_acquire(
        &self,
        app: &str,
        machine_id: &str,
        body: &Value,
        overrides: &Overrides,
    ) -> ApiResult {
        self.with_body(
            Endpoint::MachineLeaseAcquire,
            &[("app", app), ("machine_id", machine_id)],
            body,
            overrides,
        )
    }

    /// Needs the lease nonce header; pass it with `Overrides::lease_nonce`.
    pub fn machine_lease_release(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::MachineLeaseRelease,
            &[("app", app), ("machine_id", machine_id)],
            overrides,
        )
    }

    /// Body: `{"signal": "SIGTERM"}`.
    pub fn machine_signal(&self, app: &str, machine_id: &str, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(
            Endpoint::MachineSignal,
            &[("app", app), ("machine_id", machine_id)],
            body,
            overrides,
        )
    }

    pub fn machine_event_list(&self, app: &str, machine_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::MachineEventList,
            &[("app", app), ("machine_id", machine_id)],
            overrides,
        )
    }

    // -----------------------------------------------------------------------
    // Volumes
    // -----------------------------------------------------------------------

    pub fn volume_list(&self, app: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::VolumeList, &[("app", app)], overrides)
    }

    pub fn volume_create(&self, app: &str, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(Endpoint::VolumeCreate, &[("app", app)], body, overrides)
    }

    pub fn volume_retrieve(&self, app: &str, volume_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::VolumeRetrieve, &[("app", app), ("volume_id", volume_id)], overrides)
    }

    pub fn volume_update(&self, app: &str, volume_id: &str, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(
            Endpoint::VolumeUpdate,
            &[("app", app), ("volume_id", volume_id)],
            body,
            overrides,
        )
    }

    pub fn volume_delete(&self, app: &str, volume_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(Endpoint::VolumeDelete, &[("app", app), ("volume_id", volume_id)], overrides)
    }

    /// Body: `{"size_gb": n}`; volumes only grow.
    pub fn volume_extend(&self, app: &str, volume_id: &str, body: &Value, overrides: &Overrides) -> ApiResult {
        self.with_body(
            Endpoint::VolumeExtend,
            &[("app", app), ("volume_id", volume_id)],
            body,
            overrides,
        )
    }

    pub fn volume_snapshots_list(&self, app: &str, volume_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::VolumeSnapshotsList,
            &[("app", app), ("volume_id", volume_id)],
            overrides,
        )
    }

    pub fn volume_snapshot_create(&self, app: &str, volume_id: &str, overrides: &Overrides) -> ApiResult {
        self.simple(
            Endpoint::VolumeSnapshotCreate,
            &[("app", app), ("volume_id", volume_id)],
            overrides,
        )
    }
}
