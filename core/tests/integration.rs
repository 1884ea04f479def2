//! End-to-end scenarios against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `MachinesClient`
//! over real HTTP through `UreqTransport`. Each test gets its own server so
//! state never leaks between tests.

use machines_core::{
    ClientError, Config, MachinesClient, Overrides, RetryPolicy, UreqTransport, WaitParams,
};
use serde_json::{json, Value};

/// Start a mock server on a random port and return its `/v1` base URL.
fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}/v1")
}

fn client() -> MachinesClient {
    let config = Config::new(&start_server())
        .with_bearer("test-token")
        .with_retry(RetryPolicy::never());
    MachinesClient::new(config, UreqTransport::new())
}

fn none() -> Overrides {
    Overrides::new()
}

fn body_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value[key].as_str().unwrap_or_else(|| panic!("missing {key} in {value}"))
}

fn create_app(client: &MachinesClient, name: &str) {
    client
        .app_create(&json!({"org_slug": "org1", "app_name": name}), &none())
        .unwrap();
}

fn create_machine(client: &MachinesClient, app: &str, skip_launch: bool) -> String {
    let created = client
        .machine_create(
            app,
            &json!({
                "name": "web",
                "region": "ord",
                "config": {"image": "nginx:latest", "guest": {"cpus": 1, "memory_mb": 256}},
                "skip_launch": skip_launch,
            }),
            &none(),
        )
        .unwrap();
    body_str(created.body(), "id").to_string()
}

#[test]
fn create_then_retrieve_app() {
    let client = client();

    let created = client
        .app_create(&json!({"org_slug": "org1", "app_name": "app1"}), &none())
        .unwrap();
    assert_eq!(created.status(), 201);
    assert_eq!(created.body()["app_name"], "app1");

    let fetched = client.app_retrieve("app1", &none()).unwrap();
    assert_eq!(fetched.status(), 200);
    assert_eq!(fetched.body()["app_name"], "app1");

    let listed = client.app_list("org1", &none()).unwrap();
    assert_eq!(listed.body()["total_apps"], 1);
}

#[test]
fn failure_keeps_remote_error_body() {
    let client = client();
    let err = client.app_retrieve("ghost", &none()).unwrap_err();
    let response = err.response().expect("envelope");
    assert_eq!(response.status(), 404);
    assert_eq!(response.body()["error"], "app ghost not found");
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/json")));
}

#[test]
fn app_delete_then_retrieve_fails() {
    let client = client();
    create_app(&client, "doomed");

    let deleted = client.app_delete("doomed", &none()).unwrap();
    assert_eq!(deleted.status(), 202);
    assert_eq!(deleted.body(), &Value::Null);

    let err = client.app_retrieve("doomed", &none()).unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[test]
fn deleting_never_started_machine_fails() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", true);

    let machine = client.machine_retrieve("app1", &id, &none()).unwrap();
    assert_eq!(machine.body()["state"], "created");

    let err = client.machine_delete("app1", &id, &none()).unwrap_err();
    assert_eq!(err.status(), Some(412));
    assert!(body_str(err.response().unwrap().body(), "error").starts_with("failed_precondition"));

    let forced = client
        .machine_delete("app1", &id, &Overrides::new().param("force", "true"))
        .unwrap();
    assert_eq!(forced.status(), 200);
}

#[test]
fn lease_release_requires_nonce_header() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", false);

    let lease = client
        .machine_lease_acquire("app1", &id, &json!({"ttl": 60}), &none())
        .unwrap();
    let nonce = body_str(&lease.body()["data"], "nonce").to_string();

    let held = client.machine_lease_retrieve("app1", &id, &none()).unwrap();
    assert_eq!(held.body()["data"]["nonce"], nonce.as_str());

    let err = client.machine_lease_release("app1", &id, &none()).unwrap_err();
    assert_eq!(err.status(), Some(400));

    let released = client
        .machine_lease_release("app1", &id, &Overrides::new().lease_nonce(&nonce))
        .unwrap();
    assert_eq!(released.status(), 200);
}

#[test]
fn leased_machine_needs_nonce_to_stop() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", false);

    let lease = client
        .machine_lease_acquire("app1", &id, &json!({"ttl": 60}), &none())
        .unwrap();
    let nonce = body_str(&lease.body()["data"], "nonce").to_string();

    let err = client.machine_stop("app1", &id, &none()).unwrap_err();
    assert_eq!(err.status(), Some(409));

    let with_lease = Overrides::new().lease_nonce(&nonce);
    client.machine_stop("app1", &id, &with_lease).unwrap();
    client.machine_delete("app1", &id, &with_lease).unwrap();
}

#[test]
fn machine_lifecycle() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", true);

    let listed = client.machine_list("app1", &none()).unwrap();
    assert_eq!(listed.body().as_array().unwrap().len(), 1);

    let err = client
        .machine_wait("app1", &id, &WaitParams::new("started").timeout_secs(1), &none())
        .unwrap_err();
    assert_eq!(err.status(), Some(408));

    let started = client.machine_start("app1", &id, &none()).unwrap();
    assert_eq!(started.body()["previous_state"], "created");
    client
        .machine_wait("app1", &id, &WaitParams::new("started"), &none())
        .unwrap();

    let ps = client.machine_ps("app1", &id, &none()).unwrap();
    assert_eq!(ps.body()[0]["pid"], 1);

    client
        .machine_signal("app1", &id, &json!({"signal": "SIGUSR1"}), &none())
        .unwrap();
    client.machine_restart("app1", &id, &none()).unwrap();
    client.machine_cordon("app1", &id, &none()).unwrap();
    let cordoned = client.machine_retrieve("app1", &id, &none()).unwrap();
    assert_eq!(cordoned.body()["cordoned"], true);
    client.machine_uncordon("app1", &id, &none()).unwrap();

    client.machine_stop("app1", &id, &none()).unwrap();
    let instance_id = body_str(
        client.machine_retrieve("app1", &id, &none()).unwrap().body(),
        "instance_id",
    )
    .to_string();
    client
        .machine_wait(
            "app1",
            &id,
            &WaitParams::new("stopped").instance_id(instance_id),
            &none(),
        )
        .unwrap();

    let events = client.machine_event_list("app1", &id, &none()).unwrap();
    let kinds: Vec<&str> = events
        .body()
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        ["exit", "uncordon", "cordon", "restart", "signal", "start", "launch"]
    );

    client.machine_delete("app1", &id, &none()).unwrap();
    let err = client.machine_retrieve("app1", &id, &none()).unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[test]
fn machine_update_replaces_config() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", false);

    let err = client
        .machine_update("app1", &id, &json!({"region": "ams"}), &none())
        .unwrap_err();
    assert_eq!(err.status(), Some(400));

    let updated = client
        .machine_update("app1", &id, &json!({"config": {"image": "nginx:1.27"}}), &none())
        .unwrap();
    assert_eq!(updated.body()["config"], json!({"image": "nginx:1.27"}));

    let versions = client.machine_versions_list("app1", &id, &none()).unwrap();
    assert_eq!(versions.body().as_array().unwrap().len(), 2);
}

#[test]
fn machine_metadata() {
    let client = client();
    create_app(&client, "app1");
    let id = create_machine(&client, "app1", false);

    let set = client
        .machine_metadata_update("app1", &id, "role", &json!({"value": "primary"}), &none())
        .unwrap();
    assert_eq!(set.status(), 204);

    let metadata = client.machine_metadata_retrieve("app1", &id, &none()).unwrap();
    assert_eq!(metadata.body(), &json!({"role": "primary"}));

    client
        .machine_metadata_delete("app1", &id, "role", &none())
        .unwrap();
    let err = client
        .machine_metadata_delete("app1", &id, "role", &none())
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[test]
fn volume_lifecycle() {
    let client = client();
    create_app(&client, "app1");

    let created = client
        .volume_create("app1", &json!({"name": "data", "region": "ord", "size_gb": 3}), &none())
        .unwrap();
    let vol = body_str(created.body(), "id").to_string();

    let listed = client.volume_list("app1", &none()).unwrap();
    assert_eq!(listed.body().as_array().unwrap().len(), 1);

    let fetched = client.volume_retrieve("app1", &vol, &none()).unwrap();
    assert_eq!(fetched.body()["size_gb"], 3);

    let updated = client
        .volume_update("app1", &vol, &json!({"auto_backup_enabled": false}), &none())
        .unwrap();
    assert_eq!(updated.body()["auto_backup_enabled"], false);

    let err = client
        .volume_extend("app1", &vol, &json!({"size_gb": 1}), &none())
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    let extended = client
        .volume_extend("app1", &vol, &json!({"size_gb": 20}), &none())
        .unwrap();
    assert_eq!(extended.body()["volume"]["size_gb"], 20);

    client.volume_snapshot_create("app1", &vol, &none()).unwrap();
    let snapshots = client.volume_snapshots_list("app1", &vol, &none()).unwrap();
    assert_eq!(snapshots.body().as_array().unwrap().len(), 1);

    let deleted = client.volume_delete("app1", &vol, &none()).unwrap();
    assert_eq!(deleted.body()["state"], "destroyed");
}

#[test]
fn missing_token_is_rejected_by_server() {
    let base_url = start_server();
    let client = MachinesClient::new(Config::new(&base_url), UreqTransport::new());
    let err = client.app_list("org1", &none()).unwrap_err();
    assert_eq!(err.status(), Some(401));

    let ok = client
        .app_list("org1", &Overrides::new().bearer("call-token"))
        .unwrap();
    assert_eq!(ok.body()["total_apps"], 0);
}

/// Answer the first request with a 500 whose body is not UTF-8.
fn start_garbled_server() -> String {
    use std::io::{BufRead, BufReader, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }
        stream
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 2\r\nconnection: close\r\n\r\n\xff\xfe")
            .unwrap();
    });
    format!("http://{addr}/v1")
}

#[test]
fn non_utf8_error_body_keeps_status_envelope() {
    let config = Config::new(&start_garbled_server())
        .with_bearer("t")
        .with_retry(RetryPolicy::never());
    let client = MachinesClient::new(config, UreqTransport::new());
    let err = client.app_retrieve("app1", &none()).unwrap_err();
    let response = match err {
        ClientError::Status(response) => response,
        other => panic!("expected a status failure, got {other:?}"),
    };
    assert_eq!(response.status(), 500);
    assert_eq!(response.body(), &json!("\u{fffd}\u{fffd}"));
}

#[test]
fn unreachable_server_is_transport_error() {
    let config = Config::new("http://127.0.0.1:1/v1")
        .with_bearer("t")
        .with_retry(RetryPolicy::never());
    let client = MachinesClient::new(config, UreqTransport::new());
    let err = client.app_retrieve("app1", &none()).unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(err.response().is_none());
}
