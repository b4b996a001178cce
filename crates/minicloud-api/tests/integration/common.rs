//! Shared helpers for Minicloud API integration tests
//!
//! Each helper mounts mock endpoints on a wiremock server; clients are built
//! against the mock server's URI.

use std::time::Duration;

use tokio::sync::mpsc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use minicloud_api::MinicloudClient;
use minicloud_core::ports::ApiEvent;

pub const LOGIN: &str = "alice";
pub const PASSWORD: &str = "abc";
/// `alice:` followed by sha256("abc")
pub const AUTH: &str = "alice:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

/// Starts a mock server and returns it with an authenticated client
pub async fn setup_mock() -> (MockServer, MinicloudClient) {
    let server = MockServer::start().await;
    let client = MinicloudClient::new(server.uri());
    client.set_auth(LOGIN, PASSWORD);
    (server, client)
}

/// Mounts a reply for the form action `action`
pub async fn mount_action(server: &MockServer, action: &str, reply: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(body_string_contains(format!("action={action}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(server)
        .await;
}

/// Forwards every event published on the client's bus into a channel
pub fn capture_events(client: &MinicloudClient) -> mpsc::UnboundedReceiver<ApiEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.events().subscribe_fn(move |event: &ApiEvent| {
        tx.send(event.clone())
            .map_err(|_| anyhow::anyhow!("test receiver dropped"))
    });
    rx
}

/// Waits for the next captured event
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ApiEvent>) -> ApiEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// A sample folder tree with one file and one sub-folder
pub fn sample_tree() -> serde_json::Value {
    serde_json::json!({
        "id": 1,
        "parent_id": -1,
        "path": "docs",
        "mktime": 100,
        "mdtime": 200,
        "files": [
            {"id": 10, "size": 5, "filename": "a.txt", "path": "docs",
             "checksum": "5d41402abc4b2a76b9719d911017c592", "encryption": "",
             "mktime": 100, "mdtime": 150, "version": 3,
             "versions": [{"version": 3, "created": 150}]}
        ],
        "paths": [
            {"id": 2, "parent_id": 1, "path": "docs/sub", "files": [], "paths": []}
        ]
    })
}
