//! Integration tests for form actions and reply dispatch

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use minicloud_api::MinicloudClient;
use minicloud_core::domain::{FileId, PathId};
use minicloud_core::ports::{ApiEvent, IRemoteClient};

use crate::common;

#[tokio::test]
async fn test_request_sends_form_and_credentials() {
    let (server, client) = common::setup_mock().await;

    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(header("X-Auth", common::AUTH))
        .and(body_string_contains("action=get_path"))
        .and(body_string_contains("action_id=0"))
        .and(body_string_contains("path=docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "path",
            "action_id": "0",
            "data": common::sample_tree()
        })))
        .expect(1)
        .mount(&server)
        .await;

    let event = client
        .request("get_path", vec![("path".into(), "docs".into())], None)
        .await;

    match event {
        ApiEvent::Path {
            action_id,
            path: Some(tree),
        } => {
            assert_eq!(action_id.unwrap().as_str(), "0");
            assert_eq!(tree.all_files().len(), 1);
            assert_eq!(tree.paths()[0].name(), Some("sub"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_get_path_publishes_reply_on_bus() {
    let (server, client) = common::setup_mock().await;
    common::mount_action(
        &server,
        "get_path",
        serde_json::json!({"type": "path", "action_id": "0", "data": common::sample_tree()}),
    )
    .await;
    let mut events = common::capture_events(&client);

    let remote: &dyn IRemoteClient = &client;
    let action_id = remote.get_path("docs", true);

    let event = common::next_event(&mut events).await;
    assert_eq!(event.action_id(), Some(&action_id));
    assert!(matches!(event, ApiEvent::Path { path: Some(_), .. }));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(body.contains("recursive=1"), "body was {body}");
}

#[tokio::test]
async fn test_fire_and_forget_helpers() {
    let (server, client) = common::setup_mock().await;
    common::mount_action(
        &server,
        "get_server_info",
        serde_json::json!({"type": "server", "action_id": "0", "data": {"name": "Cloud", "time": 0}}),
    )
    .await;
    common::mount_action(
        &server,
        "get_user",
        serde_json::json!({"type": "user", "action_id": "1", "data": {"id": 3, "name": "alice"}}),
    )
    .await;
    common::mount_action(
        &server,
        "delete_files",
        serde_json::json!({"type": "bool", "action_id": "2", "data": {"bool": true}}),
    )
    .await;
    let mut events = common::capture_events(&client);

    let info_id = client.get_server_info();
    let info = common::next_event(&mut events).await;
    assert_eq!(info.action_id(), Some(&info_id));
    match info {
        ApiEvent::ServerInfo { info, .. } => {
            assert_eq!(info.name, "Cloud");
            // server clock at the epoch => large positive offset
            assert!(info.offset_millis() > 0);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    client.get_user();
    match common::next_event(&mut events).await {
        ApiEvent::User { user, .. } => assert_eq!(user.name(), "alice"),
        other => panic!("unexpected event: {other:?}"),
    }

    client.delete_files(&[FileId::new(4), FileId::new(5)]);
    assert!(matches!(
        common::next_event(&mut events).await,
        ApiEvent::Bool { value: true, .. }
    ));

    let requests = server.received_requests().await.unwrap();
    let delete = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .find(|b| b.contains("delete_files"))
        .unwrap();
    assert!(delete.contains("files%5B%5D=4"));
    assert!(delete.contains("files%5B%5D=5"));
}

#[tokio::test]
async fn test_get_path_by_id() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .and(body_string_contains("id=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "path", "action_id": "0", "data": common::sample_tree()
        })))
        .mount(&server)
        .await;
    let mut events = common::capture_events(&client);

    client.get_path_by_id(PathId::new(1), false);

    match common::next_event(&mut events).await {
        ApiEvent::Path { path: Some(p), .. } => assert_eq!(p.id(), PathId::new(1)),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_reply() {
    let (server, client) = common::setup_mock().await;
    common::mount_action(
        &server,
        "get_path",
        serde_json::json!({"type": "error", "action_id": "0", "data": "No such path"}),
    )
    .await;

    let event = client.request("get_path", Vec::new(), None).await;
    match event {
        ApiEvent::Error { action_id, message } => {
            assert_eq!(action_id.unwrap().as_str(), "0");
            assert_eq!(message.as_deref(), Some("No such path"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_unparseable_reply_is_protocol_error() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Fatal error: oops"))
        .mount(&server)
        .await;

    match client.request("get_user", Vec::new(), None).await {
        ApiEvent::Error { action_id, message } => {
            assert!(action_id.is_none());
            assert!(message.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (server, client) = common::setup_mock().await;
    Mock::given(method("POST"))
        .and(path("/api.php"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad login"))
        .mount(&server)
        .await;

    match client.request("get_user", Vec::new(), None).await {
        ApiEvent::Unauthorized { action_id, message } => {
            assert_eq!(action_id.unwrap().as_str(), "0");
            assert_eq!(message, "bad login");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_error_carries_action_id() {
    // Nothing listens on port 1
    let client = MinicloudClient::new("http://127.0.0.1:1");
    let mut events = common::capture_events(&client);

    let action_id = client.get_path("docs", true);

    match common::next_event(&mut events).await {
        ApiEvent::ConnectionError {
            action_id: Some(id),
            ..
        } => assert_eq!(id, action_id),
        other => panic!("unexpected event: {other:?}"),
    }
}
