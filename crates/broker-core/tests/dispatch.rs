mod common;

use std::sync::Arc;
use std::time::Duration;

use broker_core::dispatch::{Dispatcher, Outcome};
use broker_core::registry::SessionRegistry;
use common::MockClient;
use netconf_core::{NetconfError, RpcError};
use serde_json::{json, Value};

/// Lowercase-hex SHA-1 of "h" + "830" + "42".
const KEY_FOR_H_830_42: &str = "61359b05c77e1f4f23aa9159843be195661a8c5a";

fn dispatcher(client: &MockClient) -> Arc<Dispatcher<MockClient>> {
    Arc::new(Dispatcher::new(Arc::new(client.clone()), SessionRegistry::new()))
}

async fn reply_of(dispatcher: &Dispatcher<MockClient>, request: Value) -> Value {
    match dispatcher.dispatch(request.to_string().as_bytes()).await {
        Outcome::Reply(reply) => reply,
        other => panic!("expected an open-connection reply, got {other:?}"),
    }
}

async fn connect(dispatcher: &Dispatcher<MockClient>) -> String {
    let reply = reply_of(
        dispatcher,
        json!({
            "type": 1,
            "host": "h",
            "port": "830",
            "user": "u",
            "pass": "p",
            "capabilities": ["urn:ietf:params:netconf:base:1.1"],
        }),
    )
    .await;
    assert_eq!(reply["type"], 0, "connect must succeed: {reply}");
    reply["session"].as_str().expect("connect reply names the session").to_string()
}

#[tokio::test]
async fn connect_then_get_config() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);

    let key = connect(&dispatcher).await;
    assert_eq!(key, KEY_FOR_H_830_42);

    let recorded = client.connects();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].host, "h");
    assert_eq!(recorded[0].port, 830);
    assert_eq!(recorded[0].user, "u");
    assert_eq!(recorded[0].password, "p");
    assert_eq!(recorded[0].capabilities, ["urn:ietf:params:netconf:base:1.1"]);

    client.script_data("<data>X</data>");
    let reply = reply_of(&dispatcher, json!({ "type": 4, "session": key, "source": "running" })).await;
    assert_eq!(reply["type"], 1);
    assert_eq!(reply["data"], "<data>X</data>");

    let log = client.rpc_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("<get-config>"));
    assert!(log[0].contains("<running/>"));
    assert!(log[0].contains("report-all"));
}

#[tokio::test]
async fn connect_applies_the_default_port() {
    let client = MockClient::with_session_ids(["7"]);
    let dispatcher = dispatcher(&client);

    let reply = reply_of(&dispatcher, json!({ "type": 1, "host": "h", "user": "u" })).await;
    assert_eq!(reply["type"], 0);
    assert_eq!(client.connects()[0].port, 830);
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let client = MockClient::new();
    client.refuse_connects();
    let dispatcher = dispatcher(&client);

    let reply = reply_of(&dispatcher, json!({ "type": 1, "host": "h", "user": "u" })).await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "Connecting NETCONF server failed.");
    assert!(dispatcher.registry().is_empty().await);
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let client = MockClient::new();
    let dispatcher = dispatcher(&client);

    let reply = reply_of(&dispatcher, json!({ "type": 3, "session": "deadbeef", "filter": null })).await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "Invalid session identifier.");
}

#[tokio::test]
async fn bad_datastore_tokens_are_rejected() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 4, "session": key, "source": "archive" })).await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "Invalid source repository type requested.");

    let reply = reply_of(&dispatcher, json!({ "type": 8, "session": key, "target": "archive" })).await;
    assert_eq!(reply["error-message"], "Invalid target repository type requested.");

    // nothing reached the device
    assert!(client.rpc_log().is_empty());
}

#[tokio::test]
async fn structured_rpc_errors_pass_through() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.script(Err(NetconfError::Rpc(RpcError {
        message: Some("boom".to_string()),
        tag: Some("operation-failed".to_string()),
        severity: Some("error".to_string()),
        ..RpcError::default()
    })));

    let reply = reply_of(
        &dispatcher,
        json!({ "type": 5, "session": key, "target": "running", "config": "<top/>" }),
    )
    .await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "boom");
    assert_eq!(reply["error-tag"], "operation-failed");
    assert_eq!(reply["error-severity"], "error");
    assert!(reply.get("error-path").is_none());

    // an rpc-error does not cost the session
    client.script_ok();
    let reply = reply_of(&dispatcher, json!({ "type": 8, "session": key, "target": "running" })).await;
    assert_eq!(reply["type"], 0);
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_reaped_and_rejected_afterwards() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    tokio::time::advance(Duration::from_secs(3601)).await;
    dispatcher.registry().cleanup_expired(Duration::from_secs(3600)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let reply = reply_of(&dispatcher, json!({ "type": 3, "session": key })).await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "Invalid session identifier.");
    assert_eq!(client.freed(), 1);
}

#[tokio::test]
async fn concurrent_requests_on_one_session_never_overlap() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.set_rpc_delay(Duration::from_millis(50));
    client.script_data("<data>A</data>");
    client.script_data("<data>B</data>");

    let first = reply_of(&dispatcher, json!({ "type": 3, "session": key }));
    let second = reply_of(&dispatcher, json!({ "type": 3, "session": key }));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first["type"], 1);
    assert_eq!(second["type"], 1);
    assert!(!client.overlapped(), "record lock must serialize device access");
    assert_eq!(client.rpc_log().len(), 2);
}

#[tokio::test]
async fn disconnect_then_operation_yields_invalid_session() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 2, "session": key })).await;
    assert_eq!(reply["type"], 0);
    assert_eq!(client.freed(), 1);

    let reply = reply_of(&dispatcher, json!({ "type": 3, "session": key })).await;
    assert_eq!(reply["error-message"], "Invalid session identifier.");
}

#[tokio::test]
async fn missing_session_closes_the_connection() {
    let client = MockClient::new();
    let dispatcher = dispatcher(&client);

    match dispatcher.dispatch(json!({ "type": 3 }).to_string().as_bytes()).await {
        Outcome::ReplyThenClose(reply) => {
            assert_eq!(reply["type"], 2);
            assert_eq!(reply["error-message"], "Missing session specification.");
        }
        other => panic!("expected reply-then-close, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_opcodes_keep_the_connection_open() {
    let client = MockClient::new();
    let dispatcher = dispatcher(&client);

    let reply = reply_of(&dispatcher, json!({ "type": 99, "session": "x" })).await;
    assert_eq!(reply["type"], 2);
    assert_eq!(reply["error-message"], "Operation not supported.");
}

#[tokio::test]
async fn malformed_json_drops_the_connection_silently() {
    let client = MockClient::new();
    let dispatcher = dispatcher(&client);

    assert!(matches!(dispatcher.dispatch(b"{not json").await, Outcome::Close));
}

#[tokio::test]
async fn edit_config_validates_its_parameters() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 5, "session": key, "target": "running" })).await;
    assert_eq!(reply["error-message"], "Invalid config data parameter.");

    let reply = reply_of(
        &dispatcher,
        json!({ "type": 5, "session": key, "target": "running", "config": "<x/>", "default-operation": "overwrite" }),
    )
    .await;
    assert_eq!(reply["error-message"], "Invalid default-operation parameter.");

    let reply = reply_of(
        &dispatcher,
        json!({ "type": 5, "session": key, "target": "running", "config": "<x/>", "error-option": "ignore" }),
    )
    .await;
    assert_eq!(reply["error-message"], "Invalid error-option parameter.");

    client.script_ok();
    let reply = reply_of(
        &dispatcher,
        json!({ "type": 5, "session": key, "target": "candidate", "config": "<x/>", "default-operation": "merge", "error-option": "rollback-on-error" }),
    )
    .await;
    assert_eq!(reply["type"], 0);

    let log = client.rpc_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("<test-option>test-then-set</test-option>"));
    assert!(log[0].contains("<default-operation>merge</default-operation>"));
    assert!(log[0].contains("<error-option>rollback-on-error</error-option>"));
}

#[tokio::test]
async fn copy_config_prefers_an_explicit_source() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.script_ok();
    let reply = reply_of(
        &dispatcher,
        json!({ "type": 6, "session": key, "target": "startup", "source": "running", "config": "<ignored/>" }),
    )
    .await;
    assert_eq!(reply["type"], 0);
    let log = client.rpc_log();
    assert!(log[0].contains("<source><running/></source>"));
    assert!(!log[0].contains("<ignored/>"));

    let reply = reply_of(&dispatcher, json!({ "type": 6, "session": key, "target": "startup" })).await;
    assert_eq!(
        reply["error-message"],
        "invalid input parameters - source and config is required."
    );
}

#[tokio::test]
async fn copy_config_binds_the_url_to_the_url_side() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.script_ok();
    let reply = reply_of(
        &dispatcher,
        json!({ "type": 6, "session": key, "target": "url", "source": "running", "url": "ftp://backup/cfg" }),
    )
    .await;
    assert_eq!(reply["type"], 0);
    assert!(client.rpc_log()[0].contains("<target><url>ftp://backup/cfg</url></target>"));

    let reply = reply_of(
        &dispatcher,
        json!({ "type": 6, "session": key, "target": "url", "source": "url", "url": "ftp://x" }),
    )
    .await;
    assert_eq!(reply["error-message"], "Only one of source and target may be a URL.");
}

#[tokio::test]
async fn delete_config_requires_a_url_for_url_targets() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 7, "session": key, "target": "url" })).await;
    assert_eq!(reply["error-message"], "Missing url parameter.");

    client.script_ok();
    let reply = reply_of(
        &dispatcher,
        json!({ "type": 7, "session": key, "target": "url", "url": "ftp://backup/cfg" }),
    )
    .await;
    assert_eq!(reply["type"], 0);
    assert!(client.rpc_log()[0].contains("<delete-config>"));
}

#[tokio::test]
async fn kill_requires_the_target_session_id() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 10, "session": key })).await;
    assert_eq!(reply["error-message"], "Missing session-id parameter.");

    client.script_ok();
    let reply = reply_of(&dispatcher, json!({ "type": 10, "session": key, "session-id": "99" })).await;
    assert_eq!(reply["type"], 0);
    assert!(client.rpc_log()[0].contains("<kill-session><session-id>99</session-id></kill-session>"));
}

#[tokio::test]
async fn generic_returns_data_or_ok() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 12, "session": key })).await;
    assert_eq!(reply["error-message"], "Missing content parameter.");

    client.script_data("<result>done</result>");
    let reply = reply_of(&dispatcher, json!({ "type": 12, "session": key, "content": "<commit/>" })).await;
    assert_eq!(reply["type"], 1);
    assert_eq!(reply["data"], "<result>done</result>");

    client.script_ok();
    let reply = reply_of(&dispatcher, json!({ "type": 12, "session": key, "content": "<commit/>" })).await;
    assert_eq!(reply["type"], 0);
}

#[tokio::test]
async fn get_schema_requires_an_identifier() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 13, "session": key })).await;
    assert_eq!(reply["error-message"], "No identifier for get-schema supplied.");

    client.script_data("module ietf-interfaces { }");
    let reply = reply_of(
        &dispatcher,
        json!({ "type": 13, "session": key, "identifier": "ietf-interfaces", "format": "yang" }),
    )
    .await;
    assert_eq!(reply["type"], 1);
    assert!(client.rpc_log()[0].contains("<identifier>ietf-interfaces</identifier>"));
}

#[tokio::test]
async fn validate_reports_ok() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.script_ok();
    let reply = reply_of(&dispatcher, json!({ "type": 16, "session": key, "target": "candidate" })).await;
    assert_eq!(reply["type"], 0);
    assert!(client.rpc_log()[0].contains("<validate><source><candidate/></source></validate>"));
}

#[tokio::test]
async fn info_returns_a_hello_snapshot() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 11, "session": key })).await;
    assert_eq!(reply["sid"], "42");
    assert_eq!(reply["version"], "1.1");
    assert_eq!(reply["host"], "h");
    assert_eq!(reply["port"], "830");
    assert_eq!(reply["user"], "u");
    assert!(reply["capabilities"].as_array().unwrap().len() >= 2);
    assert!(reply.get("type").is_none(), "hello replies carry no type code");
}

#[tokio::test]
async fn reload_hello_refreshes_but_keeps_the_original_sid() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(&dispatcher, json!({ "type": 14, "session": key })).await;
    assert_eq!(reply["sid"], "42");
    let capabilities = reply["capabilities"].as_array().unwrap();
    assert!(capabilities.iter().any(|c| c == "urn:mock:reloaded"));

    // the side channel was released again
    assert_eq!(client.freed(), 1);

    // the refreshed hello is what info now serves
    let reply = reply_of(&dispatcher, json!({ "type": 11, "session": key })).await;
    assert!(reply["capabilities"].as_array().unwrap().iter().any(|c| c == "urn:mock:reloaded"));
}

#[tokio::test]
async fn notification_history_replays_into_the_reply() {
    let client = MockClient::with_session_ids(["42"]);
    client.push_history(1714550400, "<event><interface-down/></event>");
    client.push_history(1714550460, "<event><interface-up/></event>");
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    let reply = reply_of(
        &dispatcher,
        json!({ "type": 15, "session": key, "from": -3600, "to": 0 }),
    )
    .await;

    let notifications = reply["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0]["eventtime"], 1714550400);
    assert_eq!(notifications[0]["content"], "<event><interface-down/></event>");

    let log = client.rpc_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("<create-subscription"));
    assert!(log[0].contains("<startTime>"));
    assert!(log[0].contains("<stopTime>"));

    // the side channel was released again
    assert_eq!(client.freed(), 1);
}

#[tokio::test]
async fn broken_transport_discards_the_session() {
    let client = MockClient::with_session_ids(["42"]);
    let dispatcher = dispatcher(&client);
    let key = connect(&dispatcher).await;

    client.script(Err(NetconfError::SessionClosed));
    let reply = reply_of(&dispatcher, json!({ "type": 3, "session": key })).await;
    assert_eq!(reply["type"], 2);

    let reply = reply_of(&dispatcher, json!({ "type": 3, "session": key })).await;
    assert_eq!(reply["error-message"], "Invalid session identifier.");
    assert_eq!(client.freed(), 1);
}
