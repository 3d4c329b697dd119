//! Demultiplexing one connection into per-session proxies.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingScheduler, ScriptedDialer};
use serde_json::json;
use tokio::time::timeout;

use tether_client::{AgentNotification, BrowserAgent, ReconnectPolicy};

fn agent_with_remote() -> (BrowserAgent, common::Remote) {
    let (dialer, remotes) = ScriptedDialer::with_connections(1);
    let agent = BrowserAgent::with_parts(
        "ws://127.0.0.1:1/ws",
        Arc::new(dialer),
        Arc::new(RecordingScheduler::default()),
        ReconnectPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            max_attempts: 2,
        },
    );
    let remote = remotes.into_iter().next().expect("one remote");
    (agent, remote)
}

fn event_frame(session_id: &str, name: &str, data: serde_json::Value) -> String {
    json!({
        "type": "event",
        "sessionId": session_id,
        "eventName": name,
        "eventData": data,
    })
    .to_string()
}

async fn wait_connected(agent: &BrowserAgent) {
    let mut rx = agent.notifications();
    agent.connect();
    timeout(Duration::from_secs(1), async {
        loop {
            if matches!(
                rx.recv().await.expect("open"),
                AgentNotification::Connected
            ) {
                break;
            }
        }
    })
    .await
    .expect("connected in time");
}

#[tokio::test]
async fn send_emits_command_and_resolves_on_completed() {
    let (agent, mut remote) = agent_with_remote();
    let session = agent.session("sess-1");
    wait_connected(&agent).await;

    let send_task = {
        let session = session.clone();
        tokio::spawn(async move { session.send("Hello").await })
    };

    // The wire command goes out with the session id.
    let frame = timeout(Duration::from_secs(1), remote.from_client.recv())
        .await
        .expect("frame in time")
        .expect("connection open");
    let parsed: serde_json::Value = serde_json::from_str(&frame).expect("valid json");
    assert_eq!(parsed["type"], "session:send");
    assert_eq!(parsed["sessionId"], "sess-1");
    assert_eq!(parsed["content"], "Hello");

    // Terminal event resolves the pending send.
    remote
        .to_client
        .send(event_frame("sess-1", "agent:completed", serde_json::Value::Null))
        .await
        .expect("inject");

    let result = timeout(Duration::from_secs(1), send_task)
        .await
        .expect("send resolves")
        .expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn agent_error_rejects_pending_send() {
    let (agent, remote) = agent_with_remote();
    let session = agent.session("sess-1");
    wait_connected(&agent).await;

    let send_task = {
        let session = session.clone();
        tokio::spawn(async move { session.send("Hello").await })
    };
    // Drain the outbound command so ordering is deterministic.
    let mut remote = remote;
    let _ = timeout(Duration::from_secs(1), remote.from_client.recv()).await;

    remote
        .to_client
        .send(event_frame(
            "sess-1",
            "agent:error",
            json!({"message": "provider exploded"}),
        ))
        .await
        .expect("inject");

    let result = timeout(Duration::from_secs(1), send_task)
        .await
        .expect("send resolves")
        .expect("join");
    let err = result.expect_err("send rejected");
    assert!(err.to_string().contains("provider exploded"));
}

#[tokio::test]
async fn events_route_by_session_id_and_unknown_ids_are_dropped() {
    let (agent, remote) = agent_with_remote();
    let one = agent.session("sess-1");
    let two = agent.session("sess-2");
    wait_connected(&agent).await;

    let user = tether_protocol::Message::user("Hello");
    let reply = tether_protocol::Message::agent("Hi there");
    remote
        .to_client
        .send(event_frame(
            "sess-1",
            "message:user",
            serde_json::to_value(&user).expect("serialize"),
        ))
        .await
        .expect("inject");
    // Unknown session: logged and dropped, never crashes the connection.
    remote
        .to_client
        .send(event_frame("sess-9", "message:agent", json!({"bogus": true})))
        .await
        .expect("inject");
    remote
        .to_client
        .send(event_frame(
            "sess-2",
            "message:agent",
            serde_json::to_value(&reply).expect("serialize"),
        ))
        .await
        .expect("inject");

    timeout(Duration::from_secs(1), async {
        while two.messages(None, 0).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("routed in time");

    assert_eq!(one.messages(None, 0).len(), 1);
    assert_eq!(two.messages(None, 0).len(), 1);
    assert_eq!(one.summary(), "Hello");
}

#[tokio::test]
async fn mirror_tracks_activity_usage_and_tool_updates() {
    let (agent, remote) = agent_with_remote();
    let session = agent.session("sess-1");
    wait_connected(&agent).await;

    let tool_msg = tether_protocol::Message::agent_tool_use("bash", "tool-3", "{}");
    let tool_msg_id = tool_msg.id().to_string();

    remote
        .to_client
        .send(event_frame("sess-1", "agent:active", serde_json::Value::Null))
        .await
        .expect("inject");
    remote
        .to_client
        .send(event_frame(
            "sess-1",
            "message:agent",
            serde_json::to_value(&tool_msg).expect("serialize"),
        ))
        .await
        .expect("inject");
    remote
        .to_client
        .send(event_frame(
            "sess-1",
            "message:updated",
            json!({"messageId": tool_msg_id, "toolResult": "done", "durationMs": 9}),
        ))
        .await
        .expect("inject");
    remote
        .to_client
        .send(event_frame(
            "sess-1",
            "tokens:updated",
            json!({"used": 150, "total": 200000, "input": 100, "output": 50, "cache_read": 0, "cache_creation": 0}),
        ))
        .await
        .expect("inject");

    timeout(Duration::from_secs(1), async {
        while session.token_usage().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("usage in time");

    assert!(session.is_active());
    let usage = session.token_usage().expect("usage");
    assert_eq!(usage.used, 150);

    let messages = session.messages(None, 0);
    match &messages[0] {
        tether_protocol::Message::Agent {
            tool_use: Some(tool_use),
            ..
        } => assert_eq!(tool_use.tool_result.as_deref(), Some("done")),
        other => panic!("expected resolved tool use, got {other:?}"),
    }
}

#[tokio::test]
async fn session_lookup_is_idempotent_and_removal_is_local() {
    let (agent, _remote) = agent_with_remote();
    let first = agent.session("sess-1");
    let second = agent.session("sess-1");
    assert!(Arc::ptr_eq(&first, &second));

    agent.remove_session("sess-1");
    let third = agent.session("sess-1");
    assert!(!Arc::ptr_eq(&first, &third));
}
