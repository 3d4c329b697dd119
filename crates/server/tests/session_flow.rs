//! Session state machine and log behavior against scripted adapters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{HangingAdapter, StubAdapter, StubItem};
use tether::agent::Agent;
use tether::persist::SqlitePersister;
use tether::session::SessionError;
use tether_adapter_core::AgentEvent;
use tether_protocol::{Message, SessionOptions, SessionState, UsageDelta};

fn options() -> SessionOptions {
    SessionOptions {
        project_path: "/tmp/project".to_string(),
        ..Default::default()
    }
}

fn agent_with(adapter: impl tether_adapter_core::AgentAdapter + 'static) -> Agent {
    let persister = Arc::new(SqlitePersister::in_memory().expect("open store"));
    Agent::new(Arc::new(adapter), persister)
}

#[tokio::test]
async fn send_appends_user_then_agent_messages() {
    // Scenario A
    let adapter = StubAdapter::single_turn(vec![AgentEvent::message(Message::agent("Hi there"))]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");

    session.send("Hello").await.expect("send");

    let messages = session.messages(None, 0);
    assert_eq!(messages.len(), 2);
    match &messages[0] {
        Message::User { content, .. } => assert_eq!(content.as_text(), "Hello"),
        other => panic!("expected user message first, got {other:?}"),
    }
    match &messages[1] {
        Message::Agent { text, .. } => assert_eq!(text, "Hi there"),
        other => panic!("expected agent message second, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn stream_failure_is_terminal_and_keeps_prior_messages() {
    // Scenario B
    let adapter = StubAdapter::new(vec![vec![
        StubItem::Event(AgentEvent::message(Message::agent("partial"))),
        StubItem::Fail("provider exploded".to_string()),
    ]]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");

    let err = session.send("Hello").await.expect_err("send should fail");
    assert!(err.to_string().contains("provider exploded"));
    assert_eq!(session.state(), SessionState::Error);

    let messages = session.messages(None, 0);
    // user + partial agent + inline error message for the UI
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].type_name(), "agent");
    assert_eq!(messages[2].type_name(), "error");
}

#[tokio::test]
async fn abort_while_active_then_send_rejects() {
    // Scenario C
    let adapter = HangingAdapter::new(vec![AgentEvent::message(Message::agent("working on it"))]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");

    let send_session = session.clone();
    let send_task = tokio::spawn(async move { send_session.send("Hello").await });

    // Wait for the turn to reach the adapter stream.
    while session.messages(None, 0).len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.state(), SessionState::Active);

    session.abort().expect("abort");
    assert_eq!(session.state(), SessionState::Aborted);

    // The in-flight send unwinds cleanly, dropping the rest of the stream.
    let result = tokio::time::timeout(Duration::from_secs(1), send_task)
        .await
        .expect("send should unwind after abort")
        .expect("join");
    assert!(result.is_ok());

    let err = session.send("again").await.expect_err("send after abort");
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Aborted,
            ..
        }
    ));
    assert!(err.to_string().contains("aborted"));
}

#[tokio::test]
async fn abort_outside_active_rejects() {
    let agent = agent_with(StubAdapter::new(Vec::new()));
    let session = agent.create_session(options()).await.expect("create");
    let err = session.abort().expect_err("abort from created");
    assert!(matches!(err, SessionError::InvalidState { .. }));
}

#[tokio::test]
async fn second_send_while_active_rejects() {
    let adapter = HangingAdapter::new(Vec::new());
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");

    let send_session = session.clone();
    let send_task = tokio::spawn(async move { send_session.send("first").await });
    while session.state() != SessionState::Active {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = session.send("second").await.expect_err("concurrent send");
    assert!(matches!(err, SessionError::SendInFlight));

    session.abort().expect("abort");
    let _ = tokio::time::timeout(Duration::from_secs(1), send_task).await;
}

#[tokio::test]
async fn complete_is_terminal_and_idempotent_rejection() {
    let agent = agent_with(StubAdapter::new(Vec::new()));
    let session = agent.create_session(options()).await.expect("create");

    session.complete().expect("complete");
    assert_eq!(session.state(), SessionState::Completed);

    let err = session.complete().expect_err("second complete");
    assert!(matches!(err, SessionError::AlreadyClosed { .. }));
    assert!(err.to_string().contains("completed"));

    let err = session.send("hi").await.expect_err("send after complete");
    assert!(err.to_string().contains("completed"));
}

#[tokio::test]
async fn token_usage_sum_matches_breakdown() {
    let adapter = StubAdapter::new(vec![
        vec![
            StubItem::Event(AgentEvent::MessageCreated {
                message: Message::agent("one"),
                updated_options: None,
                usage: Some(UsageDelta {
                    input: 100,
                    output: 25,
                    cache_read: 10,
                    cache_creation: 5,
                    total: Some(200_000),
                }),
            }),
            StubItem::Event(AgentEvent::UsageReported(UsageDelta {
                output: 15,
                ..Default::default()
            })),
        ],
        vec![StubItem::Event(AgentEvent::UsageReported(UsageDelta {
            input: 50,
            output: 5,
            ..Default::default()
        }))],
    ]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");

    session.send("first").await.expect("send");
    session.send("second").await.expect("send");

    let usage = session.token_usage();
    assert_eq!(
        usage.used,
        usage.input + usage.output + usage.cache_read + usage.cache_creation
    );
    assert_eq!(usage.input, 150);
    assert_eq!(usage.output, 45);
    assert_eq!(usage.total, 200_000);
}

#[tokio::test]
async fn messages_are_in_timestamp_order() {
    let adapter = StubAdapter::single_turn(vec![
        AgentEvent::message(Message::agent_thinking("hmm")),
        AgentEvent::message(Message::agent("answer")),
    ]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");
    session.send("question").await.expect("send");

    let messages = session.messages(None, 0);
    assert!(messages.len() >= 3);
    for pair in messages.windows(2) {
        assert!(pair[1].timestamp() >= pair[0].timestamp());
    }
}

#[tokio::test]
async fn summary_is_idempotent_between_sends() {
    let adapter = StubAdapter::single_turn(vec![AgentEvent::message(Message::agent("sure"))]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");
    session.send("Refactor the parser module").await.expect("send");

    let first = session.summary();
    let second = session.summary();
    assert_eq!(first, second);
    assert_eq!(first, "Refactor the parser module");
}

#[tokio::test]
async fn options_update_merges_provider_session_id() {
    let adapter = StubAdapter::single_turn(vec![AgentEvent::MessageCreated {
        message: Message::agent("hello"),
        updated_options: Some(tether_protocol::OptionsUpdate {
            resume_id: Some("prov-99".to_string()),
            model: None,
        }),
        usage: None,
    }]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");
    session.send("hi").await.expect("send");

    assert_eq!(
        session.metadata().provider_session_id.as_deref(),
        Some("prov-99")
    );
}

#[tokio::test]
async fn tool_result_attaches_to_pending_tool_use() {
    let adapter = StubAdapter::single_turn(vec![
        AgentEvent::message(Message::agent_tool_use("bash", "tool-7", "{}")),
        AgentEvent::ToolCompleted {
            tool_id: "tool-7".to_string(),
            output: "done".to_string(),
            duration_ms: Some(12),
        },
    ]);
    let agent = agent_with(adapter);
    let session = agent.create_session(options()).await.expect("create");
    session.send("run it").await.expect("send");

    let messages = session.messages(None, 0);
    // The tool result updates the existing message; no new entry appears.
    assert_eq!(messages.len(), 2);
    match &messages[1] {
        Message::Agent {
            tool_use: Some(tool_use),
            ..
        } => assert_eq!(tool_use.tool_result.as_deref(), Some("done")),
        other => panic!("expected resolved tool use, got {other:?}"),
    }
}
