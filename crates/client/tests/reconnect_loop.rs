//! Reconnect behavior with injected dialer and scheduler, no real timers.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{FailingDialer, RecordingScheduler, ScriptedDialer};
use tokio::time::timeout;

use tether_client::{AgentNotification, BrowserAgent, ConnectionState, ReconnectPolicy};

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(100),
        cap: Duration::from_millis(400),
        max_attempts: 3,
    }
}

async fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<AgentNotification>,
    matcher: impl Fn(&AgentNotification) -> bool,
) -> AgentNotification {
    timeout(Duration::from_secs(2), async {
        loop {
            let notification = rx.recv().await.expect("notification channel open");
            if matcher(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification in time")
}

#[tokio::test]
async fn gives_up_after_max_attempts_with_bounded_delays() {
    // Scenario D: repeated connection failures.
    let dialer = Arc::new(FailingDialer::default());
    let scheduler = Arc::new(RecordingScheduler::default());
    let agent = BrowserAgent::with_parts(
        "ws://127.0.0.1:1/ws",
        dialer.clone(),
        scheduler.clone(),
        policy(),
    );

    let mut notifications = agent.notifications();
    agent.connect();

    let failed = wait_for(&mut notifications, |n| {
        matches!(n, AgentNotification::ReconnectFailed { .. })
    })
    .await;
    match failed {
        AgentNotification::ReconnectFailed { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected notification: {other:?}"),
    }

    // No dial beyond the attempt budget.
    assert_eq!(dialer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(agent.state(), ConnectionState::Disconnected);

    // Delays are non-decreasing and bounded by the cap.
    let delays = scheduler.delays.lock().unwrap().clone();
    assert_eq!(
        delays,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    for pair in delays.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
    for delay in &delays {
        assert!(*delay <= policy().cap);
    }

    // The loop has terminated: no further dials happen.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dialer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn successful_reconnect_resets_attempt_counter() {
    // Two live connections that drop, then nothing but failures.
    let (dialer, remotes) = ScriptedDialer::with_connections(2);
    let dialer = Arc::new(dialer);
    let scheduler = Arc::new(RecordingScheduler::default());
    let agent = BrowserAgent::with_parts(
        "ws://127.0.0.1:1/ws",
        dialer.clone(),
        scheduler.clone(),
        policy(),
    );

    let mut notifications = agent.notifications();
    agent.connect();

    wait_for(&mut notifications, |n| {
        matches!(n, AgentNotification::Connected)
    })
    .await;

    // Drop the first connection; the agent reconnects to the second.
    let [first, second]: [common::Remote; 2] = remotes.try_into().ok().expect("two remotes");
    drop(first);
    wait_for(&mut notifications, |n| {
        matches!(n, AgentNotification::Connected)
    })
    .await;

    // Drop the second; only failures remain, so reconnection is abandoned
    // after the full attempt budget, proving the counter reset on success.
    drop(second);
    wait_for(&mut notifications, |n| {
        matches!(n, AgentNotification::ReconnectFailed { .. })
    })
    .await;

    // 2 successes, then the remaining attempt budget burns on failures:
    // the drop itself consumes attempt 1, two failed dials consume 2 and 3.
    assert_eq!(dialer.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn pending_send_rejects_on_reconnect_failure() {
    let dialer = Arc::new(FailingDialer::default());
    let scheduler = Arc::new(RecordingScheduler::default());
    let agent = BrowserAgent::with_parts(
        "ws://127.0.0.1:1/ws",
        dialer,
        scheduler,
        policy(),
    );

    let session = agent.session("sess-1");
    let send_task = {
        let session = session.clone();
        tokio::spawn(async move { session.send("hello").await })
    };

    let mut notifications = agent.notifications();
    agent.connect();
    wait_for(&mut notifications, |n| {
        matches!(n, AgentNotification::ReconnectFailed { .. })
    })
    .await;

    let result = timeout(Duration::from_secs(1), send_task)
        .await
        .expect("send resolves")
        .expect("join");
    assert!(result.is_err());
}
