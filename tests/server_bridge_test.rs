mod common;

use async_trait::async_trait;
use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskchain_core::error::{Result, TaskError};
use taskchain_core::execution::{Task, TaskContext};
use taskchain_core::messaging::{AsyncServerBridge, InMemoryTransport, ServerMessage};
use taskchain_core::state_machine::TaskState;
use tokio_test::assert_ok;
use uuid::Uuid;

type Transport = InMemoryTransport<String, String>;

struct RemoteQuery {
    bridge: AsyncServerBridge<Transport>,
    query: String,
    log: HookLog,
}

#[async_trait]
impl Task for RemoteQuery {
    type Output = Option<String>;

    fn title(&self) -> String {
        format!("remote {}", self.query)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<Option<String>> {
        self.bridge.request(ctx, self.query.clone()).await
    }

    fn on_succeeded(&self, _ctx: &TaskContext, _value: &Option<String>) {
        self.log.record(&self.query, Hook::Succeeded);
    }

    fn on_failed(&self, _ctx: &TaskContext, error: &TaskError) {
        self.log.record(&self.query, Hook::Failed(error.kind().into()));
    }

    fn on_cancelled(&self, _ctx: &TaskContext) {
        self.log.record(&self.query, Hook::Cancelled);
    }
}

fn bridge(poll_interval: Duration) -> (
    Arc<Transport>,
    AsyncServerBridge<Transport>,
    tokio::sync::mpsc::UnboundedReceiver<taskchain_core::messaging::SentRequest<String>>,
) {
    let (transport, requests) = Transport::new();
    let transport = Arc::new(transport);
    let bridge = AsyncServerBridge::new(Arc::clone(&transport), poll_interval);
    (transport, bridge, requests)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_after_progress() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let (transport, bridge, mut requests) = bridge(Duration::from_millis(50));

    let handle = harness.scheduler.submit(RemoteQuery {
        bridge,
        query: "count".into(),
        log: log.clone(),
    });

    let sent = within(requests.recv()).await.expect("request sent");
    assert_eq!(sent.request, "count");
    assert_eq!(transport.listener_count(), 1);

    // messages for other requests never reach this exchange
    assert!(!transport.deliver(ServerMessage::terminal(Uuid::new_v4(), "stray".into())));
    assert!(transport.deliver(ServerMessage::progress(sent.correlation_id, "scanning")));
    assert!(transport.deliver(ServerMessage::terminal(sent.correlation_id, "42 rows".into())));

    let result = within(handle.join()).await;
    assert_eq!(assert_ok!(result.into_result()), Some("42 rows".to_string()));
    assert_eq!(transport.listener_count(), 0);
    assert!(harness
        .sink
        .progress_messages("remote count")
        .contains(&"scanning".to_string()));
    assert_eq!(log.hooks_for("count"), vec![Hook::Succeeded]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_while_waiting_is_service_unavailable() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let (transport, bridge, mut requests) = bridge(Duration::from_millis(20));

    let handle = harness.scheduler.submit(RemoteQuery {
        bridge,
        query: "export".into(),
        log: log.clone(),
    });
    within(requests.recv()).await.expect("request sent");

    transport.disconnect();
    let result = within(handle.join()).await;

    assert_eq!(result.state(), TaskState::Failed);
    assert!(matches!(result.error(), Some(TaskError::ServiceUnavailable(_))));
    assert_eq!(
        log.hooks_for("export"),
        vec![Hook::Failed("service_unavailable".into())]
    );
    // recoverable failures surface as notices, not failures
    assert!(matches!(
        harness.sink.terminal_events().as_slice(),
        [SinkEvent::Notice(_, _)]
    ));
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_while_disconnected_fails_fast_and_retry_works() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let (transport, bridge, mut requests) = bridge(Duration::from_millis(20));
    transport.disconnect();

    let first = within(
        harness
            .scheduler
            .submit(RemoteQuery {
                bridge: bridge.clone(),
                query: "ping".into(),
                log: log.clone(),
            })
            .join(),
    )
    .await;
    assert!(matches!(first.error(), Some(TaskError::ServiceUnavailable(_))));
    assert!(requests.try_recv().is_err());

    transport.reconnect();
    let retry = harness.scheduler.submit(RemoteQuery {
        bridge,
        query: "ping".into(),
        log: log.clone(),
    });
    let sent = within(requests.recv()).await.expect("request sent");
    transport.deliver(ServerMessage::terminal(sent.correlation_id, "pong".into()));

    let result = within(retry.join()).await;
    assert_eq!(result.into_value(), Some(Some("pong".to_string())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_wait_returns_within_one_poll_interval() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let poll_interval = Duration::from_millis(1500);
    let (transport, bridge, mut requests) = bridge(poll_interval);

    let handle = harness.scheduler.submit(RemoteQuery {
        bridge,
        query: "slow report".into(),
        log: log.clone(),
    });
    within(requests.recv()).await.expect("request sent");
    assert_eq!(handle.state(), TaskState::Running);

    let cancelled_at = Instant::now();
    assert!(handle.cancel());
    let result = within(handle.join()).await;

    assert!(cancelled_at.elapsed() < poll_interval);
    assert!(result.is_cancelled());
    assert_eq!(log.hooks_for("slow report"), vec![Hook::Cancelled]);
    assert!(!harness
        .sink
        .terminal_events()
        .iter()
        .any(|e| matches!(e, SinkEvent::Failure(..) | SinkEvent::Notice(..))));
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_first_terminal_message_counts() {
    let harness = Harness::new(1);
    let log = HookLog::default();
    let (transport, bridge, mut requests) = bridge(Duration::from_millis(1000));

    let handle = harness.scheduler.submit(RemoteQuery {
        bridge,
        query: "dup".into(),
        log,
    });
    let sent = within(requests.recv()).await.expect("request sent");
    transport.deliver(ServerMessage::terminal(sent.correlation_id, "first".into()));
    transport.deliver(ServerMessage::terminal(sent.correlation_id, "second".into()));

    let result = within(handle.join()).await;
    assert_eq!(result.into_value(), Some(Some("first".to_string())));
}
