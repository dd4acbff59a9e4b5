//! Per-request state of one server exchange.

use super::message::{MessagePayload, ServerMessage};
use super::transport::MessageListener;
use crate::execution::TaskContext;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{trace, warn};
use uuid::Uuid;

/// Listener collecting the reply to one request
///
/// Progress messages update the task's message. The first terminal message
/// completes the exchange; later ones are dropped with a warning.
#[derive(Debug)]
pub struct ServerExchange<M> {
    correlation_id: Uuid,
    completed: AtomicBool,
    reply: Mutex<Option<M>>,
    progress_messages: AtomicUsize,
    wake: Notify,
    ctx: TaskContext,
}

impl<M: Send> ServerExchange<M> {
    pub fn new(correlation_id: Uuid, ctx: TaskContext) -> Self {
        Self {
            correlation_id,
            completed: AtomicBool::new(false),
            reply: Mutex::new(None),
            progress_messages: AtomicUsize::new(0),
            wake: Notify::new(),
            ctx,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Take the terminal reply; `None` before completion or once taken
    pub fn take_reply(&self) -> Option<M> {
        self.reply.lock().take()
    }

    pub fn progress_messages(&self) -> usize {
        self.progress_messages.load(Ordering::Relaxed)
    }

    /// Resolves on the next completion; a completion that raced ahead is kept
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }
}

impl<M: Send> MessageListener<M> for ServerExchange<M> {
    fn on_message(&self, message: ServerMessage<M>) {
        if message.correlation_id != self.correlation_id {
            trace!(
                expected = %self.correlation_id,
                received = %message.correlation_id,
                "Ignoring message for another request"
            );
            return;
        }

        match message.payload {
            MessagePayload::Progress(text) => {
                if self.is_completed() {
                    trace!(correlation_id = %self.correlation_id, "Progress after completion ignored");
                    return;
                }
                self.progress_messages.fetch_add(1, Ordering::Relaxed);
                self.ctx.update_message(text);
            }
            MessagePayload::Terminal(reply) => {
                {
                    let mut slot = self.reply.lock();
                    if self.completed.load(Ordering::Acquire) {
                        warn!(
                            correlation_id = %self.correlation_id,
                            task_id = %self.ctx.id(),
                            "Duplicate terminal message dropped"
                        );
                        return;
                    }
                    *slot = Some(reply);
                    self.completed.store(true, Ordering::Release);
                }
                self.wake.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_terminal_wins() {
        let ctx = TaskContext::detached("exchange");
        let id = Uuid::new_v4();
        let exchange = ServerExchange::new(id, ctx.clone());

        exchange.on_message(ServerMessage::progress(id, "working"));
        exchange.on_message(ServerMessage::terminal(id, 1));
        exchange.on_message(ServerMessage::terminal(id, 2));
        exchange.on_message(ServerMessage::progress(id, "late"));

        assert!(exchange.is_completed());
        assert_eq!(exchange.take_reply(), Some(1));
        assert_eq!(exchange.take_reply(), None);
        assert_eq!(exchange.progress_messages(), 1);
        assert_eq!(ctx.message(), "working");
    }

    #[test]
    fn test_foreign_correlation_ids_are_ignored() {
        let ctx = TaskContext::detached("exchange");
        let exchange = ServerExchange::new(Uuid::new_v4(), ctx.clone());

        exchange.on_message(ServerMessage::terminal(Uuid::new_v4(), "other"));
        exchange.on_message(ServerMessage::progress(Uuid::new_v4(), "other progress"));

        assert!(!exchange.is_completed());
        assert!(ctx.message().is_empty());
    }

    #[tokio::test]
    async fn test_completion_before_wait_is_not_lost() {
        let id = Uuid::new_v4();
        let exchange = ServerExchange::new(id, TaskContext::detached("exchange"));
        exchange.on_message(ServerMessage::terminal(id, "done"));

        tokio::time::timeout(std::time::Duration::from_millis(100), exchange.notified())
            .await
            .expect("stored permit should wake the waiter");
    }
}
