//! # Async Server Bridge
//!
//! Lets a task body send a request over a [`ServerTransport`] and wait for the
//! asynchronous reply. The wait ends on the reply, on cancellation, or when the
//! transport reports it is no longer connected; it never times out on its own.

use super::exchange::ServerExchange;
use super::transport::{MessageListener, ServerTransport};
use crate::config::BridgeConfig;
use crate::error::{Result, TaskError};
use crate::execution::TaskContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct AsyncServerBridge<T: ServerTransport> {
    transport: Arc<T>,
    poll_interval: Duration,
}

impl<T: ServerTransport> AsyncServerBridge<T> {
    pub fn new(transport: Arc<T>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    pub fn from_config(transport: Arc<T>, config: &BridgeConfig) -> Self {
        Self::new(transport, config.poll_interval())
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Send `request` and wait for its terminal reply
    ///
    /// Returns `Ok(None)` when the task was cancelled before a reply arrived, and
    /// [`TaskError::ServiceUnavailable`] when the connection is or becomes
    /// unavailable. Progress messages update the task's message meanwhile.
    pub async fn request(&self, ctx: &TaskContext, request: T::Request) -> Result<Option<T::Reply>> {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        if !self.transport.is_connected() {
            return Err(TaskError::service_unavailable("not connected to server"));
        }

        let correlation_id = Uuid::new_v4();
        let exchange = Arc::new(ServerExchange::new(correlation_id, ctx.clone()));
        let _registration = ListenerRegistration::new(
            self.transport.as_ref(),
            correlation_id,
            Arc::clone(&exchange) as Arc<dyn MessageListener<T::Reply>>,
        );

        self.transport.send(correlation_id, request).await?;
        debug!(correlation_id = %correlation_id, task_id = %ctx.id(), "Request sent; awaiting reply");

        self.wait(ctx, &exchange).await
    }

    async fn wait(
        &self,
        ctx: &TaskContext,
        exchange: &ServerExchange<T::Reply>,
    ) -> Result<Option<T::Reply>> {
        loop {
            if exchange.is_completed() {
                return Ok(exchange.take_reply());
            }
            if ctx.is_cancelled() {
                debug!(correlation_id = %exchange.correlation_id(), "Stopped waiting after cancellation");
                return Ok(None);
            }
            if !self.transport.is_connected() {
                warn!(
                    correlation_id = %exchange.correlation_id(),
                    task_id = %ctx.id(),
                    "Connection lost while waiting for reply"
                );
                return Err(TaskError::service_unavailable(format!(
                    "connection lost while waiting for reply to {}",
                    exchange.correlation_id()
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = exchange.notified() => {}
                _ = ctx.cancelled() => {}
            }
        }
    }
}

impl<T: ServerTransport> Clone for AsyncServerBridge<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            poll_interval: self.poll_interval,
        }
    }
}

impl<T: ServerTransport> std::fmt::Debug for AsyncServerBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncServerBridge")
            .field("connected", &self.transport.is_connected())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Unregisters the listener when the request ends, however it ends
struct ListenerRegistration<'a, T: ServerTransport> {
    transport: &'a T,
    correlation_id: Uuid,
}

impl<'a, T: ServerTransport> ListenerRegistration<'a, T> {
    fn new(
        transport: &'a T,
        correlation_id: Uuid,
        listener: Arc<dyn MessageListener<T::Reply>>,
    ) -> Self {
        transport.register(correlation_id, listener);
        Self {
            transport,
            correlation_id,
        }
    }
}

impl<T: ServerTransport> Drop for ListenerRegistration<'_, T> {
    fn drop(&mut self) {
        self.transport.unregister(self.correlation_id);
    }
}
