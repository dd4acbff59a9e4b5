//! Transport contract between tasks and a message-pushing server.

use super::message::ServerMessage;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Callback for messages pushed by the server
///
/// Called on the transport's delivery thread; implementations must not block.
pub trait MessageListener<M>: Send + Sync {
    fn on_message(&self, message: ServerMessage<M>);
}

/// Connection to a server that replies asynchronously
///
/// Listeners are keyed by correlation id. A transport delivers each message to
/// the listener registered for its correlation id, if any.
#[async_trait]
pub trait ServerTransport: Send + Sync + 'static {
    type Request: Send + 'static;
    type Reply: Send + 'static;

    fn is_connected(&self) -> bool;

    fn register(&self, correlation_id: Uuid, listener: Arc<dyn MessageListener<Self::Reply>>);

    fn unregister(&self, correlation_id: Uuid);

    /// Fails with [`TaskError::ServiceUnavailable`](crate::error::TaskError::ServiceUnavailable)
    /// when disconnected
    async fn send(&self, correlation_id: Uuid, request: Self::Request) -> Result<()>;
}
