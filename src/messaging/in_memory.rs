//! # In-Memory Transport
//!
//! Loopback [`ServerTransport`] for tests and embedded servers. Sent requests
//! appear on an unbounded channel; server replies are pushed with
//! [`InMemoryTransport::deliver`].

use super::message::ServerMessage;
use super::transport::{MessageListener, ServerTransport};
use crate::error::{Result, TaskError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Request as seen by the server side of an [`InMemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest<Req> {
    pub correlation_id: Uuid,
    pub request: Req,
}

pub struct InMemoryTransport<Req, Rep> {
    connected: AtomicBool,
    listeners: DashMap<Uuid, Arc<dyn MessageListener<Rep>>>,
    outbox: mpsc::UnboundedSender<SentRequest<Req>>,
}

impl<Req, Rep> InMemoryTransport<Req, Rep>
where
    Req: Send + 'static,
    Rep: Send + 'static,
{
    /// Connected transport plus the receiving end of its requests
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentRequest<Req>>) {
        let (outbox, requests) = mpsc::unbounded_channel();
        let transport = Self {
            connected: AtomicBool::new(true),
            listeners: DashMap::new(),
            outbox,
        };
        (transport, requests)
    }

    /// Push a server message; `false` if nobody listens for its correlation id
    pub fn deliver(&self, message: ServerMessage<Rep>) -> bool {
        let listener = self
            .listeners
            .get(&message.correlation_id)
            .map(|entry| Arc::clone(entry.value()));

        match listener {
            Some(listener) => {
                listener.on_message(message);
                true
            }
            None => {
                debug!(correlation_id = %message.correlation_id, "No listener for server message");
                false
            }
        }
    }

    /// Push a message to every registered listener
    pub fn broadcast(&self, message: ServerMessage<Rep>)
    where
        Rep: Clone,
    {
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener.on_message(message.clone());
        }
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        info!("In-memory transport disconnected");
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::Release);
        info!("In-memory transport reconnected");
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl<Req, Rep> ServerTransport for InMemoryTransport<Req, Rep>
where
    Req: Send + 'static,
    Rep: Send + 'static,
{
    type Request = Req;
    type Reply = Rep;

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn register(&self, correlation_id: Uuid, listener: Arc<dyn MessageListener<Rep>>) {
        self.listeners.insert(correlation_id, listener);
    }

    fn unregister(&self, correlation_id: Uuid) {
        self.listeners.remove(&correlation_id);
    }

    async fn send(&self, correlation_id: Uuid, request: Req) -> Result<()> {
        if !self.is_connected() {
            return Err(TaskError::service_unavailable("transport is disconnected"));
        }
        self.outbox
            .send(SentRequest {
                correlation_id,
                request,
            })
            .map_err(|_| TaskError::service_unavailable("server endpoint closed"))
    }
}

impl<Req, Rep> fmt::Debug for InMemoryTransport<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("connected", &self.connected.load(Ordering::Acquire))
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
