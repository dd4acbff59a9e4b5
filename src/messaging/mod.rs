//! # Messaging Module
//!
//! Request/reply plumbing between task bodies and a server that answers
//! asynchronously through pushed messages.

pub mod bridge;
pub mod exchange;
pub mod in_memory;
pub mod message;
pub mod transport;

pub use bridge::AsyncServerBridge;
pub use exchange::ServerExchange;
pub use in_memory::{InMemoryTransport, SentRequest};
pub use message::{MessagePayload, ServerMessage};
pub use transport::{MessageListener, ServerTransport};
