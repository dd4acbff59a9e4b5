//! # Server Message Structures
//!
//! Messages pushed by a server in reply to a request. Every message carries the
//! correlation id of the request it belongs to; a request receives any number of
//! progress messages followed by one terminal message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessagePayload<M> {
    /// Human-readable status update
    Progress(String),
    /// Final reply; completes the request
    Terminal(M),
}

/// Message addressed to one outstanding request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage<M> {
    pub correlation_id: Uuid,
    pub payload: MessagePayload<M>,
    pub sent_at: DateTime<Utc>,
}

impl<M> ServerMessage<M> {
    pub fn progress(correlation_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            correlation_id,
            payload: MessagePayload::Progress(text.into()),
            sent_at: Utc::now(),
        }
    }

    pub fn terminal(correlation_id: Uuid, reply: M) -> Self {
        Self {
            correlation_id,
            payload: MessagePayload::Terminal(reply),
            sent_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, MessagePayload::Terminal(_))
    }
}
