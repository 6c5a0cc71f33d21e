use thiserror::Error;

/// Errors surfaced by the [`QueueGateway`](crate::QueueGateway) contract.
///
/// Every operation funnels failures through this enum so callers can match on
/// `QueueNotFound` without caring whether the backend is SQS or the in-memory
/// test double.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("failed to create queue {name}: {reason}")]
    Create { name: String, reason: String },

    #[error("failed to send message to {queue}: {reason}")]
    Send { queue: String, reason: String },

    #[error("failed to receive messages from {queue}: {reason}")]
    Receive { queue: String, reason: String },

    #[error("failed to delete message from {queue}: {reason}")]
    Delete { queue: String, reason: String },

    #[error("queue transport error: {0}")]
    Transport(String),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}
