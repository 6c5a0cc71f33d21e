use thiserror::Error;

/// The crate-wide error vocabulary. Kept flat and matched by
/// variant name rather than by message text, the way `tasker-client`'s
/// `ClientError` is consumed by its callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing/bad configuration, or a duplicate task registration. Fatal at
    /// startup; never caught internally.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or expired message envelope.
    #[error("validation error: {0}")]
    Validation(String),

    /// Registry miss.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Lookup or reply-publish against a missing queue.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Task-raised signal that the framework must not ack; the message
    /// re-appears after the queue's visibility timeout.
    #[error("retry requested: {0}")]
    Retry(String),

    /// Task-raised signal to drop the message silently.
    #[error("ignored: {0}")]
    Ignore(String),

    /// `AsyncResult::get` exhausted its budget.
    #[error("timed out waiting for result of {task_name} ({id})")]
    Timeout { task_name: String, id: String },

    /// A task handler raised something other than `Retry`/`Ignore`. Treated
    /// the same as `Retry` for ack purposes.
    #[error("task {task_name} failed: {reason}")]
    TaskFailed { task_name: String, reason: String },

    #[error(transparent)]
    Queue(#[from] dispatch_queue::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether the worker supervisor should leave the source message
    /// un-acked so the queue redelivers it (the corrected retry
    /// policy): true for `Retry` and any generic task failure, false for
    /// everything else (success, `Ignore`, and poison messages).
    pub fn should_retain_message(&self) -> bool {
        matches!(self, DispatchError::Retry(_) | DispatchError::TaskFailed { .. })
    }
}
