//! Queue Gateway: a thin, retried contract over an SQS-style managed queue.
//!
//! [`QueueGateway`] is the only thing above this crate that talks to a queue
//! service directly. It is deliberately small — create, lookup, send,
//! receive, delete — so that an in-memory double ([`in_memory::InMemoryQueue`])
//! and a real backend ([`sqs::SqsQueue`]) can sit behind the same trait
//! object.

mod error;
pub mod in_memory;
pub mod sqs;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
pub use error::QueueError;

/// A resolved handle to a queue. Opaque beyond its name and URL; backends are
/// free to stash anything else they need behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    pub name: String,
    pub url: String,
}

impl QueueRef {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A single message pulled off a queue: body text, an opaque receipt handle
/// used to delete it later, and the URL of the queue it came from.
///
/// This is also the handoff record the worker supervisor moves across the
/// fetcher→worker work channel, so it is kept
/// intentionally small and `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    pub receipt: String,
    pub queue_url: String,
    pub attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    pub fn new(
        body: impl Into<String>,
        receipt: impl Into<String>,
        queue_url: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            body: body.into(),
            receipt: receipt.into(),
            queue_url: queue_url.into(),
            attributes,
        }
    }
}

/// The send/receive contract every backend implements.
///
/// `send` retries transient failures up to [`SEND_MAX_ATTEMPTS`] times within
/// a [`SEND_BUDGET`] wall-clock budget; backends only need to report each
/// attempt's outcome, `retry_send` does the rest.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Idempotent: returns the existing queue if one with this name exists.
    async fn create(&self, name: &str) -> Result<QueueRef, QueueError>;

    async fn lookup(&self, name: &str) -> Result<QueueRef, QueueError>;

    async fn send_once(
        &self,
        queue: &QueueRef,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError>;

    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        visibility_timeout: Option<u64>,
        wait_time_seconds: Option<u64>,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn delete(&self, queue_url: &str, receipt: &str) -> Result<(), QueueError>;

    /// Deletes the queue itself. Used by the memoized reply-queue cache to
    /// clean up ephemeral per-invocation queues; not part of the per-message
    /// send/receive/delete contract above.
    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError>;
}

/// Three attempts.
pub const SEND_MAX_ATTEMPTS: u32 = 3;
/// Three-second total wall budget across all attempts.
pub const SEND_BUDGET: Duration = Duration::from_secs(3);

/// Send with the retry policy: up to [`SEND_MAX_ATTEMPTS`]
/// attempts, bailing out as soon as the cumulative elapsed time would exceed
/// [`SEND_BUDGET`].
pub async fn send(
    gateway: &dyn QueueGateway,
    queue: &QueueRef,
    body: &str,
    attributes: &HashMap<String, String>,
) -> Result<(), QueueError> {
    let start = Instant::now();
    let mut last_err = None;
    for attempt in 1..=SEND_MAX_ATTEMPTS {
        if start.elapsed() >= SEND_BUDGET {
            break;
        }
        match gateway.send_once(queue, body, attributes).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(
                    queue = %queue.name,
                    attempt,
                    error = %err,
                    "queue send attempt failed"
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| QueueError::Send {
        queue: queue.name.clone(),
        reason: "send budget exhausted before any attempt completed".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyGateway {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl QueueGateway for FlakyGateway {
        async fn create(&self, name: &str) -> Result<QueueRef, QueueError> {
            Ok(QueueRef::new(name, format!("mem://{name}")))
        }

        async fn lookup(&self, name: &str) -> Result<QueueRef, QueueError> {
            self.create(name).await
        }

        async fn send_once(
            &self,
            queue: &QueueRef,
            _body: &str,
            _attributes: &HashMap<String, String>,
        ) -> Result<(), QueueError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(QueueError::Transport("simulated blip".into()));
            }
            let _ = queue;
            Ok(())
        }

        async fn receive(
            &self,
            _queue: &QueueRef,
            _max_messages: u32,
            _visibility_timeout: Option<u64>,
            _wait_time_seconds: Option<u64>,
        ) -> Result<Vec<ReceivedMessage>, QueueError> {
            Ok(vec![])
        }

        async fn delete(&self, _queue_url: &str, _receipt: &str) -> Result<(), QueueError> {
            Ok(())
        }

        async fn delete_queue(&self, _queue_url: &str) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_retries_until_success_within_budget() {
        let gw = FlakyGateway {
            fail_times: AtomicU32::new(2),
        };
        let queue = QueueRef::new("q", "mem://q");
        let result = send(&gw, &queue, "{}", &HashMap::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn send_gives_up_after_max_attempts() {
        let gw = FlakyGateway {
            fail_times: AtomicU32::new(10),
        };
        let queue = QueueRef::new("q", "mem://q");
        let result = send(&gw, &queue, "{}", &HashMap::new()).await;
        assert!(result.is_err());
    }
}
