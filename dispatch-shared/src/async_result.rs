//! AsyncResult: the caller-side handle that blocks on the reply
//! queue until a matching response arrives or a timeout expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_queue::{QueueGateway, QueueRef};
use serde_json::Value;

use crate::envelope::{Message, ResponseMessage};
use crate::error::DispatchError;

/// Sentinel returned by `get` when the originating message had no
/// `reply_to` ("If there is no reply queue, return the
/// sentinel 'no result'.").
pub fn no_result_sentinel() -> Value {
    Value::Null
}

enum State {
    Resolved(Value),
    Pending {
        reply_queue: Option<QueueRef>,
        gateway: Arc<dyn QueueGateway>,
        default_poll_time: Duration,
    },
}

pub struct AsyncResult {
    message: Message,
    state: State,
}

impl AsyncResult {
    /// Synchronous-dispatch path: the value is already known.
    pub fn resolved(message: Message, value: Value) -> Self {
        Self {
            message,
            state: State::Resolved(value),
        }
    }

    /// Asynchronous-dispatch path: bound to a reply queue (or none, if the
    /// task has no declared return).
    pub fn pending(
        message: Message,
        reply_queue: Option<QueueRef>,
        publisher: Arc<crate::invocation::Publisher>,
    ) -> Self {
        Self {
            message,
            state: State::Pending {
                reply_queue,
                gateway: publisher.gateway.clone(),
                default_poll_time: publisher.default_poll_time,
            },
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// get: returns the pre-resolved value, the "no result"
    /// sentinel, or long-polls the reply queue and correlates by `id`,
    /// discarding and rereading stale/foreign replies until the timeout
    /// budget is exhausted.
    pub async fn get(&self, timeout_seconds: Option<f64>) -> Result<Value, DispatchError> {
        match &self.state {
            State::Resolved(value) => Ok(value.clone()),
            State::Pending {
                reply_queue,
                gateway,
                default_poll_time,
            } => {
                let Some(reply_queue) = reply_queue else {
                    return Ok(no_result_sentinel());
                };

                let mut remaining = timeout_seconds
                    .map(Duration::from_secs_f64)
                    .unwrap_or(*default_poll_time);

                loop {
                    if remaining.is_zero() {
                        return Err(DispatchError::Timeout {
                            task_name: self.message.task_name.clone(),
                            id: self.message.id.clone(),
                        });
                    }
                    let attempt_start = Instant::now();
                    let wait_secs = remaining.as_secs().max(1);
                    let received = gateway
                        .receive(reply_queue, 1, None, Some(wait_secs))
                        .await?;

                    let Some(received) = received.into_iter().next() else {
                        return Err(DispatchError::Timeout {
                            task_name: self.message.task_name.clone(),
                            id: self.message.id.clone(),
                        });
                    };

                    let response = match ResponseMessage::decode(&received.body) {
                        Ok(response) => response,
                        Err(_) => {
                            remaining = remaining.saturating_sub(attempt_start.elapsed());
                            continue;
                        }
                    };

                    if response.original_id() == Some(self.message.id.as_str()) {
                        let _ = gateway.delete(&reply_queue.url, &received.receipt).await;
                        return Ok(response.result);
                    }

                    // Stale or foreign reply on a reply queue shared by
                    // sibling invocations of the same task: leave it on the
                    // queue for its rightful waiter and keep waiting with
                    // the remaining budget.
                    remaining = remaining.saturating_sub(attempt_start.elapsed());
                }
            }
        }
    }
}
