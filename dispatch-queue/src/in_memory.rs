//! An in-process, in-memory [`QueueGateway`] used by the test suite and by
//! any producer/worker wiring that wants to run without a real AWS account.
//!
//! Mirrors the shape of `tasker-shared`'s `MessagingProvider::new_in_memory`
//! test double: queues are `VecDeque<ReceivedMessage>` behind a `Mutex`,
//! keyed by name, with receipts minted as fresh UUIDs so `delete` can target
//! a specific in-flight message the way a real queue service would.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{QueueError, QueueGateway, QueueRef, ReceivedMessage};

struct PendingMessage {
    body: String,
    attributes: HashMap<String, String>,
}

/// `queue_url` for in-memory queues is just `mem://<name>`; there is no real
/// network endpoint behind it.
#[derive(Debug)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<PendingMessage>>>,
    in_flight: Mutex<HashMap<String, (String, PendingMessage)>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn url_for(name: &str) -> String {
        format!("mem://{name}")
    }

    fn name_from_url(url: &str) -> &str {
        url.strip_prefix("mem://").unwrap_or(url)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueue {
    async fn create(&self, name: &str) -> Result<QueueRef, QueueError> {
        let mut queues = self.queues.lock().expect("in-memory queue lock poisoned");
        queues.entry(name.to_string()).or_default();
        Ok(QueueRef::new(name, Self::url_for(name)))
    }

    async fn lookup(&self, name: &str) -> Result<QueueRef, QueueError> {
        let queues = self.queues.lock().expect("in-memory queue lock poisoned");
        if queues.contains_key(name) {
            Ok(QueueRef::new(name, Self::url_for(name)))
        } else {
            Err(QueueError::NotFound(name.to_string()))
        }
    }

    async fn send_once(
        &self,
        queue: &QueueRef,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().expect("in-memory queue lock poisoned");
        let q = queues
            .get_mut(&queue.name)
            .ok_or_else(|| QueueError::NotFound(queue.name.clone()))?;
        q.push_back(PendingMessage {
            body: body.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        _visibility_timeout: Option<u64>,
        _wait_time_seconds: Option<u64>,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut queues = self.queues.lock().expect("in-memory queue lock poisoned");
        let q = queues
            .get_mut(&queue.name)
            .ok_or_else(|| QueueError::NotFound(queue.name.clone()))?;

        let mut out = Vec::new();
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        for _ in 0..max_messages {
            let Some(msg) = q.pop_front() else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            out.push(ReceivedMessage::new(
                msg.body.clone(),
                receipt.clone(),
                queue.url.clone(),
                msg.attributes.clone(),
            ));
            in_flight.insert(receipt, (queue.name.clone(), msg));
        }
        Ok(out)
    }

    async fn delete(&self, queue_url: &str, receipt: &str) -> Result<(), QueueError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if in_flight.remove(receipt).is_none() {
            tracing::debug!(queue_url, receipt, "delete of unknown/expired receipt ignored");
        }
        Ok(())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        let name = Self::name_from_url(queue_url).to_string();
        let mut queues = self.queues.lock().expect("in-memory queue lock poisoned");
        queues.remove(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent() {
        let gw = InMemoryQueue::new();
        let a = gw.create("orders").await.unwrap();
        let b = gw.create("orders").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn lookup_missing_queue_fails() {
        let gw = InMemoryQueue::new();
        let err = gw.lookup("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_body_and_attributes() {
        let gw = InMemoryQueue::new();
        let queue = gw.create("orders").await.unwrap();
        let mut attrs = HashMap::new();
        attrs.insert("trace".to_string(), "abc".to_string());
        crate::send(&gw, &queue, "{\"hello\":1}", &attrs).await.unwrap();

        let received = gw.receive(&queue, 10, None, None).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "{\"hello\":1}");
        assert_eq!(received[0].attributes.get("trace"), Some(&"abc".to_string()));
    }

    #[tokio::test]
    async fn receive_caps_at_max_messages() {
        let gw = InMemoryQueue::new();
        let queue = gw.create("orders").await.unwrap();
        for i in 0..5 {
            gw.send_once(&queue, &format!("{i}"), &HashMap::new())
                .await
                .unwrap();
        }
        let received = gw.receive(&queue, 2, None, None).await.unwrap();
        assert_eq!(received.len(), 2);
        let remaining = gw.receive(&queue, 10, None, None).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_in_flight_message() {
        let gw = InMemoryQueue::new();
        let queue = gw.create("orders").await.unwrap();
        gw.send_once(&queue, "body", &HashMap::new()).await.unwrap();
        let received = gw.receive(&queue, 1, None, None).await.unwrap();
        assert_eq!(received.len(), 1);
        gw.delete(&queue.url, &received[0].receipt).await.unwrap();
        // deleting again is a no-op, not an error
        gw.delete(&queue.url, &received[0].receipt).await.unwrap();
    }

    #[tokio::test]
    async fn delete_queue_removes_it_from_lookup() {
        let gw = InMemoryQueue::new();
        let queue = gw.create("orders").await.unwrap();
        gw.delete_queue(&queue.url).await.unwrap();
        assert!(gw.lookup("orders").await.is_err());
    }

    #[test]
    fn name_from_url_strips_scheme() {
        assert_eq!(InMemoryQueue::name_from_url("mem://orders"), "orders");
        assert_eq!(InMemoryQueue::name_from_url("orders"), "orders");
    }
}
