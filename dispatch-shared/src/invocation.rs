//! Invocation & Publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dispatch_queue::{QueueGateway, QueueRef};
use lru::LruCache;
use serde_json::{Map, Value};
use std::num::NonZeroUsize;

use crate::async_result::AsyncResult;
use crate::envelope::MessageBuilder;
use crate::error::DispatchError;
use crate::registry::{Task, TaskContext, TaskMetadata};
use crate::route;

/// Reply-queue creation memoized per queue name within the process,
/// in a bounded LRU (capacity 128).
pub const REPLY_QUEUE_CACHE_CAPACITY: usize = 128;

/// Caches resolved reply-queue handles so a busy producer doesn't create
/// the same ephemeral queue twice. The original relies on `atexit` to
/// clean these up; here, [`Drop`] best-effort schedules deletion on the
/// ambient Tokio runtime if one is running, which is the idiomatic
/// equivalent of a process-exit hook.
pub struct ReplyQueueCache {
    gateway: Arc<dyn QueueGateway>,
    cache: Mutex<LruCache<String, QueueRef>>,
}

impl ReplyQueueCache {
    pub fn new(gateway: Arc<dyn QueueGateway>) -> Self {
        Self {
            gateway,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(REPLY_QUEUE_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Result<QueueRef, DispatchError> {
        if let Some(existing) = self
            .cache
            .lock()
            .expect("reply queue cache lock poisoned")
            .get(name)
            .cloned()
        {
            return Ok(existing);
        }
        let queue_ref = self.gateway.create(name).await?;
        self.cache
            .lock()
            .expect("reply queue cache lock poisoned")
            .put(name.to_string(), queue_ref.clone());
        Ok(queue_ref)
    }
}

impl Drop for ReplyQueueCache {
    fn drop(&mut self) {
        let entries: Vec<QueueRef> = self
            .cache
            .lock()
            .expect("reply queue cache lock poisoned")
            .iter()
            .map(|(_, queue_ref)| queue_ref.clone())
            .collect();
        if entries.is_empty() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let gateway = self.gateway.clone();
            handle.spawn(async move {
                for queue_ref in entries {
                    tracing::debug!(queue = %queue_ref.name, "dropping memoized reply queue at exit");
                    let _ = gateway.delete_queue(&queue_ref.url).await;
                }
            });
        }
    }
}

/// Per-call customization of a dispatch. Carries
/// `headers`/`synchronous`; customizations on one invocation never leak to
/// sibling invocations or back onto the task.
#[derive(Clone)]
pub struct Invocation {
    task: Arc<Task>,
    publisher: Arc<Publisher>,
    headers: HashMap<String, String>,
    synchronous: bool,
}

impl Invocation {
    pub fn new(task: Arc<Task>, publisher: Arc<Publisher>, synchronous_default: bool) -> Self {
        Self {
            task,
            publisher,
            headers: HashMap::new(),
            synchronous: synchronous_default,
        }
    }

    /// Merges `kv` into the invocation's headers; returns the same
    /// invocation so chains compose.
    pub fn with_headers(mut self, kv: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(kv);
        self
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// dispatch: builds a `Message`, then either runs the task
    /// in the calling thread (synchronous path) or publishes it and returns
    /// a live `AsyncResult`.
    pub async fn dispatch(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<AsyncResult, DispatchError> {
        // Deep copy at the producer boundary: `Value`/`Map` are already
        // owned trees here, so cloning them is the whole of the copy.
        let message = MessageBuilder::new(self.task.name.clone())
            .args(args.clone())
            .kwargs(kwargs.clone())
            .headers(self.headers.clone())
            .reply_to_opt(self.task.reply_to.clone())
            .build()
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        if self.synchronous {
            let ctx = TaskContext {
                args,
                kwargs,
                metadata: self.task.signature.accepts_metadata.then(|| TaskMetadata {
                    id: message.id.clone(),
                    timestamp: message.metadata.timestamp,
                    version: message.metadata.version.clone(),
                    receipt: None,
                }),
                headers: self
                    .task
                    .signature
                    .accepts_headers
                    .then(|| self.headers.clone()),
            };
            let value = self.task.invoke(&ctx)?;
            return Ok(AsyncResult::resolved(message, value.unwrap_or(Value::Null)));
        }

        self.publisher.publish(&message).await?;

        let reply_queue = match &message.reply_to {
            Some(name) if !name.is_empty() => {
                Some(self.publisher.reply_queues.get_or_create(name).await?)
            }
            _ => None,
        };
        Ok(AsyncResult::pending(message, reply_queue, self.publisher.clone()))
    }
}

/// Resolves the destination queue and publishes a `Message`
/// via the gateway's send, backed by a single gateway handle shared across the
/// process.
pub struct Publisher {
    pub gateway: Arc<dyn QueueGateway>,
    pub routes: HashMap<String, String>,
    pub reply_queues: ReplyQueueCache,
    pub default_poll_time: std::time::Duration,
}

impl Publisher {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        routes: HashMap<String, String>,
        default_poll_time: std::time::Duration,
    ) -> Self {
        Self {
            reply_queues: ReplyQueueCache::new(gateway.clone()),
            gateway,
            routes,
            default_poll_time,
        }
    }

    pub async fn publish(&self, message: &crate::envelope::Message) -> Result<(), DispatchError> {
        let queue_name = route::resolve(&message.task_name, &self.routes)?;
        let queue_ref = self.gateway.create(&queue_name).await?;
        let body = serde_json::to_string(&crate::envelope::as_dict(message))?;
        dispatch_queue::send(self.gateway.as_ref(), &queue_ref, &body, &message.headers).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TaskRegistry, TaskSignature};
    use dispatch_queue::in_memory::InMemoryQueue;
    use std::time::Duration;

    fn build_publisher() -> Arc<Publisher> {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let mut routes = HashMap::new();
        routes.insert("ns".to_string(), "ns-queue".to_string());
        Arc::new(Publisher::new(gateway, routes, Duration::from_secs(20)))
    }

    #[tokio::test]
    async fn synchronous_dispatch_never_touches_the_queue() {
        let registry = TaskRegistry::new();
        let task = registry
            .register(
                "ns.square",
                TaskSignature::new().returns_value(true),
                false,
                Arc::new(|ctx: &TaskContext| {
                    let x = ctx.args[0].as_i64().unwrap_or(0);
                    Ok(Some(Value::from(x * x)))
                }),
            )
            .unwrap();
        let publisher = build_publisher();
        let invocation = Invocation::new(task, publisher, false).with_synchronous(true);
        let result = invocation.dispatch(vec![Value::from(5)], Map::new()).await.unwrap();
        assert_eq!(result.get(None).await.unwrap(), Value::from(25));
    }

    #[tokio::test]
    async fn asynchronous_dispatch_publishes_to_the_resolved_queue() {
        let registry = TaskRegistry::new();
        let task = registry
            .register("ns.square", TaskSignature::new(), false, Arc::new(|_: &TaskContext| Ok(None)))
            .unwrap();
        let publisher = build_publisher();
        let gateway = publisher.gateway.clone();
        let invocation = Invocation::new(task, publisher, false);
        invocation.dispatch(vec![Value::from(5)], Map::new()).await.unwrap();

        let queue = gateway.lookup("ns-queue").await.unwrap();
        let received = gateway.receive(&queue, 10, None, None).await.unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn headers_do_not_leak_between_sibling_invocations() {
        let registry = TaskRegistry::new();
        let task = registry
            .register("ns.square", TaskSignature::new(), false, Arc::new(|_: &TaskContext| Ok(None)))
            .unwrap();
        let publisher = build_publisher();
        let base = Invocation::new(task, publisher, false);
        let a = base.clone().with_headers([("trace".to_string(), "a".to_string())]);
        let b = base.clone().with_headers([("trace".to_string(), "b".to_string())]);
        assert_eq!(a.headers.get("trace"), Some(&"a".to_string()));
        assert_eq!(b.headers.get("trace"), Some(&"b".to_string()));
        assert!(base.headers.is_empty());
    }
}
