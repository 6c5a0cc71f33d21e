//! Fetcher loop: long-polls a single destination queue and pushes received
//! messages onto the bounded work channel connecting all fetchers to all
//! workers. Never deletes messages — acking is the worker's job, after
//! `Consumer::handle` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use dispatch_queue::{QueueGateway, ReceivedMessage};

use crate::WorkItem;

/// Runs until `loop_count` iterations have elapsed (or forever if `None`)
/// or `shutdown` is raised. Blocks on the bounded channel `send` when
/// workers fall behind; that block is the backpressure mechanism that
/// keeps prefetch bounded.
#[allow(clippy::too_many_arguments)]
pub async fn run_fetcher(
    queue_name: String,
    gateway: Arc<dyn QueueGateway>,
    work_tx: Sender<WorkItem>,
    loop_count: Option<u64>,
    num_messages: u32,
    get_wait_time: u64,
    visibility_timeout: Option<u64>,
    shutdown: Arc<AtomicBool>,
) {
    let queue_ref = match gateway.create(&queue_name).await {
        Ok(queue_ref) => queue_ref,
        Err(err) => {
            tracing::error!(queue = queue_name, error = %err, "fetcher could not create queue, exiting");
            return;
        }
    };

    tracing::info!(queue = queue_name, loop_count = ?loop_count, "fetcher starting");

    let mut iterations: u64 = 0;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!(queue = queue_name, "fetcher stopping: shutdown signalled");
            break;
        }
        if let Some(limit) = loop_count {
            if iterations >= limit {
                tracing::info!(queue = queue_name, "fetcher stopping: loop_count exhausted");
                break;
            }
        }
        iterations += 1;

        let received = gateway
            .receive(&queue_ref, num_messages, visibility_timeout, Some(get_wait_time))
            .await;

        match received {
            Ok(messages) => {
                for message in messages {
                    if !push(&work_tx, message).await {
                        tracing::info!(queue = queue_name, "fetcher stopping: work channel closed");
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(queue = queue_name, error = %err, "fetcher receive failed");
            }
        }
    }
}

/// Pushes onto the bounded work channel, yielding back to the runtime with
/// a short sleep while it's full rather than blocking the executor thread
/// outright. This is the backpressure mechanism: fetchers stall here when
/// workers fall behind.
async fn push(work_tx: &Sender<WorkItem>, message: ReceivedMessage) -> bool {
    let mut item = WorkItem::Message(message);
    loop {
        match work_tx.try_send(item) {
            Ok(()) => return true,
            Err(crossbeam_channel::TrySendError::Full(returned)) => {
                item = returned;
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_queue::in_memory::InMemoryQueue;

    #[tokio::test]
    async fn fetcher_stops_after_loop_count_iterations() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        run_fetcher(
            "orders".to_string(),
            gateway,
            tx,
            Some(1),
            5,
            0,
            None,
            shutdown,
        )
        .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fetcher_forwards_received_messages_to_the_work_channel() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let queue_ref = gateway.create("orders").await.unwrap();
        gateway.send_once(&queue_ref, "body-1", &Default::default()).await.unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        run_fetcher("orders".to_string(), gateway, tx, Some(1), 5, 0, None, shutdown).await;

        match rx.try_recv().unwrap() {
            WorkItem::Message(message) => assert_eq!(message.body, "body-1"),
            WorkItem::Stop => panic!("expected a message, got Stop"),
        }
    }

    #[tokio::test]
    async fn fetcher_stops_immediately_when_shutdown_is_already_set() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(true));

        run_fetcher("orders".to_string(), gateway, tx, None, 5, 0, None, shutdown).await;

        assert!(rx.try_recv().is_err());
    }
}
