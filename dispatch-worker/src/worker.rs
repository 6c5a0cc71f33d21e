//! Worker thread: repeatedly takes from the work channel, dispatches to
//! [`dispatch_shared::Consumer::handle`], and deletes the source message
//! according to the retry-vs-ack policy in [`dispatch_shared::DispatchError`].
//!
//! Each worker runs as a real OS thread (task functions are synchronous,
//! potentially CPU-bound, user code) with its own single-threaded Tokio
//! runtime to drive the async gateway calls `handle` makes.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use dispatch_queue::QueueGateway;
use dispatch_shared::Consumer;

use crate::WorkItem;

/// Runs until it receives [`WorkItem::Stop`] or the channel disconnects.
pub fn run_worker(name: String, work_rx: Receiver<WorkItem>, consumer: Arc<Consumer>, gateway: Arc<dyn QueueGateway>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker's Tokio runtime");

    tracing::info!(worker = name, "worker starting");

    loop {
        let item = match work_rx.recv() {
            Ok(item) => item,
            Err(_) => {
                tracing::info!(worker = name, "worker stopping: work channel disconnected");
                return;
            }
        };

        let message = match item {
            WorkItem::Stop => {
                tracing::info!(worker = name, "worker stopping: received stop sentinel");
                return;
            }
            WorkItem::Message(message) => message,
        };

        let outcome = runtime.block_on(consumer.handle(&message.body, Some(&message.receipt)));

        let should_delete = match &outcome {
            Ok(()) => true,
            Err(err) => !err.should_retain_message(),
        };

        if let Err(err) = &outcome {
            tracing::warn!(worker = name, queue = message.queue_url, error = %err, "message handling failed");
        }

        if should_delete {
            if let Err(err) = runtime.block_on(gateway.delete(&message.queue_url, &message.receipt)) {
                tracing::warn!(worker = name, error = %err, "failed to delete acked message");
            }
        } else {
            tracing::info!(worker = name, queue = message.queue_url, "leaving message for redelivery");
        }
    }
}
