//! Worker supervisor: spawns one fetcher task per routed destination queue
//! and a configurable number of worker threads, connected by a single
//! bounded work channel, and coordinates ordered shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dispatch_queue::QueueGateway;
use dispatch_shared::{Consumer, TaskRegistry};

use crate::cli::WorkerArgs;
use crate::{fetcher, worker, WorkItem};

/// Ties the task registry, queue gateway, and route table to a running set
/// of fetcher tasks and worker threads.
pub struct Supervisor {
    gateway: Arc<dyn QueueGateway>,
    registry: Arc<TaskRegistry>,
    routes: HashMap<String, String>,
    args: WorkerArgs,
    visibility_timeout: Option<u64>,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        registry: Arc<TaskRegistry>,
        routes: HashMap<String, String>,
        args: WorkerArgs,
        visibility_timeout: Option<u64>,
    ) -> Self {
        Self {
            gateway,
            registry,
            routes,
            args,
            visibility_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared handle fetchers observe between polls; set it to request a
    /// cooperative shutdown (e.g. from a Ctrl-C handler).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawns fetchers and workers, waits for every fetcher to finish
    /// (either `loop_count` iterations elapsed or shutdown was signalled),
    /// then enqueues one stop sentinel per worker and joins them all — the
    /// supervisor's finalizer, mirroring the original's `finish()`.
    pub async fn run(self) {
        let worker_count = self.args.workers.max(1);
        let capacity = (self.args.num_messages as usize * worker_count).max(1);
        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(capacity);

        let consumer = Arc::new(Consumer::new(self.registry.clone(), self.gateway.clone()));

        tracing::info!(workers = worker_count, tasks = self.registry.len(), "supervisor starting");

        let mut worker_handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let rx = work_rx.clone();
            let consumer = consumer.clone();
            let gateway = self.gateway.clone();
            let name = format!("dispatch-worker-{index}");
            let thread_name = name.clone();
            worker_handles.push(
                std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || worker::run_worker(name, rx, consumer, gateway))
                    .expect("failed to spawn worker thread"),
            );
        }

        let mut queue_names: Vec<String> = self.routes.values().cloned().collect();
        queue_names.sort();
        queue_names.dedup();

        let mut fetcher_handles = Vec::with_capacity(queue_names.len());
        for queue_name in queue_names {
            let gateway = self.gateway.clone();
            let tx = work_tx.clone();
            let shutdown = self.shutdown.clone();
            fetcher_handles.push(tokio::spawn(fetcher::run_fetcher(
                queue_name,
                gateway,
                tx,
                self.args.loop_count,
                self.args.num_messages,
                self.args.get_wait_time,
                self.visibility_timeout,
                shutdown,
            )));
        }

        for handle in fetcher_handles {
            let _ = handle.await;
        }

        tracing::info!("all fetchers finished, signalling workers to stop");
        for _ in 0..worker_count {
            let _ = work_tx.send(WorkItem::Stop);
        }

        for handle in worker_handles {
            let _ = handle.join();
        }

        tracing::info!("supervisor shut down cleanly");
    }

    /// Requests cooperative shutdown: fetchers observe this between polls
    /// and stop issuing new receives.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_queue::in_memory::InMemoryQueue;
    use dispatch_shared::registry::{TaskContext, TaskSignature};
    use serde_json::json;

    fn routes() -> HashMap<String, String> {
        let mut routes = HashMap::new();
        routes.insert("ns.square".to_string(), "square-queue".to_string());
        routes.insert("ns.cube".to_string(), "cube-queue".to_string());
        routes
    }

    fn args(loop_count: u64) -> WorkerArgs {
        WorkerArgs {
            workers: 1,
            max_workers: None,
            loop_count: Some(loop_count),
            num_messages: 5,
            get_wait_time: 0,
            config: None,
        }
    }

    #[tokio::test]
    async fn dispatched_tasks_are_processed_end_to_end() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let registry = TaskRegistry::new();
        registry
            .register(
                "ns.square",
                TaskSignature::new().returns_value(true),
                false,
                Arc::new(|ctx: &TaskContext| {
                    let x = ctx.args[0].as_i64().unwrap_or(0);
                    Ok(Some(json!(x * x)))
                }),
            )
            .unwrap();
        registry
            .register(
                "ns.cube",
                TaskSignature::new().returns_value(true),
                false,
                Arc::new(|ctx: &TaskContext| {
                    let x = ctx.args[0].as_i64().unwrap_or(0);
                    Ok(Some(json!(x * x * x)))
                }),
            )
            .unwrap();
        let registry = Arc::new(registry);

        let publisher = dispatch_shared::Publisher::new(gateway.clone(), routes(), std::time::Duration::from_secs(2));
        let publisher = Arc::new(publisher);

        let square_task = registry.lookup("ns.square").unwrap();
        let cube_task = registry.lookup("ns.cube").unwrap();
        let square_invocation = dispatch_shared::Invocation::new(square_task, publisher.clone(), false);
        let cube_invocation = dispatch_shared::Invocation::new(cube_task, publisher.clone(), false);

        let square_result = square_invocation
            .dispatch(vec![json!(3)], serde_json::Map::new())
            .await
            .unwrap();
        let cube_result = cube_invocation
            .dispatch(vec![json!(5)], serde_json::Map::new())
            .await
            .unwrap();

        let supervisor = Supervisor::new(gateway, registry, routes(), args(1), None);
        supervisor.run().await;

        assert_eq!(square_result.get(Some(2.0)).await.unwrap(), json!(9));
        assert_eq!(cube_result.get(Some(2.0)).await.unwrap(), json!(125));
    }

    #[tokio::test]
    async fn supervisor_shuts_down_cleanly_with_no_messages() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let registry = Arc::new(TaskRegistry::new());
        let supervisor = Supervisor::new(gateway, registry, routes(), args(1), None);
        supervisor.run().await;
    }
}
