//! `dispatch-worker` binary: parses CLI flags, loads configuration, wires up
//! the queue gateway and task registry, and runs the supervisor until its
//! fetchers exhaust their `loop_count` (or forever, if unset).

use std::sync::Arc;

use clap::Parser;
use dispatch_queue::sqs::{SqsConfig, SqsQueue};
use dispatch_queue::QueueGateway;
use dispatch_shared::registry::{TaskContext, TaskSignature};
use dispatch_shared::{DispatchConfig, TaskRegistry};
use dispatch_worker::{Supervisor, WorkerArgs};
use tracing_subscriber::EnvFilter;

/// Registers the tasks this binary ships with at compile time.
///
/// The original dynamically imports each module named in `cfg.tasks` so the
/// `@task` decorator can run and register it; Rust has no equivalent of
/// importing a module by string at runtime, so task code here is linked in
/// and registered up front instead. `config.tasks` is still loaded and
/// logged for parity, but it no longer drives what gets registered.
fn register_tasks(registry: &TaskRegistry) -> Result<(), dispatch_shared::DispatchError> {
    registry.register(
        "demo.square",
        TaskSignature::new().returns_value(true),
        false,
        Arc::new(|ctx: &TaskContext| {
            let x = ctx.args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Some(serde_json::json!(x * x)))
        }),
    )?;
    registry.register(
        "demo.cube",
        TaskSignature::new().returns_value(true),
        false,
        Arc::new(|ctx: &TaskContext| {
            let x = ctx.args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Some(serde_json::json!(x * x * x)))
        }),
    )?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = WorkerArgs::parse();

    let config = DispatchConfig::load_from(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    tracing::info!(
        tasks = ?config.tasks,
        workers = args.workers,
        routes = config.routes.len(),
        "starting dispatch-worker"
    );

    let registry = TaskRegistry::new();
    register_tasks(&registry)?;
    let registry = Arc::new(registry);

    let gateway: Arc<dyn QueueGateway> = Arc::new(
        SqsQueue::new(
            SqsConfig::new(Some(config.aws.sqs.endpoint.clone()))
                .with_connect_timeout(config.aws.sqs.connect_timeout)
                .with_poll_time(config.aws.sqs.poll_time),
        )
        .await,
    );

    let supervisor = Supervisor::new(
        gateway,
        registry,
        config.routes.clone(),
        args,
        config.aws.sqs.visibility_timeout,
    );

    let shutdown = supervisor.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, requesting shutdown");
            shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    supervisor.run().await;

    Ok(())
}
