//! Command-line surface for the `dispatch-worker` binary.

use clap::Parser;

/// Worker supervisor entry point: spawns worker threads and one fetcher
/// task per routed destination queue.
#[derive(Parser, Debug, Clone)]
#[command(name = "dispatch-worker", about = "Dispatch task worker supervisor")]
pub struct WorkerArgs {
    /// Worker processes (threads, in this port) to spawn.
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Upper bound on auto-scale. Reserved; not currently enforced.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Fetcher iterations per queue. Unset means run forever.
    #[arg(long)]
    pub loop_count: Option<u64>,

    /// Per-receive batch size.
    #[arg(long, default_value_t = 5)]
    pub num_messages: u32,

    /// Long-poll seconds for fetchers.
    #[arg(long, default_value_t = 2)]
    pub get_wait_time: u64,

    /// Override for `SETTINGS_MODULE`: path to a YAML/JSON config file.
    #[arg(long)]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = WorkerArgs::parse_from(["dispatch-worker"]);
        assert_eq!(args.num_messages, 5);
        assert_eq!(args.get_wait_time, 2);
        assert!(args.loop_count.is_none());
        assert!(args.max_workers.is_none());
        assert!(args.workers > 0);
    }

    #[test]
    fn flags_override_defaults() {
        let args = WorkerArgs::parse_from([
            "dispatch-worker",
            "--workers",
            "2",
            "--loop-count",
            "1",
            "--num-messages",
            "10",
            "--get-wait-time",
            "5",
        ]);
        assert_eq!(args.workers, 2);
        assert_eq!(args.loop_count, Some(1));
        assert_eq!(args.num_messages, 10);
        assert_eq!(args.get_wait_time, 5);
    }
}
