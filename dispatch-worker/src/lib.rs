//! Worker supervisor library: fetcher tasks, worker threads, and the bounded
//! work channel connecting them.

pub mod cli;
pub mod fetcher;
pub mod supervisor;
pub mod worker;

pub use cli::WorkerArgs;
pub use supervisor::Supervisor;

/// A unit of work handed from a fetcher to a worker over the bounded
/// channel: either a message to process, or the sentinel a worker receives
/// once no more messages are coming and it should exit its loop.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Message(dispatch_queue::ReceivedMessage),
    Stop,
}
