//! Shared components for the dispatch task-dispatch framework: the message
//! envelope and validator, the route resolver, the task registry, the
//! invocation/publisher pair, `AsyncResult`, the consumer, and layered
//! configuration loading. `dispatch-worker` builds its supervisor on top of
//! these; `dispatch-queue` supplies the gateway trait they all depend on.

pub mod async_result;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod invocation;
pub mod registry;
pub mod route;

pub use async_result::AsyncResult;
pub use config::DispatchConfig;
pub use consumer::Consumer;
pub use envelope::{Message, MessageBuilder, ResponseMessage};
pub use error::DispatchError;
pub use invocation::{Invocation, Publisher};
pub use registry::{Task, TaskContext, TaskMetadata, TaskRegistry, TaskSignature};
