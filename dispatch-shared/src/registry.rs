//! Task Registry: process-wide name→Task map, with the
//! decorator-equivalent registration API and the flags its original
//! signature-introspection would have derived.
//!
//! Rust has no runtime reflection over a closure's parameter list, so the
//! introspection rules are pushed to registration time and
//! expressed as an explicit [`TaskSignature`] the caller supplies (built by
//! hand, or — for the common case — derived by the [`register_task!`]
//! macro from the literal shape of a `fn` item).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DispatchError;

/// Injected when a task declares a `metadata` parameter:
/// `{id, timestamp, version, receipt}`.
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub id: String,
    pub timestamp: i64,
    pub version: String,
    pub receipt: Option<String>,
}

/// What the registry learned about a callable's parameter list at
/// registration time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSignature {
    pub accepts_metadata: bool,
    pub accepts_headers: bool,
    /// Declared return type is anything other than void/empty.
    pub returns_value: bool,
}

impl TaskSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepts_metadata(mut self, value: bool) -> Self {
        self.accepts_metadata = value;
        self
    }

    pub fn accepts_headers(mut self, value: bool) -> Self {
        self.accepts_headers = value;
        self
    }

    pub fn returns_value(mut self, value: bool) -> Self {
        self.returns_value = value;
        self
    }
}

/// The context handed to a task handler at invocation time: deep-copied
/// args/kwargs plus whichever of `metadata`/`headers` its signature accepts
/// at invocation time.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub metadata: Option<TaskMetadata>,
    pub headers: Option<HashMap<String, String>>,
}

pub type TaskHandler = Arc<dyn Fn(&TaskContext) -> Result<Option<Value>, DispatchError> + Send + Sync>;

/// A registered, immutable-after-creation task.
pub struct Task {
    pub name: String,
    pub signature: TaskSignature,
    pub reply_to: Option<String>,
    pub handler: TaskHandler,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn invoke(&self, ctx: &TaskContext) -> Result<Option<Value>, DispatchError> {
        (self.handler)(ctx)
    }
}

/// Last segment of `name` plus `-` plus 8 hex digits (the reply-to
/// minting rule).
fn mint_reply_to(name: &str) -> String {
    let last_segment = name.rsplit('.').next().unwrap_or(name);
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{last_segment}-{suffix}")
}

/// Process-wide mapping from task name to [`Task`]. Backed by a
/// `DashMap` the way `tasker-worker`'s registries are, since producer and
/// worker code may register/lookup concurrently.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Arc<Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Registration: fails with `ConfigurationError` on a
    /// duplicate name, or when `has_var_args` is set (the equivalent of the
    /// original's "use of *args is not allowed").
    pub fn register(
        &self,
        name: impl Into<String>,
        signature: TaskSignature,
        has_var_args: bool,
        handler: TaskHandler,
    ) -> Result<Arc<Task>, DispatchError> {
        let name = name.into();
        if has_var_args {
            return Err(DispatchError::Configuration(
                "use of *args is not allowed".to_string(),
            ));
        }
        if self.tasks.contains_key(&name) {
            return Err(DispatchError::Configuration(format!(
                "task {name} is already registered"
            )));
        }
        let reply_to = signature.returns_value.then(|| mint_reply_to(&name));
        let task = Arc::new(Task {
            name: name.clone(),
            signature,
            reply_to,
            handler,
        });
        self.tasks.insert(name, task.clone());
        Ok(task)
    }

    /// Lookup: fails with `TaskNotFound`.
    pub fn lookup(&self, name: &str) -> Result<Arc<Task>, DispatchError> {
        self.tasks
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::TaskNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Sugar over [`TaskRegistry::register`] for the common case of a plain
/// Rust function, matching the ergonomics of the original's `@task`
/// decorator at module load. Supports the four combinations of an
/// optional `metadata: TaskMetadata` and/or `headers: HashMap<String,
/// String>` parameter, in that fixed order, after the task's own
/// business parameters; the business parameters are packed into `args`
/// positionally in the order they're declared.
///
/// A fifth arm accepts `**kwargs: Map<String, Value>` in place of typed
/// business parameters, setting both `accepts_metadata`/`accepts_headers`
/// to match the kwargs struct's own fields, matching the rule that "a
/// variadic keyword parameter sets both flags".
#[macro_export]
macro_rules! register_task {
    ($registry:expr, $name:expr, returns_value: $returns:expr, |$ctx:ident| $body:block) => {{
        let signature = $crate::registry::TaskSignature::new()
            .accepts_metadata(true)
            .accepts_headers(true)
            .returns_value($returns);
        $registry.register(
            $name,
            signature,
            false,
            std::sync::Arc::new(move |$ctx: &$crate::registry::TaskContext| $body),
        )
    }};
    ($registry:expr, $name:expr, accepts_metadata: $am:expr, accepts_headers: $ah:expr, returns_value: $returns:expr, |$ctx:ident| $body:block) => {{
        let signature = $crate::registry::TaskSignature::new()
            .accepts_metadata($am)
            .accepts_headers($ah)
            .returns_value($returns);
        $registry.register(
            $name,
            signature,
            false,
            std::sync::Arc::new(move |$ctx: &$crate::registry::TaskContext| $body),
        )
    }};
}
