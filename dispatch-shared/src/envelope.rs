//! Message envelope & validator.
//!
//! `Message` is immutable after construction; the only way to build one is
//! through [`MessageBuilder`], whose `build` runs [`validate`] before handing
//! back the envelope, matching the original's `Message.__init__` calling
//! `self.validate()` unconditionally.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DispatchError;

/// The only message version this crate accepts.
pub const ENVELOPE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: i64,
    pub version: String,
}

/// The task envelope. Every field that rides on the wire is kept
/// here verbatim, including `reply_to`/`expiration` when absent, so
/// `as_dict` always emits the full key set.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub headers: HashMap<String, String>,
    pub reply_to: Option<String>,
    /// Nanoseconds from `metadata.timestamp` until the envelope expires.
    pub expiration: Option<i64>,
    pub metadata: Metadata,
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().expect("timestamp fits in an i64")
}

/// Builder for [`Message`]. Defaults mirror the
/// original: a fresh UUIDv4 `id`, empty `kwargs`/`headers`, `timestamp` =
/// now in nanoseconds, `version` = [`ENVELOPE_VERSION`].
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    id: Option<String>,
    task_name: Option<String>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    headers: HashMap<String, String>,
    reply_to: Option<String>,
    expiration: Option<i64>,
    timestamp: Option<i64>,
    version: Option<String>,
}

impl MessageBuilder {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: Some(task_name.into()),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn reply_to_opt(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub fn expiration_nanos(mut self, nanos: i64) -> Self {
        self.expiration = Some(nanos);
        self
    }

    pub fn timestamp_nanos(mut self, nanos: i64) -> Self {
        self.timestamp = Some(nanos);
        self
    }

    /// Only used when reconstructing a `Message` from a decoded wire
    /// payload whose `metadata.version` we must preserve verbatim for
    /// `validate` to check.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn build(self) -> Result<Message, DispatchError> {
        let task_name = self
            .task_name
            .ok_or_else(|| DispatchError::Validation("task_name is required".to_string()))?;
        let message = Message {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_name,
            args: self.args,
            kwargs: self.kwargs,
            headers: self.headers,
            reply_to: self.reply_to,
            expiration: self.expiration,
            metadata: Metadata {
                timestamp: self.timestamp.unwrap_or_else(now_nanos),
                version: self.version.unwrap_or_else(|| ENVELOPE_VERSION.to_string()),
            },
        };
        validate(&message)?;
        Ok(message)
    }
}

/// Accepted envelope versions (currently just `{"1.0"}`).
fn accepted_versions() -> &'static [&'static str] {
    &[ENVELOPE_VERSION]
}

/// validate: required fields present, version accepted,
/// not expired.
pub fn validate(message: &Message) -> Result<(), DispatchError> {
    if message.id.trim().is_empty() {
        return Err(DispatchError::Validation("id is required".to_string()));
    }
    if message.task_name.trim().is_empty() {
        return Err(DispatchError::Validation("task_name is required".to_string()));
    }
    if !accepted_versions().contains(&message.metadata.version.as_str()) {
        return Err(DispatchError::Validation(format!(
            "unsupported envelope version: {}",
            message.metadata.version
        )));
    }
    if let Some(expiration) = message.expiration {
        let now = now_nanos();
        if now > message.metadata.timestamp + expiration {
            return Err(DispatchError::Validation(format!(
                "message {} expired at {} (now {now})",
                message.id,
                message.metadata.timestamp + expiration
            )));
        }
    }
    Ok(())
}

/// as_dict: canonical mapping with keys
/// `{id, metadata, headers, task, args, kwargs, expiration, reply_to}`.
pub fn as_dict(message: &Message) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::String(message.id.clone()));
    map.insert(
        "metadata".to_string(),
        serde_json::json!({
            "timestamp": message.metadata.timestamp,
            "version": message.metadata.version,
        }),
    );
    map.insert(
        "headers".to_string(),
        serde_json::to_value(&message.headers).expect("headers are always valid JSON"),
    );
    map.insert("task".to_string(), Value::String(message.task_name.clone()));
    map.insert("args".to_string(), Value::Array(message.args.to_vec()));
    map.insert("kwargs".to_string(), Value::Object(message.kwargs.clone()));
    map.insert(
        "expiration".to_string(),
        message.expiration.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "reply_to".to_string(),
        message
            .reply_to
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    Value::Object(map)
}

/// Converts a `Decimal` task argument to the `Value` the wire format
/// expects: an integer when the value is exactly integral, otherwise an
/// IEEE-754 double, matching the original publisher's custom JSON encoder
/// for `decimal.Decimal`. Callers building `args`/`kwargs` from `Decimal`
/// business values should run them through this before handing them to
/// `MessageBuilder`; by the time a value reaches `as_dict` it is already a
/// plain `serde_json::Value` and carries no residual `Decimal`-ness to
/// normalize.
pub fn normalize_decimal(value: &Decimal) -> Value {
    if value.fract().is_zero() {
        serde_json::json!(value.to_string().parse::<i64>().unwrap_or_default())
    } else {
        serde_json::json!(value.to_string().parse::<f64>().unwrap_or_default())
    }
}

/// equals: structural equality via `as_dict`.
pub fn equals(a: &Message, b: &Message) -> bool {
    as_dict(a) == as_dict(b)
}

/// Decode a wire payload into a validated `Message` ("Consumers
/// parse the JSON, reconstruct a Message via build with the on-wire
/// id/timestamp, then validate. Unknown top-level keys are ignored
/// defensively.")
pub fn decode(body: &str) -> Result<Message, DispatchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| DispatchError::Validation(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DispatchError::Validation("message body is not a JSON object".to_string()))?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Validation("id is required".to_string()))?;
    let task_name = obj
        .get("task")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Validation("task is required".to_string()))?;
    let args = obj
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let kwargs = obj
        .get("kwargs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let headers: HashMap<String, String> = obj
        .get("headers")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let reply_to = obj.get("reply_to").and_then(Value::as_str).map(str::to_string);
    let expiration = obj.get("expiration").and_then(Value::as_i64);

    let metadata = obj
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| DispatchError::Validation("metadata is required".to_string()))?;
    let timestamp = parse_timestamp(metadata.get("timestamp"))?;
    let version = metadata
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Validation("metadata.version is required".to_string()))?;

    let mut builder = MessageBuilder::new(task_name)
        .id(id)
        .args(args)
        .kwargs(kwargs)
        .headers(headers)
        .timestamp_nanos(timestamp)
        .version(version);
    if let Some(reply_to) = reply_to {
        builder = builder.reply_to(reply_to);
    }
    if let Some(expiration) = expiration {
        builder = builder.expiration_nanos(expiration);
    }
    builder.build()
}

/// validate: "If timestamp is a text, parse to integer or fail".
fn parse_timestamp(value: Option<&Value>) -> Result<i64, DispatchError> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| DispatchError::Validation("metadata.timestamp is not an integer".to_string())),
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| DispatchError::Validation(format!("metadata.timestamp is not parseable: {s}"))),
        _ => Err(DispatchError::Validation("metadata.timestamp is required".to_string())),
    }
}

/// The response envelope: a fresh `id`/timestamp,
/// the full original envelope nested under `original`, and the task's
/// result. Used solely to correlate results with their originating
/// invocation via `original.id`.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub id: String,
    pub metadata: Metadata,
    pub original: Value,
    pub result: Value,
}

impl ResponseMessage {
    pub fn new(original: &Message, result: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata: Metadata {
                timestamp: now_nanos(),
                version: ENVELOPE_VERSION.to_string(),
            },
            original: as_dict(original),
            result,
        }
    }

    pub fn as_dict(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "metadata": {
                "timestamp": self.metadata.timestamp,
                "version": self.metadata.version,
            },
            "original": self.original,
            "result": self.result,
        })
    }

    /// `original.id`, used by [`crate::async_result::AsyncResult`] to
    /// correlate replies.
    pub fn original_id(&self) -> Option<&str> {
        self.original.get("id").and_then(Value::as_str)
    }

    pub fn decode(body: &str) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| DispatchError::Validation(format!("invalid JSON: {e}")))?;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::Validation("response id is required".to_string()))?
            .to_string();
        let timestamp = parse_timestamp(value.get("metadata").and_then(|m| m.get("timestamp")))?;
        let version = value
            .get("metadata")
            .and_then(|m| m.get("version"))
            .and_then(Value::as_str)
            .unwrap_or(ENVELOPE_VERSION)
            .to_string();
        let original = value
            .get("original")
            .cloned()
            .ok_or_else(|| DispatchError::Validation("response original is required".to_string()))?;
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        Ok(Self {
            id,
            metadata: Metadata { timestamp, version },
            original,
            result,
        })
    }
}
