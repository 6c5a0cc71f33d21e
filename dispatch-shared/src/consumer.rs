//! Consumer: decode, validate, dispatch to the registered task, publish the
//! response. The single entry point both the worker supervisor and any
//! direct-handler test drive.

use std::sync::Arc;

use dispatch_queue::QueueGateway;
use serde_json::Value;

use crate::envelope::{self, ResponseMessage};
use crate::error::DispatchError;
use crate::registry::{TaskContext, TaskMetadata, TaskRegistry};

/// Decodes and validates the message, resolves its task, runs it with the
/// context the task's signature requested, and publishes a reply if one was
/// requested. Returns `Ok(())` when the source message should be deleted;
/// any `Err` whose [`DispatchError::should_retain_message`] is true means
/// the caller must leave the message on the queue for redelivery.
pub struct Consumer {
    pub registry: Arc<TaskRegistry>,
    pub gateway: Arc<dyn QueueGateway>,
}

impl Consumer {
    pub fn new(registry: Arc<TaskRegistry>, gateway: Arc<dyn QueueGateway>) -> Self {
        Self { registry, gateway }
    }

    /// `handle`: parse JSON, build+validate a `Message`, resolve the task,
    /// execute it, and publish a response if `reply_to` is set.
    pub async fn handle(&self, body: &str, receipt: Option<&str>) -> Result<(), DispatchError> {
        let message = envelope::decode(body).map_err(|e| {
            tracing::error!(error = %e, body, "received invalid message");
            e
        })?;

        tracing::info!(task = %message.task_name, id = %message.id, "received message");

        let task = self.registry.lookup(&message.task_name).map_err(|e| {
            tracing::error!(task = %message.task_name, "task not found");
            e
        })?;

        let ctx = TaskContext {
            args: message.args.clone(),
            kwargs: message.kwargs.clone(),
            metadata: task.signature.accepts_metadata.then(|| TaskMetadata {
                id: message.id.clone(),
                timestamp: message.metadata.timestamp,
                version: message.metadata.version.clone(),
                receipt: receipt.map(str::to_string),
            }),
            headers: task.signature.accepts_headers.then(|| message.headers.clone()),
        };

        let outcome = task.invoke(&ctx);
        let result = match outcome {
            Ok(value) => value,
            Err(DispatchError::Ignore(reason)) => {
                tracing::info!(task = %message.task_name, id = %message.id, reason, "task ignored");
                return Ok(());
            }
            Err(DispatchError::Retry(reason)) => {
                tracing::info!(task = %message.task_name, id = %message.id, reason, "retrying due to task request");
                return Err(DispatchError::Retry(reason));
            }
            Err(err) => {
                tracing::error!(task = %message.task_name, id = %message.id, error = %err, "task failed");
                return Err(DispatchError::TaskFailed {
                    task_name: message.task_name.clone(),
                    reason: err.to_string(),
                });
            }
        };

        if let Some(reply_to) = &message.reply_to {
            if let Err(err) = self.publish_response(reply_to, &message, result.unwrap_or(Value::Null)).await {
                // A missing reply queue never masks a successful task outcome.
                tracing::error!(queue = reply_to, error = %err, "failed to publish response");
            }
        }

        Ok(())
    }

    async fn publish_response(
        &self,
        reply_to: &str,
        original: &crate::envelope::Message,
        result: Value,
    ) -> Result<(), DispatchError> {
        let queue_ref = self
            .gateway
            .lookup(reply_to)
            .await
            .map_err(|_| DispatchError::QueueNotFound(reply_to.to_string()))?;
        let response = ResponseMessage::new(original, result);
        let body = serde_json::to_string(&response.as_dict())?;
        dispatch_queue::send(self.gateway.as_ref(), &queue_ref, &body, &Default::default()).await?;
        tracing::info!(queue = reply_to, id = %original.id, "sent response");
        Ok(())
    }
}
