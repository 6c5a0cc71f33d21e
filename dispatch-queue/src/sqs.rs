//! Real AWS SQS backend for [`QueueGateway`].
//!
//! Built on `aws-sdk-sqs` the way `reinhardt-web`'s SQS task backend does:
//! a thin config struct, a client loaded once at construction, and message
//! attributes always sent as `DataType = "String"`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client;

use crate::{QueueError, QueueGateway, QueueRef, ReceivedMessage};

/// Connection settings for the SQS backend.
#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
    pub poll_time: Duration,
    pub visibility_timeout: Option<u64>,
}

impl SqsConfig {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs_f64(2.0),
            poll_time: Duration::from_secs_f64(20.0),
            visibility_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, secs: f64) -> Self {
        self.connect_timeout = Duration::from_secs_f64(secs);
        self
    }

    pub fn with_poll_time(mut self, secs: f64) -> Self {
        self.poll_time = Duration::from_secs_f64(secs);
        self
    }

    pub fn with_visibility_timeout(mut self, secs: u64) -> Self {
        self.visibility_timeout = Some(secs);
        self
    }
}

#[derive(Debug)]
pub struct SqsQueue {
    client: Client,
    config: SqsConfig,
}

impl SqsQueue {
    pub async fn new(config: SqsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;
        let client = Client::new(&shared_config);
        Self { client, config }
    }
}

#[async_trait]
impl QueueGateway for SqsQueue {
    async fn create(&self, name: &str) -> Result<QueueRef, QueueError> {
        match self.lookup(name).await {
            Ok(queue_ref) => return Ok(queue_ref),
            Err(QueueError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let resp = self
            .client
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| QueueError::Create {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let url = resp
            .queue_url()
            .ok_or_else(|| QueueError::Create {
                name: name.to_string(),
                reason: "create_queue response had no queue_url".to_string(),
            })?
            .to_string();
        Ok(QueueRef::new(name, url))
    }

    async fn lookup(&self, name: &str) -> Result<QueueRef, QueueError> {
        let resp = self.client.get_queue_url().queue_name(name).send().await;
        match resp {
            Ok(resp) => {
                let url = resp.queue_url().unwrap_or_default().to_string();
                Ok(QueueRef::new(name, url))
            }
            Err(err) => {
                let svc_err = err.into_service_error();
                if svc_err.is_queue_does_not_exist() {
                    Err(QueueError::NotFound(name.to_string()))
                } else {
                    Err(QueueError::Transport(svc_err.to_string()))
                }
            }
        }
    }

    async fn send_once(
        &self,
        queue: &QueueRef,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let mut request = self.client.send_message().queue_url(&queue.url).message_body(body);
        for (key, value) in attributes {
            let attr = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Send {
                    queue: queue.name.clone(),
                    reason: format!("invalid message attribute {key}: {e}"),
                })?;
            request = request.message_attributes(key, attr);
        }
        request.send().await.map_err(|e| QueueError::Send {
            queue: queue.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        visibility_timeout: Option<u64>,
        wait_time_seconds: Option<u64>,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let wait_time = wait_time_seconds.unwrap_or(self.config.poll_time.as_secs());
        let visibility = visibility_timeout.or(self.config.visibility_timeout);

        let mut request = self
            .client
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(wait_time.min(20) as i32)
            .message_attribute_names("All");
        if let Some(visibility) = visibility {
            request = request.visibility_timeout(visibility as i32);
        }

        let resp = request.send().await.map_err(|e| QueueError::Receive {
            queue: queue.name.clone(),
            reason: e.to_string(),
        })?;

        let messages = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let body = m.body()?.to_string();
                let receipt = m.receipt_handle()?.to_string();
                let attributes = m
                    .message_attributes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(k, v)| v.string_value().map(|sv| (k, sv.to_string())))
                    .collect();
                Some(ReceivedMessage::new(body, receipt, queue.url.clone(), attributes))
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, queue_url: &str, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                queue: queue_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.client
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                queue: queue_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
