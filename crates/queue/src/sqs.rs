//! AWS SQS consumer for task requests.

use std::str::FromStr;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use costsync_core::config::{AwsConfig, QueueConfig};

use crate::consumer::{QueueConsumer, QueueMessage, QueueStatus};
use crate::error::QueueError;

/// Long-poll wait per receive call.
const WAIT_TIME_SECS: i32 = 20;

/// SQS-backed task request consumer.
pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    dlq_url: Option<String>,
    /// Must cover a full task run, or the request is redelivered mid-run.
    visibility_timeout_secs: i32,
}

impl SqsConsumer {
    pub async fn new(aws: &AwsConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        let queue_url = queue
            .queue_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| QueueError::Connection("QUEUE_URL is not configured".into()))?;

        // Built directly rather than through the shared environment loader so
        // a generic AWS_ENDPOINT_URL cannot reroute SQS calls.
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(aws_sdk_sqs::config::Region::new(aws.region.clone()))
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                aws.session_token.clone(),
                None,
                "costsync-queue-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        // QUEUE_AWS_ENDPOINT_URL, e.g. LocalStack.
        if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("https://{endpoint}")
            };
            sqs_config = sqs_config.endpoint_url(url);
        }

        info!(
            queue_url = %queue_url,
            region = %aws.region,
            visibility_timeout_secs = queue.visibility_timeout_secs,
            "SQS task queue consumer initialized"
        );

        Ok(Self {
            client: Client::from_conf(sqs_config.build()),
            queue_url,
            dlq_url: queue.dlq_url.clone(),
            visibility_timeout_secs: i32::try_from(queue.visibility_timeout_secs).unwrap_or(i32::MAX),
        })
    }

    async fn approximate_depth(&self, url: &str) -> Result<Option<u64>, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS attribute lookup failed for {url}: {e:?}")))?;

        Ok(resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok()))
    }
}

fn system_attribute<T: FromStr>(msg: &Message, name: MessageSystemAttributeName) -> Option<T> {
    msg.attributes()
        .and_then(|attrs| attrs.get(&name))
        .and_then(|v| v.parse::<T>().ok())
}

fn to_queue_message(msg: Message) -> Result<QueueMessage, QueueError> {
    let receipt_handle = msg
        .receipt_handle()
        .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
        .to_string();

    // SentTimestamp is epoch millis.
    let sent_at = system_attribute::<i64>(&msg, MessageSystemAttributeName::SentTimestamp)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    let attempt_count =
        system_attribute::<u32>(&msg, MessageSystemAttributeName::ApproximateReceiveCount).unwrap_or(1);

    Ok(QueueMessage {
        id: msg.message_id().unwrap_or("unknown").to_string(),
        body: msg.body().unwrap_or("").to_string(),
        receipt_handle,
        sent_at,
        attempt_count,
    })
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.clamp(1, 10) as i32;
        debug!(max_messages = capped, "polling SQS for task requests");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(WAIT_TIME_SECS)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let messages = resp.messages.unwrap_or_default();
        debug!(count = messages.len(), "received task requests");
        messages.into_iter().map(to_queue_message).collect()
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "acking task request");
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "releasing task request for redelivery");
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;
        Ok(())
    }

    async fn status(&self) -> Result<QueueStatus, QueueError> {
        let waiting = self.approximate_depth(&self.queue_url).await?;
        let dead_lettered = match &self.dlq_url {
            Some(url) => self.approximate_depth(url).await?,
            None => None,
        };
        Ok(QueueStatus {
            provider: "sqs",
            waiting,
            dead_lettered,
        })
    }
}
