use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ImportMessage, JobQueue, QueueMessage};
use crate::config::AppConfig;
use crate::sigv4::{self, Credentials};
use crate::{Error, Result};

const SERVICE: &str = "sqs";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Amazon SQS over the JSON 1.0 protocol
pub struct SqsQueue {
    queue_url: String,
    endpoint: Url,
    region: String,
    visibility_timeout_secs: u64,
    credentials: Credentials,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    queue_url: &'a str,
    message_body: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest<'a> {
    queue_url: &'a str,
    max_number_of_messages: u32,
    wait_time_seconds: u64,
    visibility_timeout: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    receipt_handle: String,
    body: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest<'a> {
    queue_url: &'a str,
    receipt_handle: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

#[derive(Deserialize)]
struct Ignored {}

impl SqsQueue {
    pub fn new(queue_url: &str, region: String, visibility_timeout_secs: u64, credentials: Credentials) -> Result<Self> {
        let mut endpoint = Url::parse(queue_url)
            .map_err(|e| Error::Config(format!("Invalid queue.url '{}': {}", queue_url, e)))?;
        endpoint.set_path("/");
        endpoint.set_query(None);

        Ok(Self {
            queue_url: queue_url.to_string(),
            endpoint,
            region,
            visibility_timeout_secs,
            credentials,
            http: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let url = config
            .queue
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("queue.url is required for SQS".to_string()))?;

        Self::new(
            url.trim(),
            config.queue_region().to_string(),
            config.queue.visibility_timeout_secs,
            config.aws.credentials()?,
        )
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(&self, action: &str, request: &Req) -> Result<Resp> {
        let body = serde_json::to_vec(request)?;
        let target = format!("AmazonSQS.{}", action);
        let signed = sigv4::sign_request_headers(
            "POST",
            &self.endpoint,
            &self.region,
            SERVICE,
            &self.credentials,
            Utc::now(),
            &[("Content-Type", CONTENT_TYPE), ("X-Amz-Target", target.as_str())],
            &body,
        )?;

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", &target);
        for (name, value) in &signed {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("{} request failed: {}", action, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Queue(format!("{} response unreadable: {}", action, e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| format!("{} {}", e.kind, e.message))
                .unwrap_or(text);
            return Err(Error::Queue(format!("{} returned {}: {}", action, status, detail.trim())));
        }

        let text = if text.trim().is_empty() { "{}".to_string() } else { text };
        serde_json::from_str(&text)
            .map_err(|e| Error::Queue(format!("{} response malformed: {}", action, e)))
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn send(&self, message: &ImportMessage) -> Result<()> {
        let request = SendMessageRequest {
            queue_url: &self.queue_url,
            message_body: serde_json::to_string(message)?,
        };
        let _: Ignored = self.call("SendMessage", &request).await?;
        debug!(import_id = %message.import_id, "Import message sent to SQS");
        Ok(())
    }

    async fn receive(&self, max: u32, wait: Duration) -> Result<Vec<QueueMessage>> {
        let request = ReceiveMessageRequest {
            queue_url: &self.queue_url,
            max_number_of_messages: max.clamp(1, 10),
            wait_time_seconds: wait.as_secs().min(20),
            visibility_timeout: self.visibility_timeout_secs,
        };
        let response: ReceiveMessageResponse = self.call("ReceiveMessage", &request).await?;

        Ok(response
            .messages
            .into_iter()
            .map(|m| QueueMessage {
                receipt: m.receipt_handle,
                body: m.body,
            })
            .collect())
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        let request = DeleteMessageRequest {
            queue_url: &self.queue_url,
            receipt_handle: receipt,
        };
        let _: Ignored = self.call("DeleteMessage", &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqsQueue {
        SqsQueue::new(
            "https://sqs.eu-west-1.amazonaws.com/123456789012/imports",
            "eu-west-1".to_string(),
            300,
            Credentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_is_service_root() {
        let q = queue();
        assert_eq!(q.endpoint.as_str(), "https://sqs.eu-west-1.amazonaws.com/");
        assert_eq!(q.queue_url, "https://sqs.eu-west-1.amazonaws.com/123456789012/imports");
    }

    #[test]
    fn test_request_bodies_use_pascal_case() {
        let body = serde_json::to_value(ReceiveMessageRequest {
            queue_url: "u",
            max_number_of_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout: 300,
        })
        .unwrap();
        assert_eq!(body["QueueUrl"], "u");
        assert_eq!(body["MaxNumberOfMessages"], 10);
        assert_eq!(body["WaitTimeSeconds"], 20);
    }

    #[test]
    fn test_receive_response_without_messages() {
        let parsed: ReceiveMessageResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.messages.is_empty());

        let parsed: ReceiveMessageResponse = serde_json::from_str(
            r#"{"Messages":[{"MessageId":"m","ReceiptHandle":"r","Body":"{}","MD5OfBody":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.messages[0].receipt_handle, "r");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = SqsQueue::new("not a url", "us-east-1".into(), 30, queue().credentials.clone());
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
