//! REST client for an Azure-style Document Intelligence endpoint.
//!
//! Both operations follow the same long-running pattern: POST the document,
//! read the `Operation-Location` header, then poll that URL until the
//! operation reports `succeeded` or `failed`.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use super::DocumentIntelligence;
use crate::config::CapabilityConfig;
use crate::error::{CapabilityError, ResponseDetail};
use crate::sanitize::{redact_url, truncate_body};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Uploads of large scans can be slow.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Classify,
    Analyze,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Classify => "classify",
            Operation::Analyze => "analyze",
        }
    }

    fn collection(&self) -> &'static str {
        match self {
            Operation::Classify => "documentClassifiers",
            Operation::Analyze => "documentModels",
        }
    }
}

/// Body returned by the operation status URL.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, PartialEq)]
enum PollState {
    Running,
    Succeeded(Value),
    Failed { status: String, error: Option<Value> },
}

fn poll_state(operation: Operation, body: OperationStatus) -> Result<PollState, CapabilityError> {
    match body.status.to_ascii_lowercase().as_str() {
        "notstarted" | "running" => Ok(PollState::Running),
        "succeeded" => body
            .analyze_result
            .map(PollState::Succeeded)
            .ok_or_else(|| CapabilityError::InvalidResult {
                operation: operation.name().to_string(),
                message: "succeeded without analyzeResult".to_string(),
            }),
        _ => Ok(PollState::Failed {
            status: body.status,
            error: body.error,
        }),
    }
}

/// Parses a `Retry-After` value given in seconds.
fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn retry_after(response: &Response) -> Option<Duration> {
    parse_retry_after(
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok()),
    )
}

fn create_http_client() -> Result<Client, CapabilityError> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| CapabilityError::Request {
            operation: "client".to_string(),
            message: format!("Failed to create HTTP client: {}", e),
        })
}

async fn response_error(operation: Operation, response: Response) -> CapabilityError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CapabilityError::Response {
        operation: operation.name().to_string(),
        detail: ResponseDetail {
            status,
            body: truncate_body(&body),
        },
    }
}

fn request_error(operation: Operation, error: reqwest::Error) -> CapabilityError {
    CapabilityError::Request {
        operation: operation.name().to_string(),
        message: error.to_string(),
    }
}

pub struct DocumentIntelligenceClient {
    client: Client,
    endpoint: String,
    api_version: String,
    key: SecretString,
    poll_interval: Duration,
}

impl DocumentIntelligenceClient {
    pub fn new(
        endpoint: &str,
        key: SecretString,
        api_version: &str,
        poll_interval: Duration,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            client: create_http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            key,
            poll_interval,
        })
    }

    /// Builds a client from configuration, resolving the endpoint and key.
    pub fn from_config(config: &CapabilityConfig) -> crate::error::Result<Self> {
        let endpoint = config.require_endpoint()?;
        let key = config.key.resolve("capability.key")?;
        Ok(Self::new(
            endpoint,
            key,
            &config.api_version,
            Duration::from_millis(config.poll_interval_ms),
        )?)
    }

    fn submit_url(&self, operation: Operation, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/{}/{}:analyze?api-version={}",
            self.endpoint,
            operation.collection(),
            model_id,
            self.api_version
        )
    }

    async fn run(
        &self,
        operation: Operation,
        model_id: &str,
        document: &[u8],
    ) -> Result<Value, CapabilityError> {
        let url = self.submit_url(operation, model_id);
        debug!(
            "Submitting {} bytes for {} to {}",
            document.len(),
            operation.name(),
            redact_url(&url)
        );

        let response = self
            .client
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, self.key.expose_secret())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| request_error(operation, e))?;

        if !response.status().is_success() {
            return Err(response_error(operation, response).await);
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CapabilityError::MissingOperationLocation {
                operation: operation.name().to_string(),
            })?;

        let delay = retry_after(&response).unwrap_or(self.poll_interval);
        self.poll(operation, &location, delay).await
    }

    async fn poll(
        &self,
        operation: Operation,
        location: &str,
        mut delay: Duration,
    ) -> Result<Value, CapabilityError> {
        let mut attempts: u32 = 0;

        loop {
            tokio::time::sleep(delay).await;
            attempts += 1;

            let response = self
                .client
                .get(location)
                .header(SUBSCRIPTION_KEY_HEADER, self.key.expose_secret())
                .send()
                .await
                .map_err(|e| request_error(operation, e))?;

            let status = response.status();
            delay = retry_after(&response).unwrap_or(self.poll_interval);

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "{} poll throttled, retrying in {:?}",
                    operation.name(),
                    delay
                );
                continue;
            }
            if !status.is_success() {
                return Err(response_error(operation, response).await);
            }

            let body: OperationStatus =
                response
                    .json()
                    .await
                    .map_err(|e| CapabilityError::InvalidResult {
                        operation: operation.name().to_string(),
                        message: format!("unreadable status body: {}", e),
                    })?;

            match poll_state(operation, body)? {
                PollState::Running => {
                    debug!(
                        "{} still running after {} poll(s)",
                        operation.name(),
                        attempts
                    );
                }
                PollState::Succeeded(result) => {
                    info!(
                        "{} finished after {} poll(s)",
                        operation.name(),
                        attempts
                    );
                    return Ok(result);
                }
                PollState::Failed { status: state, error } => {
                    return Err(CapabilityError::OperationFailed {
                        operation: operation.name().to_string(),
                        status: state,
                        detail: Some(ResponseDetail {
                            status: status.as_u16(),
                            body: truncate_body(
                                &error.map(|e| e.to_string()).unwrap_or_default(),
                            ),
                        }),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl DocumentIntelligence for DocumentIntelligenceClient {
    async fn classify(&self, model_id: &str, document: &[u8]) -> Result<Value, CapabilityError> {
        self.run(Operation::Classify, model_id, document).await
    }

    async fn analyze(&self, model_id: &str, document: &[u8]) -> Result<Value, CapabilityError> {
        self.run(Operation::Analyze, model_id, document).await
    }
}
