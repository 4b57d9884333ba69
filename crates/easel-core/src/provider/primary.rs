//! Primary provider: the nano-banana draw API.
//!
//! `POST {host}/v1/draw/nano-banana` starts a job and answers
//! `{code, msg, data: {id}}` with `code == 0` on acceptance.
//! `POST {host}/v1/draw/result` with `{id}` reports
//! `{status, progress, results: [{url, content}], failure_reason, error}`,
//! optionally wrapped in a `data` envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    FailureCategory, GenerationRequest, ImageProvider, PollResult, ProducedImage, ProviderKind,
    SUBMIT_TIMEOUT, excerpt, first_string, http_client, read_progress,
};
use crate::error::ProviderError;

/// Reference images beyond this count are dropped before submission.
pub const MAX_REFERENCES: usize = 20;

const POLL_TIMEOUT: Duration = Duration::from_secs(30);

const KIND: ProviderKind = ProviderKind::Primary;

#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub struct PrimaryProvider {
    config: PrimaryConfig,
    http: reqwest::Client,
}

impl PrimaryProvider {
    pub fn new(config: PrimaryConfig) -> Self {
        Self {
            config: PrimaryConfig {
                host: config.host.trim_end_matches('/').to_owned(),
                ..config
            },
            http: http_client(),
        }
    }

    fn submit_body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "aspectRatio": request.aspect_ratio,
            "imageSize": request.image_size,
            "webHook": "-1",
        });
        let references = request.references_up_to(MAX_REFERENCES);
        if !references.is_empty() {
            body["urls"] = json!(references);
        }
        body
    }

    async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> reqwest::Result<Value> {
        self.http
            .post(format!("{}{path}", self.config.host))
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl ImageProvider for PrimaryProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let body = self.submit_body(request);
        let response = self
            .post_json("/v1/draw/nano-banana", &body, SUBMIT_TIMEOUT)
            .await
            .map_err(|e| ProviderError::Submission {
                provider: KIND,
                message: e.to_string(),
            })?;
        parse_submit(&response)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollResult, ProviderError> {
        let response = self
            .post_json("/v1/draw/result", &json!({ "id": remote_id }), POLL_TIMEOUT)
            .await
            .map_err(|e| ProviderError::Transport {
                provider: KIND,
                message: e.to_string(),
            })?;
        debug!(remote_id, body = %excerpt(&response), "primary poll response");
        parse_poll(&response)
    }
}

fn parse_submit(response: &Value) -> Result<String, ProviderError> {
    let code = response.get("code").and_then(Value::as_i64);
    if code != Some(0) {
        return Err(ProviderError::Submission {
            provider: KIND,
            message: first_string(response, &["msg", "message"])
                .unwrap_or("generation request rejected")
                .to_owned(),
        });
    }
    let data = &response["data"];
    match data.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ProviderError::UnrecognizedResponse {
            provider: KIND,
            message: format!("submission accepted without a job id: {}", excerpt(response)),
        }),
    }
}

fn parse_poll(response: &Value) -> Result<PollResult, ProviderError> {
    let data = match response.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => response,
    };
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match status.as_str() {
        "succeeded" => {
            let images: Vec<ProducedImage> = data
                .get("results")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| {
                            let url = first_string(row, &["url"])?;
                            Some(ProducedImage {
                                url: url.to_owned(),
                                content: first_string(row, &["content"]).map(str::to_owned),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            if images.is_empty() {
                return Err(ProviderError::UnrecognizedResponse {
                    provider: KIND,
                    message: format!("succeeded without image results: {}", excerpt(data)),
                });
            }
            Ok(PollResult::Succeeded { images })
        }
        "failed" => {
            let reason = first_string(data, &["failure_reason", "error"]).unwrap_or("generation failed");
            Ok(PollResult::Failed {
                category: classify_failure(reason),
                reason: reason.to_owned(),
            })
        }
        _ => Ok(PollResult::Running {
            progress: read_progress(data.get("progress")),
        }),
    }
}

fn classify_failure(reason: &str) -> FailureCategory {
    match reason {
        "input_moderation" | "output_moderation" => FailureCategory::Moderation,
        "error" => FailureCategory::ProviderFlake,
        _ => FailureCategory::Generic,
    }
}
