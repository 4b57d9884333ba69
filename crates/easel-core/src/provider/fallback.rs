//! Fallback provider: an OpenAI-style images API with asynchronous tasks.
//!
//! `POST {host}/v1/images/generations` answers `{code: 200, data: [{task_id}]}`.
//! `GET {host}/v1/tasks/{id}` reports `{status, progress, ...}` (optionally in
//! a `data` envelope). The success payload is not stable across models, so
//! [`decode_output`] accepts several shapes in a fixed order.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    FailureCategory, GenerationRequest, ImageProvider, PollResult, ProducedImage, ProviderKind,
    SUBMIT_TIMEOUT, excerpt, first_string, http_client, read_progress,
};
use crate::error::ProviderError;

/// Reference images beyond this count are dropped before submission.
pub const MAX_REFERENCES: usize = 14;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Keys that may hold the output list, in priority order.
const OUTPUT_KEYS: [&str; 3] = ["output", "images", "results"];

const KIND: ProviderKind = ProviderKind::Fallback;

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub struct FallbackProvider {
    config: FallbackConfig,
    http: reqwest::Client,
}

impl FallbackProvider {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config: FallbackConfig {
                host: config.host.trim_end_matches('/').to_owned(),
                ..config
            },
            http: http_client(),
        }
    }

    fn submit_body(&self, request: &GenerationRequest) -> Value {
        // This API has no "auto" ratio.
        let size = match request.aspect_ratio.as_str() {
            "auto" => "1:1",
            other => other,
        };
        let mut body = json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "size": size,
            "resolution": request.image_size,
            "n": 1,
        });
        let references = request.references_up_to(MAX_REFERENCES);
        if !references.is_empty() {
            body["image_urls"] = references.iter().map(|url| json!({ "url": url })).collect();
        }
        body
    }
}

#[async_trait]
impl ImageProvider for FallbackProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let submission_error = |e: reqwest::Error| ProviderError::Submission {
            provider: KIND,
            message: e.to_string(),
        };
        let response: Value = self
            .http
            .post(format!("{}/v1/images/generations", self.config.host))
            .bearer_auth(&self.config.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .json(&self.submit_body(request))
            .send()
            .await
            .map_err(submission_error)?
            .error_for_status()
            .map_err(submission_error)?
            .json()
            .await
            .map_err(submission_error)?;
        parse_submit(&response)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollResult, ProviderError> {
        let transport_error = |e: reqwest::Error| ProviderError::Transport {
            provider: KIND,
            message: e.to_string(),
        };
        let response: Value = self
            .http
            .get(format!("{}/v1/tasks/{remote_id}", self.config.host))
            .bearer_auth(&self.config.api_key)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?
            .json()
            .await
            .map_err(transport_error)?;
        debug!(remote_id, body = %excerpt(&response), "fallback poll response");
        parse_poll(&response)
    }
}

fn parse_submit(response: &Value) -> Result<String, ProviderError> {
    if response.get("code").and_then(Value::as_i64) != Some(200) {
        return Err(ProviderError::Submission {
            provider: KIND,
            message: first_string(response, &["message", "msg"])
                .unwrap_or("fallback request rejected")
                .to_owned(),
        });
    }
    response
        .pointer("/data/0/task_id")
        .and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| ProviderError::UnrecognizedResponse {
            provider: KIND,
            message: format!("submission accepted without a task id: {}", excerpt(response)),
        })
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
        "succeeded" | "completed" | "success" => {
            let images = decode_output(data)
                .ok_or_else(|| ProviderError::UnrecognizedResponse {
                    provider: KIND,
                    message: format!("no image URL in success payload: {}", excerpt(data)),
                })?
                .into_images();
            Ok(PollResult::Succeeded { images })
        }
        "failed" | "error" => {
            let reason = first_string(data, &["failure_reason", "error", "message"])
                .unwrap_or("generation failed");
            let category = if reason.contains("moderation") {
                FailureCategory::Moderation
            } else {
                FailureCategory::Generic
            };
            Ok(PollResult::Failed {
                category,
                reason: reason.to_owned(),
            })
        }
        _ => Ok(PollResult::Running {
            progress: read_progress(data.get("progress")),
        }),
    }
}

/// Shapes a success payload's output list may take, tried top to bottom.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutputShape {
    Urls(Vec<String>),
    Objects(Vec<UrlObject>),
    Single(String),
}

#[derive(Debug, Deserialize)]
struct UrlObject {
    #[serde(alias = "image_url")]
    url: String,
}

/// A decoded success payload.
#[derive(Debug, PartialEq, Eq)]
enum FallbackOutput {
    /// `output` (or `images`/`results`) is a list of URL strings.
    UrlList(Vec<String>),
    /// The list holds objects exposing `url` or `image_url`.
    ObjectList(Vec<String>),
    /// A single URL string under one of the output keys.
    SingleUrl(String),
    /// Nothing under the output keys, but a top-level `url`.
    TopLevelUrl(String),
}

impl FallbackOutput {
    fn into_images(self) -> Vec<ProducedImage> {
        match self {
            FallbackOutput::UrlList(urls) | FallbackOutput::ObjectList(urls) => {
                urls.into_iter().map(ProducedImage::from_url).collect()
            }
            FallbackOutput::SingleUrl(url) | FallbackOutput::TopLevelUrl(url) => {
                vec![ProducedImage::from_url(url)]
            }
        }
    }
}

fn decode_output(data: &Value) -> Option<FallbackOutput> {
    for key in OUTPUT_KEYS {
        let Some(candidate) = data.get(key).filter(|v| !v.is_null()) else {
            continue;
        };
        let decoded = match OutputShape::deserialize(candidate) {
            Ok(OutputShape::Urls(urls)) => non_empty_urls(urls).map(FallbackOutput::UrlList),
            Ok(OutputShape::Objects(objects)) => {
                non_empty_urls(objects.into_iter().map(|o| o.url).collect())
                    .map(FallbackOutput::ObjectList)
            }
            Ok(OutputShape::Single(url)) if !url.trim().is_empty() => {
                Some(FallbackOutput::SingleUrl(url.trim().to_owned()))
            }
            _ => None,
        };
        if decoded.is_some() {
            return decoded;
        }
    }
    first_string(data, &["url"]).map(|url| FallbackOutput::TopLevelUrl(url.to_owned()))
}

fn non_empty_urls(urls: Vec<String>) -> Option<Vec<String>> {
    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty())
        .collect();
    (!urls.is_empty()).then_some(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> FallbackProvider {
        FallbackProvider::new(FallbackConfig {
            host: "https://mart.example".into(),
            api_key: "k".into(),
            model: "gemini-3-pro-image-preview".into(),
        })
    }

    #[test]
    fn auto_ratio_becomes_square_and_references_are_capped() {
        let mut request = GenerationRequest::new("cat");
        request.reference_urls = (0..20).map(|i| format!("https://ref/{i}")).collect();

        let body = provider().submit_body(&request);
        assert_eq!(body["size"], "1:1");
        assert_eq!(body["resolution"], "1K");
        assert_eq!(body["n"], 1);
        let refs = body["image_urls"].as_array().unwrap();
        assert_eq!(refs.len(), MAX_REFERENCES);
        assert_eq!(refs[0], json!({ "url": "https://ref/0" }));
    }

    #[test]
    fn explicit_ratio_is_passed_through() {
        let mut request = GenerationRequest::new("cat");
        request.aspect_ratio = "16:9".into();
        assert_eq!(provider().submit_body(&request)["size"], "16:9");
    }

    #[test]
    fn submit_reads_first_task_id() {
        let id = parse_submit(&json!({ "code": 200, "data": [{ "task_id": "t-1" }] })).unwrap();
        assert_eq!(id, "t-1");
    }

    #[test]
    fn submit_rejection_uses_message() {
        let err = parse_submit(&json!({ "code": 400, "message": "prompt too long" })).unwrap_err();
        assert!(matches!(err, ProviderError::Submission { .. }));
        assert_eq!(err.message(), "prompt too long");
    }

    #[test]
    fn decodes_bare_url_list() {
        let out = decode_output(&json!({ "output": ["https://a", "https://b"] }));
        assert_eq!(
            out,
            Some(FallbackOutput::UrlList(vec!["https://a".into(), "https://b".into()]))
        );
    }

    #[test]
    fn decodes_object_list_under_either_key() {
        let out = decode_output(&json!({
            "images": [{ "url": "https://a" }, { "image_url": "https://b" }]
        }));
        assert_eq!(
            out,
            Some(FallbackOutput::ObjectList(vec!["https://a".into(), "https://b".into()]))
        );
    }

    #[test]
    fn decodes_single_string_output() {
        let out = decode_output(&json!({ "results": "https://only" }));
        assert_eq!(out, Some(FallbackOutput::SingleUrl("https://only".into())));
    }

    #[test]
    fn output_keys_are_tried_in_priority_order() {
        let out = decode_output(&json!({
            "output": ["https://from-output"],
            "images": ["https://from-images"],
        }));
        assert_eq!(out, Some(FallbackOutput::UrlList(vec!["https://from-output".into()])));
    }

    #[test]
    fn empty_output_falls_through_to_top_level_url() {
        let out = decode_output(&json!({ "output": [], "url": "https://top" }));
        assert_eq!(out, Some(FallbackOutput::TopLevelUrl("https://top".into())));
    }

    #[test]
    fn success_without_any_url_is_unrecognized_not_empty() {
        let err = parse_poll(&json!({ "data": { "status": "completed", "output": [] } })).unwrap_err();
        assert!(matches!(err, ProviderError::UnrecognizedResponse { .. }));

        let err = parse_poll(&json!({ "status": "success", "output": [{ "id": 3 }] })).unwrap_err();
        assert!(matches!(err, ProviderError::UnrecognizedResponse { .. }));
    }

    #[test]
    fn success_statuses_are_all_accepted() {
        for status in ["succeeded", "completed", "success"] {
            let poll = parse_poll(&json!({ "status": status, "url": "https://x" })).unwrap();
            assert_eq!(
                poll,
                PollResult::Succeeded {
                    images: vec![ProducedImage::from_url("https://x")]
                }
            );
        }
    }

    #[test]
    fn failure_reason_is_reported() {
        let poll = parse_poll(&json!({ "data": { "status": "failed", "failure_reason": "nsfw_moderation" } })).unwrap();
        assert_eq!(
            poll,
            PollResult::Failed {
                category: FailureCategory::Moderation,
                reason: "nsfw_moderation".into(),
            }
        );

        let poll = parse_poll(&json!({ "status": "error", "message": "backend down" })).unwrap();
        assert_eq!(
            poll,
            PollResult::Failed {
                category: FailureCategory::Generic,
                reason: "backend down".into(),
            }
        );
    }

    #[test]
    fn pending_status_reports_progress() {
        let poll = parse_poll(&json!({ "data": { "status": "processing", "progress": 55 } })).unwrap();
        assert_eq!(poll, PollResult::Running { progress: 55 });
    }
}
