//! Generation provider adapters.
//!
//! Every backend speaks its own wire format. Adapters translate it into one
//! vocabulary: [`ImageProvider::submit`] hands back the provider's job id and
//! [`ImageProvider::poll`] reports a [`PollResult`]. The pipeline only ever
//! sees that vocabulary.

mod dryrun;
mod fallback;
mod primary;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ProviderError;

pub use dryrun::DryRunProvider;
pub use fallback::{FallbackConfig, FallbackProvider};
pub use primary::{PrimaryConfig, PrimaryProvider};

pub const DEFAULT_ASPECT_RATIO: &str = "auto";
pub const DEFAULT_IMAGE_SIZE: &str = "1K";

/// Timeout for the initial generation request.
pub(crate) const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Which slot a provider occupies in the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Primary,
    Fallback,
}

/// Parameters of one generation request, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default)]
    pub reference_urls: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: default_aspect_ratio(),
            image_size: default_image_size(),
            reference_urls: Vec::new(),
        }
    }

    /// The reference URLs a provider accepts; anything past `cap` is dropped.
    pub fn references_up_to(&self, cap: usize) -> &[String] {
        &self.reference_urls[..self.reference_urls.len().min(cap)]
    }
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_owned()
}

fn default_image_size() -> String {
    DEFAULT_IMAGE_SIZE.to_owned()
}

/// One image produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedImage {
    pub url: String,
    /// Inline text the provider attached to the image, if any.
    pub content: Option<String>,
}

impl ProducedImage {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: None,
        }
    }
}

/// Classification of a provider-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureCategory {
    /// Input or output was blocked by the provider's safety filter. The only
    /// category that sends a task to the fallback provider.
    Moderation,
    Generic,
    /// The provider reported a bare `error` status. Polling continues against
    /// the same attempt budget.
    ProviderFlake,
}

/// Normalized answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// Still working; progress on the provider's own 0..=100 scale.
    Running { progress: u8 },
    /// Finished. Adapters never report success with an empty image list.
    Succeeded { images: Vec<ProducedImage> },
    Failed {
        category: FailureCategory,
        reason: String,
    },
}

/// A remote image-generation backend.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Start a generation job and return the provider-assigned job id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    /// Query the current state of a job started by [`submit`](Self::submit).
    async fn poll(&self, remote_id: &str) -> Result<PollResult, ProviderError>;
}

/// Shared HTTP client with a descriptive user agent.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("easel/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Read a provider progress field, tolerating numbers and numeric strings.
pub(crate) fn read_progress(value: Option<&serde_json::Value>) -> u8 {
    let raw = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    raw.clamp(0.0, 100.0).round() as u8
}

/// First non-empty string among `keys` in `obj`.
pub(crate) fn first_string<'a>(obj: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Shorten a response body for inclusion in an error message.
pub(crate) fn excerpt(value: &serde_json::Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(300) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn references_are_truncated_not_rejected() {
        let mut request = GenerationRequest::new("cat");
        request.reference_urls = (0..25).map(|i| format!("https://ref/{i}")).collect();

        assert_eq!(request.references_up_to(20).len(), 20);
        assert_eq!(request.references_up_to(14).len(), 14);
        assert_eq!(request.references_up_to(14)[13], "https://ref/13");
        assert_eq!(request.references_up_to(100).len(), 25);
    }

    #[test]
    fn request_defaults_apply_when_fields_are_missing() {
        let request: GenerationRequest = serde_json::from_value(json!({ "prompt": "dog" })).unwrap();
        assert_eq!(request.aspect_ratio, "auto");
        assert_eq!(request.image_size, "1K");
        assert!(request.reference_urls.is_empty());
    }

    #[test]
    fn progress_is_clamped_and_parsed() {
        assert_eq!(read_progress(Some(&json!(42))), 42);
        assert_eq!(read_progress(Some(&json!(180))), 100);
        assert_eq!(read_progress(Some(&json!(-3))), 0);
        assert_eq!(read_progress(Some(&json!("67%"))), 67);
        assert_eq!(read_progress(Some(&json!(null))), 0);
        assert_eq!(read_progress(None), 0);
    }

    #[test]
    fn provider_kind_round_trips_through_strum() {
        assert_eq!(ProviderKind::Fallback.to_string(), "fallback");
        assert_eq!("primary".parse::<ProviderKind>().unwrap(), ProviderKind::Primary);
    }
}
