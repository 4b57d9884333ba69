//! Error taxonomy shared by the stores, the provider adapters and the
//! generation pipeline.
//!
//! Store and provider errors are operational: they describe what went wrong
//! with a file or a remote call. [`FailureReason`] is what a task ends up
//! carrying in its `error` field once the pipeline gives up, so its
//! `Display` output is meant for humans.

use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ProviderKind;

/// Errors raised while reading or writing a JSON snapshot file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by an [`ImageProvider`](crate::provider::ImageProvider).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider refused the initial generation request.
    #[error("{provider} provider rejected the request: {message}")]
    Submission {
        provider: ProviderKind,
        message: String,
    },

    /// Network-level failure (connect, timeout, unreadable body). Retried
    /// while polling.
    #[error("{provider} provider request failed: {message}")]
    Transport {
        provider: ProviderKind,
        message: String,
    },

    /// The provider answered, but in a shape none of the decoders accept.
    #[error("{provider} provider returned an unrecognized response: {message}")]
    UnrecognizedResponse {
        provider: ProviderKind,
        message: String,
    },
}

impl ProviderError {
    /// Only transport failures are worth another poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transport { .. })
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Submission { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::UnrecognizedResponse { provider, .. } => *provider,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Submission { message, .. }
            | ProviderError::Transport { message, .. }
            | ProviderError::UnrecognizedResponse { message, .. } => message,
        }
    }
}

/// Errors raised by an [`ImageFetcher`](crate::ingest::ImageFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("malformed data URL: {0}")]
    DataUrl(String),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by [`ImageIngest`](crate::ingest::ImageIngest).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    /// Fetching or storing image `index` failed; earlier images stay recorded.
    #[error("image {index} ({url}) could not be saved: {message}")]
    DownloadFailed {
        index: usize,
        url: String,
        message: String,
    },

    /// Cancellation was observed between two images.
    #[error("ingest cancelled after {completed} image(s)")]
    Cancelled { completed: usize },
}

/// Why a generation task ended in `failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureReason {
    #[error("{provider} provider rejected the request: {message}")]
    Submission {
        provider: ProviderKind,
        message: String,
    },

    /// The provider itself reported the job as failed.
    #[error("{provider} provider failed to generate: {reason}")]
    Generation {
        provider: ProviderKind,
        reason: String,
    },

    /// The poll budget ran out before the provider reached a terminal state.
    #[error("timed out waiting for the {provider} provider after {attempts} polls")]
    Timeout {
        provider: ProviderKind,
        attempts: u32,
    },

    #[error("{provider} provider returned an unrecognized response: {message}")]
    UnrecognizedResponse {
        provider: ProviderKind,
        message: String,
    },

    #[error("image download failed: {message}")]
    DownloadFailed { message: String },
}

impl From<ProviderError> for FailureReason {
    /// Maps an error raised while submitting; polling errors are handled by
    /// the pipeline's retry loop instead.
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnrecognizedResponse { provider, message } => {
                FailureReason::UnrecognizedResponse { provider, message }
            }
            ProviderError::Submission { provider, message }
            | ProviderError::Transport { provider, message } => {
                FailureReason::Submission { provider, message }
            }
        }
    }
}
