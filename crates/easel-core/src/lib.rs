//! Task orchestration for image generation.
//!
//! A request becomes a [`Task`] in the [`TaskStore`]. A [`GenerationPipeline`]
//! submits it to the primary provider, polls until it finishes, retries once
//! on the fallback provider after a moderation failure, and hands the produced
//! images to [`ImageIngest`], which saves them into the [`GalleryStore`].

pub mod error;
pub mod gallery;
pub mod ingest;
pub mod pipeline;
pub mod provider;
pub mod snapshot;
pub mod task;

pub use error::{FailureReason, FetchError, IngestError, ProviderError, StoreError};
pub use gallery::{GalleryStore, ImageRecord};
pub use ingest::{HttpFetcher, ImageFetcher, ImageIngest};
pub use pipeline::{CancelToken, GenerationPipeline, Outcome, PipelineContext, PollPolicy};
pub use provider::{GenerationRequest, ImageProvider, PollResult, ProducedImage, ProviderKind};
pub use snapshot::SnapshotFile;
pub use task::{Task, TaskOutput, TaskPatch, TaskStatus, TaskStore};
