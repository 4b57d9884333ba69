//! Per-task generation pipeline.
//!
//! ```text
//! pending -> running (primary) -> succeeded
//!                              -> running_fallback -> succeeded | failed
//!                              -> failed
//! running | running_fallback   -> cancelled
//! ```
//!
//! Only a moderation failure from the primary provider moves a task to the
//! fallback provider. The pipeline never touches a [`Task`] directly; every
//! change goes through [`TaskStore::update`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{FailureReason, IngestError};
use crate::ingest::ImageIngest;
use crate::provider::{FailureCategory, ImageProvider, PollResult, ProducedImage, ProviderKind};
use crate::task::{Task, TaskOutput, TaskPatch, TaskStatus, TaskStore};

/// Progress once the task has been accepted locally.
pub const PROGRESS_ACCEPTED: u8 = 10;
/// Progress once a provider has acknowledged the submission.
pub const PROGRESS_SUBMITTED: u8 = 15;
/// Progress once a provider reports success; the rest is reserved for ingest.
pub const PROGRESS_GENERATED: u8 = 95;

/// Map a provider's 0..=100 progress into the 15..=95 band.
pub fn scale_progress(provider_progress: u8) -> u8 {
    let p = f32::from(provider_progress.min(100));
    let span = f32::from(PROGRESS_GENERATED - PROGRESS_SUBMITTED);
    PROGRESS_SUBMITTED + (p / 100.0 * span).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// Cooperative cancellation signal for one task, backed by its stored status.
#[derive(Clone)]
pub struct CancelToken {
    tasks: TaskStore,
    task_id: Arc<str>,
}

impl CancelToken {
    pub fn new(tasks: TaskStore, task_id: impl Into<String>) -> Self {
        Self {
            tasks,
            task_id: Arc::from(task_id.into()),
        }
    }

    pub async fn is_cancelled(&self) -> bool {
        self.tasks.is_cancelled(&self.task_id).await
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(TaskOutput),
    Failed(FailureReason),
    Cancelled,
}

/// Shared collaborators handed to every pipeline.
#[derive(Clone)]
pub struct PipelineContext {
    pub tasks: TaskStore,
    pub primary: Arc<dyn ImageProvider>,
    pub fallback: Arc<dyn ImageProvider>,
    pub ingest: ImageIngest,
    pub policy: PollPolicy,
}

impl PipelineContext {
    /// Run the pipeline for `task` in the background.
    pub fn spawn(&self, task: Task) -> JoinHandle<Outcome> {
        let span = info_span!("generation", task_id = %task.id);
        let pipeline = GenerationPipeline::new(self.clone(), task);
        tokio::spawn(pipeline.run().instrument(span))
    }
}

enum Stage {
    Succeeded(Vec<ProducedImage>),
    Moderated(String),
    Failed(FailureReason),
    Cancelled,
}

pub struct GenerationPipeline {
    ctx: PipelineContext,
    task: Task,
    cancel: CancelToken,
}

impl GenerationPipeline {
    pub fn new(ctx: PipelineContext, task: Task) -> Self {
        let cancel = CancelToken::new(ctx.tasks.clone(), task.id.clone());
        Self { ctx, task, cancel }
    }

    pub async fn run(self) -> Outcome {
        let outcome = self.drive().await;
        self.finalize(outcome).await
    }

    async fn drive(&self) -> Outcome {
        if self.cancel.is_cancelled().await {
            return Outcome::Cancelled;
        }
        self.transition(TaskStatus::Running, PROGRESS_ACCEPTED).await;

        let primary = Arc::clone(&self.ctx.primary);
        match self.stage(primary.as_ref()).await {
            Stage::Succeeded(images) => self.ingest(primary.kind(), images).await,
            Stage::Failed(reason) => Outcome::Failed(reason),
            Stage::Cancelled => Outcome::Cancelled,
            Stage::Moderated(reason) => {
                if self.cancel.is_cancelled().await {
                    return Outcome::Cancelled;
                }
                info!(%reason, "primary output moderated, switching to fallback");
                self.transition(TaskStatus::RunningFallback, PROGRESS_SUBMITTED)
                    .await;

                let fallback = Arc::clone(&self.ctx.fallback);
                match self.stage(fallback.as_ref()).await {
                    Stage::Succeeded(images) => self.ingest(fallback.kind(), images).await,
                    Stage::Moderated(reason) => Outcome::Failed(FailureReason::Generation {
                        provider: fallback.kind(),
                        reason,
                    }),
                    Stage::Failed(reason) => Outcome::Failed(reason),
                    Stage::Cancelled => Outcome::Cancelled,
                }
            }
        }
    }

    /// Submit to `provider` and poll until it finishes, fails, the attempt
    /// budget runs out, or the task is cancelled.
    async fn stage(&self, provider: &dyn ImageProvider) -> Stage {
        let kind = provider.kind();
        let remote_id = match provider.submit(&self.task.request).await {
            Ok(id) => id,
            Err(err) => {
                warn!(provider = %kind, error = %err, "submission failed");
                return Stage::Failed(err.into());
            }
        };
        info!(provider = %kind, %remote_id, "generation submitted");
        self.report(PROGRESS_SUBMITTED).await;

        let policy = self.ctx.policy;
        for attempt in 1..=policy.max_attempts {
            if self.cancel.is_cancelled().await {
                return Stage::Cancelled;
            }
            tokio::time::sleep(policy.interval).await;
            if self.cancel.is_cancelled().await {
                return Stage::Cancelled;
            }

            match provider.poll(&remote_id).await {
                Ok(PollResult::Running { progress }) => {
                    debug!(provider = %kind, attempt, progress, "generation running");
                    self.report(scale_progress(progress)).await;
                }
                Ok(PollResult::Succeeded { images }) if images.is_empty() => {
                    return Stage::Failed(FailureReason::UnrecognizedResponse {
                        provider: kind,
                        message: "provider reported success without images".into(),
                    });
                }
                Ok(PollResult::Succeeded { images }) => {
                    info!(provider = %kind, attempt, images = images.len(), "generation finished");
                    self.report(PROGRESS_GENERATED).await;
                    return Stage::Succeeded(images);
                }
                Ok(PollResult::Failed {
                    category: FailureCategory::ProviderFlake,
                    reason,
                }) if kind == ProviderKind::Primary => {
                    warn!(provider = %kind, attempt, %reason, "provider reported a bare error, polling again");
                }
                Ok(PollResult::Failed {
                    category: FailureCategory::Moderation,
                    reason,
                }) => return Stage::Moderated(reason),
                Ok(PollResult::Failed { reason, .. }) => {
                    warn!(provider = %kind, attempt, %reason, "generation failed");
                    return Stage::Failed(FailureReason::Generation {
                        provider: kind,
                        reason,
                    });
                }
                Err(err) if err.is_transient() => {
                    warn!(provider = %kind, attempt, error = %err, "poll failed, retrying");
                }
                Err(err) => {
                    warn!(provider = %kind, attempt, error = %err, "poll response rejected");
                    return Stage::Failed(err.into());
                }
            }
        }

        warn!(provider = %kind, attempts = policy.max_attempts, "poll budget exhausted");
        Stage::Failed(FailureReason::Timeout {
            provider: kind,
            attempts: policy.max_attempts,
        })
    }

    async fn ingest(&self, provider: ProviderKind, images: Vec<ProducedImage>) -> Outcome {
        match self
            .ctx
            .ingest
            .ingest(&self.task, provider, &images, &self.cancel)
            .await
        {
            Ok(records) => Outcome::Succeeded(TaskOutput {
                images: records,
                provider,
            }),
            Err(IngestError::Cancelled { completed }) => {
                info!(completed, "cancelled during ingest");
                Outcome::Cancelled
            }
            Err(err @ IngestError::DownloadFailed { .. }) => {
                Outcome::Failed(FailureReason::DownloadFailed {
                    message: err.to_string(),
                })
            }
        }
    }

    async fn finalize(&self, outcome: Outcome) -> Outcome {
        let patch = match &outcome {
            Outcome::Succeeded(output) => TaskPatch::succeeded(output.clone()),
            Outcome::Failed(reason) => TaskPatch::failed(reason.to_string()),
            Outcome::Cancelled => TaskPatch::status(TaskStatus::Cancelled),
        };
        match self.ctx.tasks.update(&self.task.id, patch).await {
            Some(task) => info!(status = %task.status, "task finished"),
            None => info!("task removed before it finished"),
        }
        outcome
    }

    async fn transition(&self, status: TaskStatus, progress: u8) {
        self.ctx
            .tasks
            .update(&self.task.id, TaskPatch::status(status).with_progress(progress))
            .await;
    }

    async fn report(&self, progress: u8) {
        self.ctx
            .tasks
            .update(&self.task.id, TaskPatch::progress(progress))
            .await;
    }
}
