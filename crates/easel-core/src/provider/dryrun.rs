//! Offline stand-in used when no API key is configured for a slot.
//!
//! Jobs report 0..=100 progress over successive polls and then finish with a
//! single solid-colour PNG delivered as a `data:` URL, so the whole pipeline
//! (including ingest) can run without network access.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, Rgb, RgbImage};
use uuid::Uuid;

use super::{GenerationRequest, ImageProvider, PollResult, ProducedImage, ProviderKind};
use crate::error::ProviderError;

const DEFAULT_STEPS: u8 = 10;
const IMAGE_EDGE: u32 = 64;
/// Jobs nobody polled to completion (cancelled tasks) are evicted after this.
const JOB_TTL: Duration = Duration::from_secs(15 * 60);

struct DryRunJob {
    prompt: String,
    step: u8,
    submitted: Instant,
}

fn evict_stale(jobs: &mut HashMap<String, DryRunJob>, now: Instant) {
    jobs.retain(|_, job| now.saturating_duration_since(job.submitted) < JOB_TTL);
}

pub struct DryRunProvider {
    kind: ProviderKind,
    steps: u8,
    jobs: Mutex<HashMap<String, DryRunJob>>,
}

impl DryRunProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_steps(kind, DEFAULT_STEPS)
    }

    /// Progress climbs from 0 to 100 in `steps` increments, one per poll,
    /// and the poll after 100 succeeds.
    pub fn with_steps(kind: ProviderKind, steps: u8) -> Self {
        Self {
            kind,
            steps: steps.clamp(1, 100),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn render(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        let [r, g, b, ..] = hasher.finish().to_le_bytes();

        let canvas = RgbImage::from_pixel(IMAGE_EDGE, IMAGE_EDGE, Rgb([r, g, b]));
        let mut png = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ProviderError::UnrecognizedResponse {
                provider: self.kind,
                message: format!("dry-run render failed: {e}"),
            })?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
    }
}

#[async_trait]
impl ImageProvider for DryRunProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let id = format!("dryrun-{}", Uuid::new_v4().simple());
        let mut jobs = self.jobs.lock().map_err(|_| ProviderError::Submission {
            provider: self.kind,
            message: "dry-run job table poisoned".into(),
        })?;
        let now = Instant::now();
        evict_stale(&mut jobs, now);
        jobs.insert(
            id.clone(),
            DryRunJob {
                prompt: request.prompt.clone(),
                step: 0,
                submitted: now,
            },
        );
        Ok(id)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollResult, ProviderError> {
        let unknown = || ProviderError::UnrecognizedResponse {
            provider: self.kind,
            message: format!("unknown dry-run job {remote_id}"),
        };
        let (step, prompt) = {
            let mut jobs = self.jobs.lock().map_err(|_| unknown())?;
            let job = jobs.get_mut(remote_id).ok_or_else(unknown)?;
            job.step = job.step.saturating_add(1);
            (job.step, job.prompt.clone())
        };

        if step <= self.steps + 1 {
            let progress = (u32::from(step - 1) * 100 / u32::from(self.steps)) as u8;
            return Ok(PollResult::Running { progress });
        }

        let url = self.render(&prompt)?;
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.remove(remote_id);
        }
        Ok(PollResult::Succeeded {
            images: vec![ProducedImage {
                url,
                content: Some(prompt),
            }],
        })
    }
}
