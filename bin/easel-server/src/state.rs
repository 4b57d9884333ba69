//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use easel_core::provider::{DryRunProvider, FallbackProvider, PrimaryProvider};
use easel_core::{
    GalleryStore, HttpFetcher, ImageIngest, ImageProvider, PipelineContext, ProviderKind,
    StoreError, TaskStore,
};
use tracing::{info, warn};

use crate::accounts::{SessionTable, UserStore};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub tasks: TaskStore,
    pub gallery: GalleryStore,
    pub users: UserStore,
    pub sessions: SessionTable,
    /// Collaborators handed to each spawned generation pipeline.
    pub pipeline: PipelineContext,
}

impl AppState {
    /// Open both stores and wire the providers. Tasks left unfinished by a
    /// previous run are failed here.
    pub async fn initialize(config: Config) -> Result<Self, StoreError> {
        let tasks = TaskStore::open(config.tasks_path(), config.task_retention).await?;
        let gallery = GalleryStore::open(config.metadata_path(), config.images_dir()).await?;

        let primary: Arc<dyn ImageProvider> = match config.primary() {
            Some(cfg) => {
                info!(host = %cfg.host, model = %cfg.model, has_key = true, "primary provider configured");
                Arc::new(PrimaryProvider::new(cfg))
            }
            None => {
                warn!("PRIMARY_API_KEY not set; primary slot runs in dry-run mode");
                Arc::new(DryRunProvider::new(ProviderKind::Primary))
            }
        };
        let fallback: Arc<dyn ImageProvider> = match config.fallback() {
            Some(cfg) => {
                info!(host = %cfg.host, model = %cfg.model, has_key = true, "fallback provider configured");
                Arc::new(FallbackProvider::new(cfg))
            }
            None => {
                warn!("FALLBACK_API_KEY not set; fallback slot runs in dry-run mode");
                Arc::new(DryRunProvider::new(ProviderKind::Fallback))
            }
        };

        let ingest = ImageIngest::new(
            Arc::new(HttpFetcher::new(config.download_timeout)),
            gallery.clone(),
        );
        let pipeline = PipelineContext {
            tasks: tasks.clone(),
            primary,
            fallback,
            ingest,
            policy: config.poll_policy(),
        };

        Ok(Self {
            users: UserStore::new(config.users_path()),
            sessions: SessionTable::new(config.sessions_path()),
            config: Arc::new(config),
            tasks,
            gallery,
            pipeline,
        })
    }
}
