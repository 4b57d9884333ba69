//! Gallery log: one [`ImageRecord`] per image saved to local storage.
//!
//! Records are kept newest first, both in memory and in `metadata.json`.
//! They outlive the task that produced them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::provider::{DEFAULT_ASPECT_RATIO, DEFAULT_IMAGE_SIZE, ProviderKind};
use crate::snapshot::SnapshotFile;
use crate::task::ANONYMOUS_OWNER;

/// URL prefix under which the images directory is served.
pub const PUBLIC_IMAGE_PREFIX: &str = "/storage/images";

/// Prompt given to records rebuilt by [`GalleryStore::reconcile`].
pub const RECOVERED_PROMPT: &str = "(recovered)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    #[serde(default = "anonymous_owner")]
    pub username: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    /// Unknown for records rebuilt from files on disk.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub remote_url: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

fn anonymous_owner() -> String {
    ANONYMOUS_OWNER.to_owned()
}

/// Id for the `index`-th image of the batch started at `batch_time`.
pub fn new_image_id(batch_time: DateTime<Utc>, index: usize) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}_{index}_{}", batch_time.timestamp_millis(), &salt[..6])
}

pub fn public_url(filename: &str) -> String {
    format!("{PUBLIC_IMAGE_PREFIX}/{filename}")
}

#[derive(Clone)]
pub struct GalleryStore {
    records: Arc<Mutex<Vec<ImageRecord>>>,
    file: Arc<SnapshotFile>,
    images_dir: Arc<PathBuf>,
}

impl GalleryStore {
    pub async fn open(
        metadata_path: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let file = SnapshotFile::new(metadata_path);
        let images_dir = images_dir.into();
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|source| StoreError::Io {
                path: images_dir.clone(),
                source,
            })?;

        let records: Vec<ImageRecord> = match file.load().await {
            Ok(records) => records,
            Err(err @ StoreError::Json { .. }) => {
                warn!(error = %err, "ignoring unreadable gallery metadata");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        info!(
            path = %file.path().display(),
            records = records.len(),
            "gallery opened"
        );

        Ok(Self {
            records: Arc::new(Mutex::new(records)),
            file: Arc::new(file),
            images_dir: Arc::new(images_dir),
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Location of `filename` inside the images directory.
    pub fn image_path(&self, filename: &str) -> PathBuf {
        self.images_dir.join(filename)
    }

    /// Write image bytes under `filename`, returning the full path.
    pub async fn write_image(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.image_path(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Put `record` at the head of the log and flush the log to disk.
    /// The record is dropped again if the flush fails.
    pub async fn append(&self, record: ImageRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let image_id = record.id.clone();
        records.insert(0, record);
        if let Err(err) = self.file.save(records.as_slice()).await {
            records.remove(0);
            return Err(err);
        }
        debug!(%image_id, "gallery record appended");
        Ok(())
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<ImageRecord> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ImageRecord> {
        self.records.lock().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Remove record `id` and its backing file. A file that is already gone
    /// is not an error. Returns the removed record.
    pub async fn delete(&self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let record = records.remove(index);

        let path = self.image_path(&record.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "image file already removed");
            }
            Err(source) => {
                records.insert(index, record);
                return Err(StoreError::Io { path, source });
            }
        }

        self.file.save(records.as_slice()).await?;
        Ok(Some(record))
    }

    /// Add placeholder records for `*.png` files in the images directory that
    /// have no record, then rewrite the log newest first. Returns how many
    /// records were added.
    pub async fn reconcile(&self) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let known: HashSet<String> = records.iter().map(|r| r.filename.clone()).collect();

        let io_err = |source| StoreError::Io {
            path: self.images_dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&*self.images_dir).await.map_err(io_err)?;
        let mut recovered = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let (Some(filename), Some(stem)) = (
                path.file_name().and_then(|n| n.to_str()),
                path.file_stem().and_then(|n| n.to_str()),
            ) else {
                continue;
            };
            if known.contains(filename) {
                continue;
            }

            let created_at = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            recovered.push(ImageRecord {
                id: stem.to_owned(),
                username: anonymous_owner(),
                prompt: RECOVERED_PROMPT.to_owned(),
                aspect_ratio: DEFAULT_ASPECT_RATIO.to_owned(),
                image_size: DEFAULT_IMAGE_SIZE.to_owned(),
                reference_urls: Vec::new(),
                provider: None,
                filename: filename.to_owned(),
                url: public_url(filename),
                remote_url: String::new(),
                created_at,
            });
        }

        let added = recovered.len();
        if added == 0 {
            return Ok(0);
        }
        records.extend(recovered);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.file.save(records.as_slice()).await?;
        info!(added, total = records.len(), "gallery reconciled");
        Ok(added)
    }
}
