//! Saving provider output into the local gallery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{FetchError, IngestError};
use crate::gallery::{GalleryStore, ImageRecord, new_image_id, public_url};
use crate::pipeline::CancelToken;
use crate::provider::{ProducedImage, ProviderKind};
use crate::task::Task;

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of remote image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// [`ImageFetcher`] over HTTP with a bounded per-download timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("easel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_TIMEOUT)
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

/// Decode an inline `data:[<mime>][;base64],<payload>` URL.
fn decode_data_url(url: &str) -> Result<Bytes, FetchError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DataUrl("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::DataUrl("missing payload separator".into()))?;
    if !meta.ends_with(";base64") {
        return Err(FetchError::DataUrl("only base64 payloads are supported".into()));
    }
    BASE64
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| FetchError::DataUrl(e.to_string()))
}

/// Downloads produced images one at a time, writing each file and its gallery
/// record before starting the next.
#[derive(Clone)]
pub struct ImageIngest {
    fetcher: Arc<dyn ImageFetcher>,
    gallery: GalleryStore,
}

impl ImageIngest {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, gallery: GalleryStore) -> Self {
        Self { fetcher, gallery }
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    /// Save `images` for `task` in order.
    ///
    /// Stops at the first failure or when `cancel` fires between images.
    /// Images saved before the stop stay on disk and in the gallery.
    pub async fn ingest(
        &self,
        task: &Task,
        provider: ProviderKind,
        images: &[ProducedImage],
        cancel: &CancelToken,
    ) -> Result<Vec<ImageRecord>, IngestError> {
        let batch_time = Utc::now();
        let mut saved = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            if cancel.is_cancelled().await {
                return Err(IngestError::Cancelled {
                    completed: saved.len(),
                });
            }

            let fail = |message: String| {
                warn!(task_id = %task.id, index, %message, "image ingest failed");
                IngestError::DownloadFailed {
                    index,
                    url: display_url(&image.url),
                    message,
                }
            };

            if image.url.trim().is_empty() {
                return Err(fail("provider returned an empty image URL".into()));
            }
            let bytes = self.fetch(&image.url).await.map_err(|e| fail(e.to_string()))?;

            let id = new_image_id(batch_time, index);
            let filename = format!("{id}.png");
            self.gallery
                .write_image(&filename, &bytes)
                .await
                .map_err(|e| fail(e.to_string()))?;

            let record = ImageRecord {
                id,
                username: task.username.clone(),
                prompt: task.request.prompt.clone(),
                aspect_ratio: task.request.aspect_ratio.clone(),
                image_size: task.request.image_size.clone(),
                reference_urls: task.request.reference_urls.clone(),
                provider: Some(provider),
                url: public_url(&filename),
                filename,
                remote_url: image.url.clone(),
                created_at: Utc::now(),
            };
            self.gallery
                .append(record.clone())
                .await
                .map_err(|e| fail(e.to_string()))?;

            info!(
                task_id = %task.id,
                index,
                filename = %record.filename,
                bytes = bytes.len(),
                "image saved"
            );
            saved.push(record);
        }
        Ok(saved)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if url.starts_with("data:") {
            debug!("decoding inline image");
            return decode_data_url(url);
        }
        self.fetcher.fetch(url).await
    }
}

/// Inline data URLs are shortened in errors and logs.
fn display_url(url: &str) -> String {
    if url.starts_with("data:") {
        let head: String = url.chars().take(32).collect();
        format!("{head}…")
    } else {
        url.to_owned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::provider::GenerationRequest;
    use crate::task::{DEFAULT_RETENTION, TaskStore};
    use tempfile::TempDir;

    /// Serves canned bytes per URL; anything else fails like a timeout.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub(crate) bodies: HashMap<String, Bytes>,
    }

    impl FakeFetcher {
        pub(crate) fn serving(urls: &[&str]) -> Self {
            Self {
                bodies: urls
                    .iter()
                    .map(|u| ((*u).to_owned(), Bytes::from(format!("bytes of {u}"))))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Other(format!("timed out fetching {url}")))
        }
    }

    struct Fixture {
        _dir: TempDir,
        tasks: TaskStore,
        ingest: ImageIngest,
        task: Task,
    }

    async fn fixture(fetcher: FakeFetcher) -> Fixture {
        let dir = TempDir::new().unwrap();
        let tasks = TaskStore::open(dir.path().join("tasks.json"), DEFAULT_RETENTION)
            .await
            .unwrap();
        let gallery = GalleryStore::open(dir.path().join("metadata.json"), dir.path().join("images"))
            .await
            .unwrap();
        let mut request = GenerationRequest::new("cat");
        request.aspect_ratio = "1:1".into();
        let task = tasks.create("t1", "alice", request).await;
        Fixture {
            _dir: dir,
            ingest: ImageIngest::new(Arc::new(fetcher), gallery),
            tasks,
            task,
        }
    }

    #[tokio::test]
    async fn saves_every_image_in_order() {
        let f = fixture(FakeFetcher::serving(&["https://cdn/a", "https://cdn/b"])).await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");
        let images = [
            ProducedImage::from_url("https://cdn/a"),
            ProducedImage::from_url("https://cdn/b"),
        ];

        let records = f
            .ingest
            .ingest(&f.task, ProviderKind::Primary, &images, &cancel)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].remote_url, "https://cdn/a");
        assert_eq!(records[1].remote_url, "https://cdn/b");
        assert_eq!(records[0].username, "alice");
        assert_eq!(records[0].aspect_ratio, "1:1");
        assert_eq!(records[0].provider, Some(ProviderKind::Primary));
        let on_disk = std::fs::read(f.ingest.gallery().image_path(&records[1].filename)).unwrap();
        assert_eq!(on_disk, b"bytes of https://cdn/b");
        assert_eq!(f.ingest.gallery().len().await, 2);
    }

    #[tokio::test]
    async fn batch_images_share_an_id_prefix() {
        let urls = ["https://cdn/a", "https://cdn/b", "https://cdn/c"];
        let f = fixture(FakeFetcher::serving(&urls)).await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");
        let images: Vec<_> = urls.iter().map(|u| ProducedImage::from_url(*u)).collect();

        let records = f
            .ingest
            .ingest(&f.task, ProviderKind::Primary, &images, &cancel)
            .await
            .unwrap();

        let stamp = records[0].id.split('_').next().unwrap();
        for (index, rec) in records.iter().enumerate() {
            assert!(rec.id.starts_with(&format!("{stamp}_{index}_")), "{}", rec.id);
        }
    }

    #[tokio::test]
    async fn failed_download_keeps_earlier_images() {
        let f = fixture(FakeFetcher::serving(&["https://cdn/a"])).await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");
        let images = [
            ProducedImage::from_url("https://cdn/a"),
            ProducedImage::from_url("https://cdn/slow"),
        ];

        let err = f
            .ingest
            .ingest(&f.task, ProviderKind::Primary, &images, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::DownloadFailed { index: 1, .. }));
        let gallery = f.ingest.gallery().list().await;
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].remote_url, "https://cdn/a");
    }

    #[tokio::test]
    async fn empty_url_is_a_download_failure() {
        let f = fixture(FakeFetcher::default()).await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");
        let err = f
            .ingest
            .ingest(&f.task, ProviderKind::Fallback, &[ProducedImage::from_url("  ")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DownloadFailed { index: 0, .. }));
        assert!(f.ingest.gallery().is_empty().await);
    }

    #[tokio::test]
    async fn cancellation_stops_before_downloading() {
        let f = fixture(FakeFetcher::serving(&["https://cdn/a"])).await;
        f.tasks.cancel("t1").await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");

        let err = f
            .ingest
            .ingest(&f.task, ProviderKind::Primary, &[ProducedImage::from_url("https://cdn/a")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::Cancelled { completed: 0 });
        assert!(f.ingest.gallery().is_empty().await);
    }

    #[tokio::test]
    async fn data_urls_are_decoded_without_fetching() {
        let f = fixture(FakeFetcher::default()).await;
        let cancel = CancelToken::new(f.tasks.clone(), "t1");
        let url = format!("data:image/png;base64,{}", BASE64.encode(b"\x89PNG fake"));

        let records = f
            .ingest
            .ingest(&f.task, ProviderKind::Primary, &[ProducedImage::from_url(url)], &cancel)
            .await
            .unwrap();
        let on_disk = std::fs::read(f.ingest.gallery().image_path(&records[0].filename)).unwrap();
        assert_eq!(on_disk, b"\x89PNG fake");
    }

    #[test]
    fn non_base64_data_urls_are_rejected() {
        assert!(matches!(
            decode_data_url("data:text/plain,hello"),
            Err(FetchError::DataUrl(_))
        ));
    }
}
