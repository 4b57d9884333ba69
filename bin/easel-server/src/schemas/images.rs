use easel_core::ImageRecord;
use serde::Serialize;
use utoipa::ToSchema;

/// One saved gallery image.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: String,
    pub username: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub reference_urls: Vec<String>,
    /// `primary`, `fallback`, or absent for recovered records.
    pub provider: Option<String>,
    pub filename: String,
    /// Path under which the file is served, e.g. `/storage/images/<file>`.
    pub url: String,
    /// Where the provider originally delivered the image.
    pub remote_url: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl From<ImageRecord> for ImageResponse {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            prompt: record.prompt,
            aspect_ratio: record.aspect_ratio,
            image_size: record.image_size,
            reference_urls: record.reference_urls,
            provider: record.provider.map(|p| p.to_string()),
            filename: record.filename,
            url: record.url,
            remote_url: record.remote_url,
            created_at: record.created_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImageListResponse {
    pub success: bool,
    pub images: Vec<ImageResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImageEnvelope {
    pub success: bool,
    pub image: ImageResponse,
}
