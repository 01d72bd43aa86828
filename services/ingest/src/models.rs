use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;

/// URL scheme used for files attached directly at upload time
pub const DIRECT_UPLOAD_SCHEME: &str = "file://";

/// Processing state of a single asset.
///
/// Codes are sparse so intermediate states can be added later; consumers must
/// compare them by order, not assume contiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Processing,
    Active,
    Failed,
}

impl AssetStatus {
    pub fn code(self) -> i32 {
        match self {
            AssetStatus::Pending => 0,
            AssetStatus::Processing => 100,
            AssetStatus::Active => 200,
            AssetStatus::Failed => 300,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AssetStatus::Pending),
            100 => Some(AssetStatus::Processing),
            200 => Some(AssetStatus::Active),
            300 => Some(AssetStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AssetStatus::Active | AssetStatus::Failed)
    }
}

/// Aggregate state of an upload, derived from its assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(UploadStatus::Pending),
            "completed" => Some(UploadStatus::Completed),
            "error" => Some(UploadStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: UploadStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for Upload {
    fn default() -> Self {
        Self::new()
    }
}

/// One ingested file belonging to an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub status: AssetStatus,
    pub source_url: String,
    pub page_url: Option<String>,
    pub error: Option<String>,
    pub media_object_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(upload_id: Uuid, source_url: impl Into<String>, page_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            upload_id,
            status: AssetStatus::Pending,
            source_url: source_url.into(),
            page_url,
            error: None,
            media_object_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Files attached directly to the upload are never fetched asynchronously
    pub fn is_direct_upload(&self) -> bool {
        self.source_url.starts_with(DIRECT_UPLOAD_SCHEME)
    }
}

/// Status change applied to an asset by the processor
#[derive(Debug, Clone, PartialEq)]
pub struct AssetUpdate {
    pub status: AssetStatus,
    pub error: Option<String>,
    pub media_object_id: Option<Uuid>,
}

impl AssetUpdate {
    pub fn processing() -> Self {
        Self {
            status: AssetStatus::Processing,
            error: None,
            media_object_id: None,
        }
    }

    pub fn active(media_object_id: Uuid) -> Self {
        Self {
            status: AssetStatus::Active,
            error: None,
            media_object_id: Some(media_object_id),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AssetStatus::Failed,
            error: Some(message.into()),
            media_object_id: None,
        }
    }
}

/// A registered media file, shared by every asset with the same content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaObject {
    pub id: Uuid,
    pub content_hash: String,
    pub file_ext: String,
    pub file_size: i64,
    pub image_width: i32,
    pub image_height: i32,
    pub duration: Option<f64>,
    pub frame_count: Option<i32>,
    pub frame_rate: Option<f64>,
    pub is_animated: bool,
    pub has_audio: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_ordered() {
        let statuses = [
            AssetStatus::Pending,
            AssetStatus::Processing,
            AssetStatus::Active,
            AssetStatus::Failed,
        ];
        let codes: Vec<i32> = statuses.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![0, 100, 200, 300]);

        for pair in statuses.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for status in statuses {
            assert_eq!(AssetStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AssetStatus::from_code(50), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AssetStatus::Pending.is_terminal());
        assert!(!AssetStatus::Processing.is_terminal());
        assert!(AssetStatus::Active.is_terminal());
        assert!(AssetStatus::Failed.is_terminal());
    }

    #[test]
    fn test_direct_upload_detection() {
        let upload = Upload::new();
        let direct = Asset::new(upload.id, "file://image.png", None);
        let remote = Asset::new(upload.id, "https://example.com/image.png", None);

        assert!(direct.is_direct_upload());
        assert!(!remote.is_direct_upload());
        assert_eq!(direct.status, AssetStatus::Pending);
    }

    #[test]
    fn test_upload_status_round_trip() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Completed,
            UploadStatus::Error,
        ] {
            assert_eq!(UploadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UploadStatus::parse("processing"), None);
    }
}
