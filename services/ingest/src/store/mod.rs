//! Persistence for uploads, assets and registered media objects

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{MediaError, StoreError};
use crate::media_file::MediaFile;
use crate::models::{Asset, AssetStatus, AssetUpdate, MediaObject, Upload, UploadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn create_upload(&self, upload: &Upload) -> Result<(), StoreError>;

    async fn get_upload(&self, id: Uuid) -> Result<Upload, StoreError>;

    async fn update_upload_status(
        &self,
        id: Uuid,
        status: UploadStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError>;

    async fn get_asset(&self, id: Uuid) -> Result<Asset, StoreError>;

    /// Assets of an upload in creation order
    async fn list_assets(&self, upload_id: Uuid) -> Result<Vec<Asset>, StoreError>;

    /// Apply `update` only if the asset is currently in `from`.
    ///
    /// Returns whether the update was applied.
    async fn transition_asset(
        &self,
        id: Uuid,
        from: AssetStatus,
        update: &AssetUpdate,
    ) -> Result<bool, StoreError>;

    /// Remote assets still pending or processing, last touched before `older_than`
    async fn list_stale_assets(&self, older_than: DateTime<Utc>) -> Result<Vec<Asset>, StoreError>;

    /// Uploads still pending although every asset has finished
    async fn list_unsettled_uploads(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// Content-addressed registry of media objects
#[async_trait]
pub trait MediaRegistry: Send + Sync {
    /// Register a media object, returning the existing one when the content
    /// hash is already known
    async fn register(&self, media: NewMediaObject) -> Result<MediaObject, StoreError>;

    async fn get_media(&self, id: Uuid) -> Result<MediaObject, StoreError>;
}

/// Attributes of a media file about to be registered
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaObject {
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
    pub metadata: Value,
}

impl NewMediaObject {
    pub fn from_media(file: &MediaFile) -> Result<Self, MediaError> {
        let (width, height) = file.dimensions();
        Ok(Self {
            content_hash: file.content_hash()?,
            file_ext: file.format().extension().to_string(),
            file_size: i64::try_from(file.size()?).unwrap_or(i64::MAX),
            image_width: i32::try_from(width).unwrap_or(i32::MAX),
            image_height: i32::try_from(height).unwrap_or(i32::MAX),
            duration: file.duration(),
            frame_count: file
                .frame_count()
                .map(|count| i32::try_from(count).unwrap_or(i32::MAX)),
            frame_rate: file.frame_rate(),
            is_animated: file.is_animated(),
            has_audio: file.has_audio(),
            metadata: Value::Object(file.metadata().clone()),
        })
    }

    pub(crate) fn into_object(self, id: Uuid, created_at: DateTime<Utc>) -> MediaObject {
        MediaObject {
            id,
            content_hash: self.content_hash,
            file_ext: self.file_ext,
            file_size: self.file_size,
            image_width: self.image_width,
            image_height: self.image_height,
            duration: self.duration,
            frame_count: self.frame_count,
            frame_rate: self.frame_rate,
            is_animated: self.is_animated,
            has_audio: self.has_audio,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_file::MediaSource;
    use crate::media_file::fixtures::encoded_image;
    use image::ImageFormat;

    #[test]
    fn test_from_media() {
        let bytes = encoded_image(12, 7, ImageFormat::Png);
        let file = MediaFile::open(MediaSource::from_bytes(&bytes).unwrap(), true).unwrap();

        let media = NewMediaObject::from_media(&file).unwrap();
        assert_eq!(media.file_ext, "png");
        assert_eq!(media.file_size, bytes.len() as i64);
        assert_eq!((media.image_width, media.image_height), (12, 7));
        assert_eq!(media.content_hash.len(), 64);
        assert!(!media.is_animated);
        assert!(media.metadata.is_object());
    }
}
