use super::{MediaRegistry, NewMediaObject, UploadStore};
use crate::error::StoreError;
use crate::models::{Asset, AssetStatus, AssetUpdate, MediaObject, Upload, UploadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    uploads: HashMap<Uuid, Upload>,
    /// Creation order
    assets: Vec<Asset>,
    media: HashMap<Uuid, MediaObject>,
    media_by_hash: HashMap<String, Uuid>,
}

/// In-process store used by tests and local runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct media objects registered
    pub async fn media_count(&self) -> usize {
        self.state.lock().await.media.len()
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn create_upload(&self, upload: &Upload) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .uploads
            .insert(upload.id, upload.clone());
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<Upload, StoreError> {
        self.state
            .lock()
            .await
            .uploads
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "upload", id })
    }

    async fn update_upload_status(
        &self,
        id: Uuid,
        status: UploadStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "upload", id })?;

        upload.status = status;
        upload.error = error.map(str::to_string);
        upload.updated_at = Utc::now();
        Ok(())
    }

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.uploads.contains_key(&asset.upload_id) {
            return Err(StoreError::NotFound {
                kind: "upload",
                id: asset.upload_id,
            });
        }
        state.assets.push(asset.clone());
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Asset, StoreError> {
        self.state
            .lock()
            .await
            .assets
            .iter()
            .find(|asset| asset.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "asset", id })
    }

    async fn list_assets(&self, upload_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .assets
            .iter()
            .filter(|asset| asset.upload_id == upload_id)
            .cloned()
            .collect())
    }

    async fn transition_asset(
        &self,
        id: Uuid,
        from: AssetStatus,
        update: &AssetUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let asset = state
            .assets
            .iter_mut()
            .find(|asset| asset.id == id)
            .ok_or(StoreError::NotFound { kind: "asset", id })?;

        if asset.status != from {
            return Ok(false);
        }

        asset.status = update.status;
        asset.error = update.error.clone();
        if update.media_object_id.is_some() {
            asset.media_object_id = update.media_object_id;
        }
        asset.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_stale_assets(&self, older_than: DateTime<Utc>) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .assets
            .iter()
            .filter(|asset| {
                !asset.status.is_terminal()
                    && !asset.is_direct_upload()
                    && asset.updated_at < older_than
            })
            .cloned()
            .collect())
    }

    async fn list_unsettled_uploads(&self) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .uploads
            .values()
            .filter(|upload| upload.status == UploadStatus::Pending)
            .filter(|upload| {
                let mut assets = state
                    .assets
                    .iter()
                    .filter(|asset| asset.upload_id == upload.id)
                    .peekable();
                assets.peek().is_some() && assets.all(|asset| asset.status.is_terminal())
            })
            .map(|upload| upload.id)
            .collect())
    }
}

#[async_trait]
impl MediaRegistry for MemoryStore {
    async fn register(&self, media: NewMediaObject) -> Result<MediaObject, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .media_by_hash
            .get(&media.content_hash)
            .and_then(|id| state.media.get(id))
        {
            return Ok(existing.clone());
        }

        let object = media.into_object(Uuid::new_v4(), Utc::now());
        state
            .media_by_hash
            .insert(object.content_hash.clone(), object.id);
        state.media.insert(object.id, object.clone());
        Ok(object)
    }

    async fn get_media(&self, id: Uuid) -> Result<MediaObject, StoreError> {
        self.state
            .lock()
            .await
            .media
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "media", id })
    }
}
