//! Asset processing state machine
//!
//! ```text
//! pending -> processing -> active
//!                       -> failed
//! ```
//!
//! Every applied transition triggers a rollup of the owning upload.

use crate::aggregator::{StatusRollup, recompute_with_retry};
use crate::error::{IngestError, IngestResult};
use crate::media_file::{MediaFile, MediaSource, PreviewOptions, tools};
use crate::models::{Asset, AssetStatus, AssetUpdate, MediaObject};
use crate::policy::IngestPolicy;
use crate::resolver::SourceResolver;
use crate::storage::{MediaStorage, original_key, preview_key};
use crate::store::{MediaRegistry, NewMediaObject, UploadStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Bounding box of generated previews
pub const PREVIEW_SIZE: u32 = 180;

/// Why an asset was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Attached to the upload directly, handled at registration
    DirectUpload,
    /// Already active or failed
    Terminal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Active(Uuid),
    Failed(String),
    /// Another run applied the final transition first
    Superseded,
}

/// Inspects, stores and registers a local file
#[derive(Clone)]
pub struct Ingestor {
    registry: Arc<dyn MediaRegistry>,
    storage: Arc<dyn MediaStorage>,
    policy: IngestPolicy,
}

struct Inspected {
    file: MediaFile,
    media: NewMediaObject,
    preview: Option<MediaFile>,
}

fn inspect(source: MediaSource, policy: &IngestPolicy) -> IngestResult<Inspected> {
    let file = MediaFile::open(source, true)?;
    policy.check(&file)?;
    let media = NewMediaObject::from_media(&file)?;

    let preview = if file.is_video() && !tools::video_preview_supported() {
        None
    } else {
        let size = Some(PREVIEW_SIZE);
        match file.preview(size, size, &PreviewOptions::default()) {
            Ok(preview) => preview,
            Err(e) => {
                warn!(hash = %media.content_hash, error = %e, "Failed to generate preview");
                None
            }
        }
    };

    Ok(Inspected {
        file,
        media,
        preview,
    })
}

impl Ingestor {
    pub fn new(
        registry: Arc<dyn MediaRegistry>,
        storage: Arc<dyn MediaStorage>,
        policy: IngestPolicy,
    ) -> Self {
        Self {
            registry,
            storage,
            policy,
        }
    }

    /// Validate the file against the policy, store it with its preview and
    /// register it. Registering known content returns the existing object.
    pub async fn ingest(&self, source: MediaSource) -> IngestResult<MediaObject> {
        let policy = self.policy.clone();
        let inspected = tokio::task::spawn_blocking(move || inspect(source, &policy))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))??;

        let Inspected {
            file,
            media,
            preview,
        } = inspected;

        let hash = media.content_hash.clone();
        self.storage
            .put(
                &original_key(&hash, &media.file_ext),
                file.path(),
                file.format().as_str(),
            )
            .await?;
        if let Some(preview) = &preview {
            self.storage
                .put(&preview_key(&hash), preview.path(), "image/jpeg")
                .await?;
        }

        let object = self.registry.register(media).await?;
        info!(media_id = %object.id, hash = %hash, "Registered media object");
        Ok(object)
    }
}

#[derive(Clone)]
pub struct AssetProcessor {
    store: Arc<dyn UploadStore>,
    resolver: Arc<dyn SourceResolver>,
    rollup: Arc<dyn StatusRollup>,
    ingestor: Ingestor,
}

impl AssetProcessor {
    pub fn new(
        store: Arc<dyn UploadStore>,
        resolver: Arc<dyn SourceResolver>,
        rollup: Arc<dyn StatusRollup>,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            store,
            resolver,
            rollup,
            ingestor,
        }
    }

    /// Run one asset through the state machine.
    ///
    /// Safe to call repeatedly for the same asset: terminal assets are
    /// skipped, and only one run applies the final transition.
    pub async fn process(&self, asset_id: Uuid) -> IngestResult<ProcessOutcome> {
        let asset = self.store.get_asset(asset_id).await?;

        if asset.is_direct_upload() {
            return Ok(ProcessOutcome::Skipped(SkipReason::DirectUpload));
        }

        match asset.status {
            AssetStatus::Active | AssetStatus::Failed => {
                return Ok(ProcessOutcome::Skipped(SkipReason::Terminal));
            }
            AssetStatus::Pending => {
                let applied = self
                    .store
                    .transition_asset(asset_id, AssetStatus::Pending, &AssetUpdate::processing())
                    .await?;
                if applied {
                    self.settle(asset.upload_id).await;
                } else if self.store.get_asset(asset_id).await?.status.is_terminal() {
                    return Ok(ProcessOutcome::Skipped(SkipReason::Terminal));
                }
            }
            AssetStatus::Processing => {
                info!(asset_id = %asset_id, "Resuming asset left in processing");
            }
        }

        let update = match self.run(&asset).await {
            Ok(media) => AssetUpdate::active(media.id),
            Err(e) => {
                warn!(asset_id = %asset_id, error = %e, "Asset processing failed");
                AssetUpdate::failed(e.to_string())
            }
        };

        let applied = self
            .store
            .transition_asset(asset_id, AssetStatus::Processing, &update)
            .await?;
        if !applied {
            info!(asset_id = %asset_id, "Asset was finished by another run");
            return Ok(ProcessOutcome::Superseded);
        }
        self.settle(asset.upload_id).await;

        Ok(match (update.media_object_id, update.error) {
            (Some(media_id), _) => {
                info!(asset_id = %asset_id, media_id = %media_id, "Asset is active");
                ProcessOutcome::Active(media_id)
            }
            (None, error) => ProcessOutcome::Failed(error.unwrap_or_default()),
        })
    }

    /// Roll up the owning upload after an applied transition. The transition
    /// is already committed, so a lost rollup is logged and left to the
    /// sweeper instead of failing the run.
    async fn settle(&self, upload_id: Uuid) {
        if let Err(e) = recompute_with_retry(self.rollup.as_ref(), upload_id).await {
            error!(upload_id = %upload_id, error = %e, "Upload rollup failed");
        }
    }

    /// Resolve and ingest in a separate task so a panic fails only this asset
    async fn run(&self, asset: &Asset) -> IngestResult<MediaObject> {
        let resolver = self.resolver.clone();
        let ingestor = self.ingestor.clone();
        let source_url = asset.source_url.clone();
        let page_url = asset.page_url.clone();

        tokio::spawn(async move {
            let source = resolver.resolve(&source_url, page_url.as_deref()).await?;
            ingestor.ingest(source).await
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Processing task panicked");
            Err(IngestError::Task(e.to_string()))
        })
    }
}
