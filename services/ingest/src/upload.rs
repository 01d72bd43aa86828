//! Registration of new uploads

use crate::aggregator::{StatusRollup, recompute_with_retry};
use crate::dispatcher::JobDispatcher;
use crate::error::{IngestError, IngestResult};
use crate::media_file::MediaSource;
use crate::models::{Asset, AssetStatus, AssetUpdate, DIRECT_UPLOAD_SCHEME, Upload};
use crate::processor::Ingestor;
use crate::store::UploadStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A remote file fetched asynchronously
#[derive(Debug, Clone)]
pub struct SourceTarget {
    pub source_url: String,
    /// Page the file was found on, sent as the referrer
    pub page_url: Option<String>,
}

/// A file attached to the upload request itself
#[derive(Debug)]
pub struct DirectFile {
    pub filename: String,
    pub source: MediaSource,
}

#[derive(Debug, Default)]
pub struct NewUpload {
    pub sources: Vec<SourceTarget>,
    pub files: Vec<DirectFile>,
}

pub struct UploadService {
    store: Arc<dyn UploadStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    rollup: Arc<dyn StatusRollup>,
    ingestor: Ingestor,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn UploadStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        rollup: Arc<dyn StatusRollup>,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            store,
            dispatcher,
            rollup,
            ingestor,
        }
    }

    /// Create an upload with one pending asset per target.
    ///
    /// Remote sources are handed to the dispatcher. Attached files are
    /// ingested before this returns.
    pub async fn create_upload(&self, request: NewUpload) -> IngestResult<Upload> {
        if request.sources.is_empty() && request.files.is_empty() {
            return Err(IngestError::EmptyUpload);
        }

        let upload = Upload::new();
        self.store.create_upload(&upload).await?;

        let mut remote = Vec::with_capacity(request.sources.len());
        for target in request.sources {
            let asset = Asset::new(upload.id, target.source_url, target.page_url);
            self.store.create_asset(&asset).await?;
            remote.push(asset.id);
        }

        let mut direct = Vec::with_capacity(request.files.len());
        for file in request.files {
            let asset = Asset::new(
                upload.id,
                format!("{}{}", DIRECT_UPLOAD_SCHEME, file.filename),
                None,
            );
            self.store.create_asset(&asset).await?;
            direct.push((asset.id, file.source));
        }

        info!(
            upload_id = %upload.id,
            remote = remote.len(),
            direct = direct.len(),
            "Created upload"
        );

        for (asset_id, source) in direct {
            let update = match self.ingestor.ingest(source).await {
                Ok(media) => AssetUpdate::active(media.id),
                Err(e) => {
                    warn!(asset_id = %asset_id, error = %e, "Attached file rejected");
                    AssetUpdate::failed(e.to_string())
                }
            };
            if self
                .store
                .transition_asset(asset_id, AssetStatus::Pending, &update)
                .await?
                && let Err(e) = recompute_with_retry(self.rollup.as_ref(), upload.id).await
            {
                error!(upload_id = %upload.id, error = %e, "Upload rollup failed");
            }
        }

        for asset_id in remote {
            // left pending for the sweeper when the queue is unavailable
            if let Err(e) = self.dispatcher.dispatch(asset_id).await {
                warn!(asset_id = %asset_id, error = %e, "Failed to dispatch asset");
            }
        }

        Ok(self.store.get_upload(upload.id).await?)
    }
}
