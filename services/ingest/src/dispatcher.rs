//! Scheduling of asynchronous asset processing

use crate::aggregator::StatusRollup;
use crate::error::{DispatchError, IngestResult};
use crate::processor::AssetProcessor;
use crate::store::UploadStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Schedules a later, asynchronous run of the asset processor
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, asset_id: Uuid) -> Result<(), DispatchError>;
}

/// Bounded job queue drained by at most `max_workers` concurrent tasks
#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<Uuid>,
}

impl WorkerPool {
    /// Start draining the queue. The returned handle finishes once every
    /// `WorkerPool` clone is dropped and the queue is empty.
    pub fn start(
        processor: AssetProcessor,
        max_workers: usize,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Uuid>(queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(max_workers.max(1)));

        let handle = tokio::spawn(async move {
            while let Some(asset_id) = receiver.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let processor = processor.clone();

                tokio::spawn(async move {
                    match processor.process(asset_id).await {
                        Ok(outcome) => debug!(asset_id = %asset_id, ?outcome, "Job finished"),
                        Err(e) => error!(asset_id = %asset_id, error = %e, "Job failed"),
                    }
                    drop(permit);
                });
            }

            // wait for in-flight jobs
            let _ = permits.acquire_many(max_workers.max(1) as u32).await;
            info!("Worker pool stopped");
        });

        (Self { sender }, handle)
    }
}

#[async_trait]
impl JobDispatcher for WorkerPool {
    async fn dispatch(&self, asset_id: Uuid) -> Result<(), DispatchError> {
        self.sender
            .send(asset_id)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}

/// Re-dispatches remote assets that stayed unfinished for too long and
/// settles uploads whose rollup was lost
#[derive(Clone)]
pub struct PendingSweeper {
    store: Arc<dyn UploadStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    rollup: Arc<dyn StatusRollup>,
    stale_after: chrono::Duration,
    /// When this sweeper last dispatched each asset
    dispatched: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>,
}

impl PendingSweeper {
    pub fn new(
        store: Arc<dyn UploadStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        rollup: Arc<dyn StatusRollup>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            rollup,
            stale_after,
            dispatched: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatch every stale asset once, returning how many were dispatched.
    ///
    /// An asset dispatched by an earlier sweep is skipped until another
    /// `stale_after` has passed, so a slow queue is not flooded with copies.
    pub async fn sweep(&self) -> IngestResult<usize> {
        let now = Utc::now();
        let stale = self.store.list_stale_assets(now - self.stale_after).await?;

        let due: Vec<Uuid> = {
            let mut dispatched = self.dispatched.lock().unwrap_or_else(|e| e.into_inner());
            dispatched.retain(|id, _| stale.iter().any(|asset| asset.id == *id));
            stale
                .iter()
                .filter(|asset| {
                    dispatched
                        .get(&asset.id)
                        .is_none_or(|at| *at <= now - self.stale_after)
                })
                .map(|asset| asset.id)
                .collect()
        };

        for asset_id in &due {
            self.dispatcher.dispatch(*asset_id).await?;
            self.dispatched
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(*asset_id, now);
        }

        if !due.is_empty() {
            info!(count = due.len(), "Re-dispatched stale assets");
        }

        self.settle_uploads().await?;
        Ok(due.len())
    }

    /// Recompute uploads left pending after all their assets finished
    async fn settle_uploads(&self) -> IngestResult<()> {
        for upload_id in self.store.list_unsettled_uploads().await? {
            match self.rollup.recompute(upload_id).await {
                Ok(status) => {
                    info!(upload_id = %upload_id, status = status.as_str(), "Settled upload")
                }
                Err(e) => warn!(upload_id = %upload_id, error = %e, "Failed to settle upload"),
            }
        }
        Ok(())
    }

    /// Run [`sweep`](Self::sweep) on a cron schedule (with seconds)
    pub async fn start(&self, schedule: &str) -> anyhow::Result<JobScheduler> {
        let sweeper = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(e) = sweeper.sweep().await {
                    warn!(error = %e, "Stale asset sweep failed");
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!(schedule, "Started stale asset sweeper");
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::UploadAggregator;
    use crate::models::{Asset, AssetStatus, AssetUpdate, Upload, UploadStatus};
    use crate::store::MemoryStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(&self, asset_id: Uuid) -> Result<(), DispatchError> {
            self.dispatched.lock().await.push(asset_id);
            Ok(())
        }
    }

    fn sweeper(
        store: &Arc<MemoryStore>,
        dispatcher: &Arc<RecordingDispatcher>,
        stale_after: chrono::Duration,
    ) -> PendingSweeper {
        PendingSweeper::new(
            store.clone(),
            dispatcher.clone(),
            Arc::new(UploadAggregator::new(store.clone())),
            stale_after,
        )
    }

    #[tokio::test]
    async fn test_sweep_dispatches_stale_remote_assets() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        let pending = Asset::new(upload.id, "https://a/1", None);
        let processing = Asset::new(upload.id, "https://a/2", None);
        let failed = Asset::new(upload.id, "https://a/3", None);
        let direct = Asset::new(upload.id, "file://4.png", None);
        for asset in [&pending, &processing, &failed, &direct] {
            store.create_asset(asset).await.unwrap();
        }
        store
            .transition_asset(processing.id, AssetStatus::Pending, &AssetUpdate::processing())
            .await
            .unwrap();
        store
            .transition_asset(failed.id, AssetStatus::Pending, &AssetUpdate::failed("x"))
            .await
            .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sweeper = sweeper(&store, &dispatcher, chrono::Duration::seconds(-1));

        assert_eq!(sweeper.sweep().await.unwrap(), 2);
        assert_eq!(
            *dispatcher.dispatched.lock().await,
            vec![pending.id, processing.id]
        );
    }

    #[tokio::test]
    async fn test_fresh_assets_are_not_swept() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();
        store
            .create_asset(&Asset::new(upload.id, "https://a/1", None))
            .await
            .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sweeper = sweeper(&store, &dispatcher, chrono::Duration::minutes(15));

        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert!(dispatcher.dispatched.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_swept_asset_is_not_dispatched_again_until_stale() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        // queued an hour ago and still waiting
        let mut asset = Asset::new(upload.id, "https://a/1", None);
        asset.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.create_asset(&asset).await.unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sweeper = sweeper(&store, &dispatcher, chrono::Duration::minutes(15));

        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert_eq!(*dispatcher.dispatched.lock().await, vec![asset.id]);
    }

    #[tokio::test]
    async fn test_sweep_settles_upload_with_lost_rollup() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        let asset = Asset::new(upload.id, "https://a/1", None);
        store.create_asset(&asset).await.unwrap();
        // finished without the upload being rolled up
        store
            .transition_asset(asset.id, AssetStatus::Pending, &AssetUpdate::failed("timeout"))
            .await
            .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sweeper = sweeper(&store, &dispatcher, chrono::Duration::minutes(15));
        assert_eq!(sweeper.sweep().await.unwrap(), 0);

        let upload = store.get_upload(upload.id).await.unwrap();
        assert_eq!(upload.status, UploadStatus::Error);
        assert_eq!(upload.error.as_deref(), Some("timeout"));
    }
}
