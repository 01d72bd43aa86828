//! Derives an upload's status from the states of its assets

use crate::error::StoreError;
use crate::models::{Asset, AssetStatus, UploadStatus};
use crate::store::UploadStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ROLLUP_ATTEMPTS: u32 = 3;

/// Recomputes an upload's status after one of its assets changed state
#[async_trait]
pub trait StatusRollup: Send + Sync {
    async fn recompute(&self, upload_id: Uuid) -> Result<UploadStatus, StoreError>;
}

/// Recompute, retrying a failed attempt with a short backoff.
///
/// An upload whose rollup is still lost afterwards is settled later by
/// [`PendingSweeper`](crate::dispatcher::PendingSweeper).
pub async fn recompute_with_retry(
    rollup: &dyn StatusRollup,
    upload_id: Uuid,
) -> Result<UploadStatus, StoreError> {
    let mut attempt = 1;
    loop {
        match rollup.recompute(upload_id).await {
            Ok(status) => return Ok(status),
            Err(e) if attempt < ROLLUP_ATTEMPTS => {
                warn!(upload_id = %upload_id, attempt, error = %e, "Upload rollup failed, retrying");
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Status and message for a snapshot of assets, or `None` when the upload
/// should be left as it is.
///
/// Every asset failed: `Error` with the failure messages joined in asset
/// order. Every asset finished: `Completed`.
pub fn rollup(assets: &[Asset]) -> Option<(UploadStatus, Option<String>)> {
    if assets.is_empty() {
        return None;
    }

    if assets.iter().all(|asset| asset.status == AssetStatus::Failed) {
        let message = assets
            .iter()
            .filter_map(|asset| asset.error.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        return Some((UploadStatus::Error, Some(message)));
    }

    if assets.iter().all(|asset| asset.status.is_terminal()) {
        return Some((UploadStatus::Completed, None));
    }

    None
}

/// Serializes recomputation per upload id
#[derive(Default)]
struct UploadLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl UploadLocks {
    fn get(&self, upload_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(upload_id).or_default().clone()
    }

    /// Drop the entry for `upload_id` once no task holds it
    fn release(&self, upload_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&upload_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&upload_id);
        }
    }
}

pub struct UploadAggregator {
    store: Arc<dyn UploadStore>,
    locks: UploadLocks,
}

impl UploadAggregator {
    pub fn new(store: Arc<dyn UploadStore>) -> Self {
        Self {
            store,
            locks: UploadLocks::default(),
        }
    }

    async fn recompute_locked(&self, upload_id: Uuid) -> Result<UploadStatus, StoreError> {
        let upload = self.store.get_upload(upload_id).await?;
        let assets = self.store.list_assets(upload_id).await?;

        let Some((status, error)) = rollup(&assets) else {
            debug!(upload_id = %upload_id, "Upload still has unfinished assets");
            return Ok(upload.status);
        };

        if upload.status == status && upload.error == error {
            return Ok(status);
        }

        self.store
            .update_upload_status(upload_id, status, error.as_deref())
            .await?;
        info!(upload_id = %upload_id, status = status.as_str(), "Upload status updated");
        Ok(status)
    }
}

#[async_trait]
impl StatusRollup for UploadAggregator {
    async fn recompute(&self, upload_id: Uuid) -> Result<UploadStatus, StoreError> {
        let lock = self.locks.get(upload_id);
        let result = {
            let _guard = lock.lock().await;
            self.recompute_locked(upload_id).await
        };
        drop(lock);
        self.locks.release(upload_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetUpdate, Upload};
    use crate::store::MemoryStore;

    fn asset(status: AssetStatus, error: Option<&str>) -> Asset {
        let mut asset = Asset::new(Uuid::new_v4(), "https://example.com/a.png", None);
        asset.status = status;
        asset.error = error.map(str::to_string);
        asset
    }

    #[test]
    fn test_rollup_rules() {
        use AssetStatus::*;

        assert_eq!(rollup(&[]), None);
        assert_eq!(rollup(&[asset(Pending, None)]), None);
        assert_eq!(
            rollup(&[asset(Active, None), asset(Processing, None)]),
            None
        );
        assert_eq!(
            rollup(&[
                asset(Failed, Some("a")),
                asset(Active, None),
                asset(Failed, Some("b"))
            ]),
            Some((UploadStatus::Completed, None))
        );
        assert_eq!(
            rollup(&[asset(Failed, Some("timeout")), asset(Failed, Some("bad format"))]),
            Some((UploadStatus::Error, Some("timeout; bad format".to_string())))
        );
    }

    #[tokio::test]
    async fn test_recompute_updates_store_once() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        let assets = [
            Asset::new(upload.id, "https://a/1", None),
            Asset::new(upload.id, "https://a/2", None),
        ];
        for asset in &assets {
            store.create_asset(asset).await.unwrap();
        }

        let aggregator = UploadAggregator::new(store.clone());
        assert_eq!(aggregator.recompute(upload.id).await.unwrap(), UploadStatus::Pending);

        store
            .transition_asset(assets[0].id, AssetStatus::Pending, &AssetUpdate::failed("timeout"))
            .await
            .unwrap();
        assert_eq!(aggregator.recompute(upload.id).await.unwrap(), UploadStatus::Pending);

        store
            .transition_asset(assets[1].id, AssetStatus::Pending, &AssetUpdate::failed("bad format"))
            .await
            .unwrap();
        assert_eq!(aggregator.recompute(upload.id).await.unwrap(), UploadStatus::Error);

        let first = store.get_upload(upload.id).await.unwrap();
        assert_eq!(first.error.as_deref(), Some("timeout; bad format"));

        // no intervening change: nothing is written
        assert_eq!(aggregator.recompute(upload.id).await.unwrap(), UploadStatus::Error);
        let second = store.get_upload(upload.id).await.unwrap();
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_empty_upload_is_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        let aggregator = UploadAggregator::new(store.clone());
        assert_eq!(aggregator.recompute(upload.id).await.unwrap(), UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_locks_are_released() {
        let store = Arc::new(MemoryStore::new());
        let upload = Upload::new();
        store.create_upload(&upload).await.unwrap();

        let aggregator = UploadAggregator::new(store);
        aggregator.recompute(upload.id).await.unwrap();
        assert!(aggregator.locks.locks.lock().unwrap().is_empty());
    }

    /// Fails the first `failures` recomputations
    struct FailingRollup {
        failures: u32,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl StatusRollup for FailingRollup {
        async fn recompute(&self, upload_id: Uuid) -> Result<UploadStatus, StoreError> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.failures {
                return Err(StoreError::NotFound { kind: "upload", id: upload_id });
            }
            Ok(UploadStatus::Completed)
        }
    }

    #[tokio::test]
    async fn test_recompute_with_retry() {
        let flaky = FailingRollup {
            failures: 2,
            calls: Default::default(),
        };
        let status = recompute_with_retry(&flaky, Uuid::new_v4()).await.unwrap();
        assert_eq!(status, UploadStatus::Completed);
        assert_eq!(flaky.calls.into_inner(), 3);

        let broken = FailingRollup {
            failures: u32::MAX,
            calls: Default::default(),
        };
        assert!(recompute_with_retry(&broken, Uuid::new_v4()).await.is_err());
        assert_eq!(broken.calls.into_inner(), ROLLUP_ATTEMPTS);
    }
}
