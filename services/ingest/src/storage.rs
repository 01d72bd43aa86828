//! Persistent storage for original files and their previews

use crate::error::StorageError;
use async_trait::async_trait;
use aws_sdk_s3::{Client, primitives::ByteStream};
use std::path::{Path, PathBuf};
use tracing::info;

/// `original/ab/cd/<hash>.<ext>`
pub fn original_key(hash: &str, ext: &str) -> String {
    format!("original/{}{}.{}", shard(hash), hash, ext)
}

/// `preview/ab/cd/<hash>.jpg`
pub fn preview_key(hash: &str) -> String {
    format!("preview/{}{}.jpg", shard(hash), hash)
}

fn shard(hash: &str) -> String {
    match (hash.get(0..2), hash.get(2..4)) {
        (Some(a), Some(b)) => format!("{}/{}/", a, b),
        _ => String::new(),
    }
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Store the file at `path` under `key`, replacing any existing object
    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError>;
}

/// Files under a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    async fn put(&self, key: &str, path: &Path, _content_type: &str) -> Result<(), StorageError> {
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target).await?;
        Ok(())
    }
}

/// Objects in an S3 bucket
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl MediaStorage for S3Storage {
    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError> {
        info!(bucket = %self.bucket, key, "Uploading to S3");

        let body = ByteStream::from(tokio::fs::read(path).await?);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_keys_are_sharded_by_hash() {
        assert_eq!(
            original_key(HASH, "png"),
            format!("original/ba/78/{}.png", HASH)
        );
        assert_eq!(preview_key(HASH), format!("preview/ba/78/{}.jpg", HASH));
        assert_eq!(original_key("ab", "gif"), "original/ab.gif");
    }

    #[tokio::test]
    async fn test_local_storage_copies_file() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(root.path());

        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), b"content").unwrap();

        let key = original_key(HASH, "png");
        storage.put(&key, source.path(), "image/png").await.unwrap();
        // writing the same key twice is fine
        storage.put(&key, source.path(), "image/png").await.unwrap();

        assert_eq!(std::fs::read(storage.path_for(&key)).unwrap(), b"content");
    }
}
