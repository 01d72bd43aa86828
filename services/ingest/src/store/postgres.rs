use super::{MediaRegistry, NewMediaObject, UploadStore};
use crate::error::StoreError;
use crate::models::{
    Asset, AssetStatus, AssetUpdate, DIRECT_UPLOAD_SCHEME, MediaObject, Upload, UploadStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, upload_id, status, source_url, page_url, error, media_object_id, created_at, updated_at";
const MEDIA_COLUMNS: &str = "id, content_hash, file_ext, file_size, image_width, image_height, duration, frame_count, frame_rate, is_animated, has_audio, metadata, created_at";

/// PostgreSQL backed upload store and media registry
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn invalid_column(column: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Database(DatabaseError::Query(sqlx::Error::Decode(
        format!("invalid {} value: {}", column, value).into(),
    )))
}

fn upload_from_row(row: &PgRow) -> Result<Upload, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Upload {
        id: row.try_get("id")?,
        status: UploadStatus::parse(&status).ok_or_else(|| invalid_column("status", &status))?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn asset_from_row(row: &PgRow) -> Result<Asset, StoreError> {
    let code: i32 = row.try_get("status")?;
    Ok(Asset {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        status: AssetStatus::from_code(code).ok_or_else(|| invalid_column("status", code))?,
        source_url: row.try_get("source_url")?,
        page_url: row.try_get("page_url")?,
        error: row.try_get("error")?,
        media_object_id: row.try_get("media_object_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn media_from_row(row: &PgRow) -> Result<MediaObject, StoreError> {
    Ok(MediaObject {
        id: row.try_get("id")?,
        content_hash: row.try_get("content_hash")?,
        file_ext: row.try_get("file_ext")?,
        file_size: row.try_get("file_size")?,
        image_width: row.try_get("image_width")?,
        image_height: row.try_get("image_height")?,
        duration: row.try_get("duration")?,
        frame_count: row.try_get("frame_count")?,
        frame_rate: row.try_get("frame_rate")?,
        is_animated: row.try_get("is_animated")?,
        has_audio: row.try_get("has_audio")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UploadStore for PgStore {
    async fn create_upload(&self, upload: &Upload) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO uploads (id, status, error, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(upload.id)
        .bind(upload.status.as_str())
        .bind(&upload.error)
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<Upload, StoreError> {
        let row = sqlx::query(
            "SELECT id, status, error, created_at, updated_at FROM uploads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { kind: "upload", id })?;

        upload_from_row(&row)
    }

    async fn update_upload_status(
        &self,
        id: Uuid,
        status: UploadStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM uploads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound { kind: "upload", id })?;

        sqlx::query("UPDATE uploads SET status = $1, error = $2, updated_at = NOW() WHERE id = $3")
            .bind(status.as_str())
            .bind(error)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO upload_assets (id, upload_id, status, source_url, page_url, error, media_object_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(asset.id)
        .bind(asset.upload_id)
        .bind(asset.status.code())
        .bind(&asset.source_url)
        .bind(&asset.page_url)
        .bind(&asset.error)
        .bind(asset.media_object_id)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Asset, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_assets WHERE id = $1",
            ASSET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { kind: "asset", id })?;

        asset_from_row(&row)
    }

    async fn list_assets(&self, upload_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM upload_assets WHERE upload_id = $1 ORDER BY seq",
            ASSET_COLUMNS
        ))
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(asset_from_row).collect()
    }

    async fn transition_asset(
        &self,
        id: Uuid,
        from: AssetStatus,
        update: &AssetUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE upload_assets
             SET status = $1, error = $2,
                 media_object_id = COALESCE($3, media_object_id),
                 updated_at = NOW()
             WHERE id = $4 AND status = $5",
        )
        .bind(update.status.code())
        .bind(&update.error)
        .bind(update.media_object_id)
        .bind(id)
        .bind(from.code())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_stale_assets(&self, older_than: DateTime<Utc>) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM upload_assets
             WHERE status IN ($1, $2) AND updated_at < $3 AND source_url NOT LIKE $4
             ORDER BY seq",
            ASSET_COLUMNS
        ))
        .bind(AssetStatus::Pending.code())
        .bind(AssetStatus::Processing.code())
        .bind(older_than)
        .bind(format!("{}%", DIRECT_UPLOAD_SCHEME))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(asset_from_row).collect()
    }

    async fn list_unsettled_uploads(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT u.id FROM uploads u
             WHERE u.status = $1
               AND EXISTS (SELECT 1 FROM upload_assets a WHERE a.upload_id = u.id)
               AND NOT EXISTS (
                   SELECT 1 FROM upload_assets a
                   WHERE a.upload_id = u.id AND a.status IN ($2, $3)
               )",
        )
        .bind(UploadStatus::Pending.as_str())
        .bind(AssetStatus::Pending.code())
        .bind(AssetStatus::Processing.code())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl MediaRegistry for PgStore {
    async fn register(&self, media: NewMediaObject) -> Result<MediaObject, StoreError> {
        // A no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query(&format!(
            "INSERT INTO media_objects (id, content_hash, file_ext, file_size, image_width, image_height, duration, frame_count, frame_rate, is_animated, has_audio, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (content_hash) DO UPDATE SET content_hash = EXCLUDED.content_hash
             RETURNING {}",
            MEDIA_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&media.content_hash)
        .bind(&media.file_ext)
        .bind(media.file_size)
        .bind(media.image_width)
        .bind(media.image_height)
        .bind(media.duration)
        .bind(media.frame_count)
        .bind(media.frame_rate)
        .bind(media.is_animated)
        .bind(media.has_audio)
        .bind(&media.metadata)
        .fetch_one(&self.pool)
        .await?;

        media_from_row(&row)
    }

    async fn get_media(&self, id: Uuid) -> Result<MediaObject, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM media_objects WHERE id = $1",
            MEDIA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { kind: "media", id })?;

        media_from_row(&row)
    }
}
