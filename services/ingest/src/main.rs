use anyhow::Result;
use aws_config::BehaviorVersion;
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};
use ingest::aggregator::UploadAggregator;
use ingest::config::IngestConfig;
use ingest::dispatcher::{PendingSweeper, WorkerPool};
use ingest::media_file::tools;
use ingest::processor::{AssetProcessor, Ingestor};
use ingest::resolver::{HttpResolver, S3Resolver, SchemeResolver};
use ingest::storage::{LocalStorage, MediaStorage, S3Storage};
use ingest::store::PgStore;
use sqlx::migrate::Migrator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting media ingestion service");

    let config = IngestConfig::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    if !health_check(&pool).await? {
        anyhow::bail!("database health check failed");
    }
    run_migrations(&pool, &MIGRATOR).await?;

    if !tools::video_preview_supported() {
        warn!("ffmpeg or mkvmerge not found, video previews are disabled");
    }

    let store = Arc::new(PgStore::new(pool));

    let http = HttpResolver::new(
        Duration::from_secs(config.http_timeout_secs),
        config.max_file_size,
    )?;
    let (s3_resolver, storage): (Option<S3Resolver>, Arc<dyn MediaStorage>) = if config.s3_enabled
    {
        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let s3_client = aws_sdk_s3::Client::new(&aws_config);
        (
            Some(S3Resolver::new(s3_client.clone(), config.max_file_size)),
            Arc::new(S3Storage::new(s3_client, config.media_bucket.clone())),
        )
    } else {
        (None, Arc::new(LocalStorage::new(&config.storage_root)))
    };
    let resolver = Arc::new(SchemeResolver::new(http, s3_resolver));

    let aggregator = Arc::new(UploadAggregator::new(store.clone()));
    let ingestor = Ingestor::new(store.clone(), storage, config.policy());
    let processor = AssetProcessor::new(store.clone(), resolver, aggregator.clone(), ingestor);

    let (worker_pool, workers) =
        WorkerPool::start(processor, config.max_workers, config.queue_capacity);

    let sweeper = PendingSweeper::new(
        store,
        Arc::new(worker_pool),
        aggregator,
        chrono::Duration::seconds(config.stale_after_secs),
    );
    // pick up work left over from a previous run
    sweeper.sweep().await?;
    let mut scheduler = sweeper.start(&config.sweep_schedule).await?;

    info!(workers = config.max_workers, "Media ingestion service started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down media ingestion service");

    scheduler.shutdown().await?;
    // unfinished assets are swept again on the next start
    workers.abort();

    Ok(())
}
