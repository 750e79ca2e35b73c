use std::sync::Arc;

use anyhow::{Context, Result, bail};
use reviewbot_domain::ingest::ReviewIngestService;
use reviewbot_domain::memory::InMemoryKeyValueStore;
use reviewbot_domain::ports::kv::KeyValueStore;
use reviewbot_domain::review::ID_ORDER_INDEX;
use reviewbot_domain::review_store::ReviewStore;
use tracing::info;

use crate::config::AppConfig;
use crate::redis_kv::RedisKeyValueStore;

pub async fn build_key_value_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.data_backend.to_ascii_lowercase().as_str() {
        "memory" => {
            info!("using in-memory key-value store");
            Ok(Arc::new(InMemoryKeyValueStore::new()))
        }
        "redis" => {
            let store = RedisKeyValueStore::connect_with_prefix(&config.redis_url, &config.kv_prefix)
                .await
                .context("failed to connect to redis key-value store")?
                .with_index(ID_ORDER_INDEX);
            info!(prefix = %config.kv_prefix, "using redis key-value store");
            Ok(Arc::new(store))
        }
        other => bail!("unsupported data_backend '{other}', expected 'memory' or 'redis'"),
    }
}

pub async fn build_review_store(config: &AppConfig) -> Result<ReviewStore> {
    let kv = build_key_value_store(config).await?;
    Ok(ReviewStore::new(kv, config.review_table.clone()))
}

pub async fn build_ingest_service(config: &AppConfig) -> Result<ReviewIngestService> {
    let store = build_review_store(config).await?;
    Ok(ReviewIngestService::new(store, config.ingest_config()))
}
