use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub data_backend: String,
    pub redis_url: String,
    pub kv_prefix: String,
    pub review_table: String,
    pub ingest_max_attempts: u32,
    pub ingest_backoff_base_ms: u64,
    pub ingest_backoff_max_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::builder()?
            .add_source(config::Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("kv_prefix", "reviewbot:kv")?
            .set_default("review_table", "Review")?
            .set_default("ingest_max_attempts", 3)?
            .set_default("ingest_backoff_base_ms", 10)?
            .set_default("ingest_backoff_max_ms", 200)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn ingest_config(&self) -> reviewbot_domain::ingest::IngestConfig {
        reviewbot_domain::ingest::IngestConfig {
            max_attempts: self.ingest_max_attempts,
            retry_backoff_base_ms: self.ingest_backoff_base_ms,
            retry_backoff_max_ms: self.ingest_backoff_max_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_the_memory_backend() {
        let config: AppConfig = AppConfig::builder()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.data_backend, "memory");
        assert_eq!(config.review_table, "Review");
        assert_eq!(config.kv_prefix, "reviewbot:kv");
        assert_eq!(config.ingest_config().max_attempts, 3);
        assert!(!config.is_production());
    }
}
