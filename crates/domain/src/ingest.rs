use std::time::Duration;

use tracing::{info, warn};

use crate::DomainResult;
use crate::review::{NewReview, Review};
use crate::review_store::ReviewStore;
use crate::util::{backoff_ms, now_ms};

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Allocate-then-create attempts per review; at least two are made.
    pub max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_base_ms: 10,
            retry_backoff_max_ms: 200,
        }
    }
}

/// Stores incoming reviews under freshly allocated ids.
///
/// Concurrent ingests for one business can be handed the same id; the loser
/// of the create race allocates again.
#[derive(Clone)]
pub struct ReviewIngestService {
    store: ReviewStore,
    config: IngestConfig,
}

impl ReviewIngestService {
    pub fn new(store: ReviewStore, config: IngestConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn ingest(&self, input: &NewReview) -> DomainResult<Review> {
        let business_id = input.resolve_business_id()?;
        let max_attempts = self.config.max_attempts.max(2);
        let mut attempt = 1;

        loop {
            let review_id = self.store.get_next_review_id(&business_id).await?;
            let review = input.to_review(&business_id, review_id, now_ms())?;

            match self.store.create_review(&review).await {
                Ok(()) => {
                    info!(
                        business_id = %business_id,
                        review_id = %review.review_id,
                        attempt,
                        "review ingested"
                    );
                    return Ok(review);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        business_id = %business_id,
                        review_id = %review.review_id,
                        attempt,
                        error = %err,
                        "review id collision, allocating again"
                    );
                    let delay = backoff_ms(
                        self.config.retry_backoff_base_ms,
                        attempt,
                        self.config.retry_backoff_max_ms,
                    );
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
