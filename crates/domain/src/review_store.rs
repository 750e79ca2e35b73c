use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::DomainResult;
use crate::attribute_action::{AttributeAction, AttributeActionSet};
use crate::error::DomainError;
use crate::ports::kv::{
    CancellationReason, Condition, ConditionalPut, Item, KeyValueStore, KvError, QueryRequest,
};
use crate::review::{ID_ORDER_INDEX, Review, ReviewKey, witness_key};
use crate::review_id::ReviewId;
use crate::util::now_ms;

pub const DEFAULT_REVIEW_TABLE: &str = "Review";

const LAST_UPDATED_ATTRIBUTE: &str = "lastUpdated";

/// Attributes that identify a review; they never change after creation.
const IMMUTABLE_ATTRIBUTES: [&str; 4] =
    ["businessId", "reviewId", "vendorReviewId", ID_ORDER_INDEX];

/// Persistence gateway for reviews.
///
/// Id allocation is advisory: [`ReviewStore::get_next_review_id`] does not
/// reserve anything, and two callers may be handed the same id. Uniqueness is
/// enforced by [`ReviewStore::create_review`], where exactly one of them wins
/// and the other gets [`DomainError::ReviewAlreadyExists`]. Callers retry the
/// whole allocate-then-create sequence on that error (see
/// [`crate::ingest::ReviewIngestService`]).
#[derive(Clone)]
pub struct ReviewStore {
    kv: Arc<dyn KeyValueStore>,
    table: String,
}

impl ReviewStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, table: impl Into<String>) -> Self {
        Self {
            kv,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn get_next_review_id(&self, business_id: &str) -> DomainResult<ReviewId> {
        let request = QueryRequest::partition(&self.table, business_id)
            .on_index(ID_ORDER_INDEX)
            .descending()
            .limit(1);
        let items = self.kv.query(&request).await.map_err(|err| {
            error!(business_id, error = %err, "latest review id query failed");
            DomainError::StoreUnavailable(err)
        })?;

        let Some(latest) = items.into_iter().next() else {
            debug!(business_id, "no reviews yet, allocating first review id");
            return Ok(ReviewId::first());
        };

        let current = ReviewId::from_physical(latest.key.sort_key).map_err(|err| {
            error!(business_id, error = %err, "stored review id is malformed");
            err
        })?;
        let next = current.next();
        debug!(
            business_id,
            current = %current,
            next = %next,
            "allocated next review id"
        );
        Ok(next)
    }

    /// Writes the review and its vendor review id witness in one transaction.
    pub async fn create_review(&self, review: &Review) -> DomainResult<()> {
        review.check()?;

        let primary = review.to_item()?;
        let witness = Item::key_only(witness_key(&review.business_id, &review.vendor_review_id));
        let puts = [
            ConditionalPut::if_absent(primary),
            ConditionalPut::if_absent(witness),
        ];

        match self.kv.transact_put(&self.table, &puts).await {
            Ok(()) => {
                info!(
                    business_id = %review.business_id,
                    review_id = %review.review_id,
                    vendor_review_id = %review.vendor_review_id,
                    "review created"
                );
                Ok(())
            }
            Err(KvError::TransactionCanceled { reasons }) => {
                Err(classify_cancellation(review, reasons))
            }
            Err(err) => {
                error!(
                    business_id = %review.business_id,
                    review_id = %review.review_id,
                    error = %err,
                    "create review transaction failed"
                );
                Err(DomainError::StoreUnavailable(err))
            }
        }
    }

    pub async fn get_review(&self, key: &ReviewKey) -> DomainResult<Option<Review>> {
        let item = self
            .kv
            .get(&self.table, &key.item_key())
            .await
            .map_err(|err| {
                error!(
                    business_id = %key.business_id,
                    review_id = %key.review_id,
                    error = %err,
                    "get review failed"
                );
                DomainError::StoreUnavailable(err)
            })?;
        item.map(Review::from_stored_item).transpose()
    }

    /// Applies a batch of partial updates in one conditional write and
    /// returns the updated review. `lastUpdated` is stamped unless the batch
    /// sets it itself. Nothing is written when validation fails.
    pub async fn update_attributes(
        &self,
        key: &ReviewKey,
        actions: Vec<AttributeAction>,
    ) -> DomainResult<Review> {
        let actions = AttributeActionSet::new(actions)?;
        self.apply_actions(key, &actions).await
    }

    pub async fn apply_actions(
        &self,
        key: &ReviewKey,
        actions: &AttributeActionSet,
    ) -> DomainResult<Review> {
        if let Some(name) = IMMUTABLE_ATTRIBUTES
            .iter()
            .find(|name| actions.contains(name))
        {
            return Err(DomainError::Validation(format!(
                "attribute '{name}' cannot be changed after creation"
            )));
        }

        Review::check_actions(actions)?;

        let mut expression = actions.to_update_expression();
        if !expression.touches(LAST_UPDATED_ATTRIBUTE) {
            expression
                .set
                .push((LAST_UPDATED_ATTRIBUTE.to_string(), Value::from(now_ms())));
        }

        let item = self
            .kv
            .update(
                &self.table,
                &key.item_key(),
                &expression,
                Some(Condition::KeyExists),
            )
            .await
            .map_err(|err| match err {
                KvError::ConditionalCheckFailed => DomainError::ReviewNotFound {
                    business_id: key.business_id.clone(),
                    review_id: key.review_id.to_string(),
                },
                KvError::TypeMismatch { attribute, reason } => DomainError::TypeMismatch {
                    name: attribute,
                    reason,
                },
                KvError::Validation(message) => DomainError::Validation(message),
                other => {
                    error!(
                        business_id = %key.business_id,
                        review_id = %key.review_id,
                        error = %other,
                        "update review attributes failed"
                    );
                    DomainError::StoreUnavailable(other)
                }
            })?;

        Review::from_stored_item(item)
    }

    /// Records a reply posted by a business user.
    pub async fn record_reply(
        &self,
        key: &ReviewKey,
        reply: &str,
        replied_by: &str,
        replied_at_ms: i64,
    ) -> DomainResult<Review> {
        if reply.trim().is_empty() {
            return Err(DomainError::Validation("reply must not be empty".into()));
        }
        self.update_attributes(
            key,
            vec![
                AttributeAction::update("reply", reply),
                AttributeAction::update("repliedBy", replied_by),
                AttributeAction::update("lastReplied", replied_at_ms),
                AttributeAction::update(LAST_UPDATED_ATTRIBUTE, replied_at_ms),
            ],
        )
        .await
    }
}

/// Maps per-item cancellation reasons of the create transaction, whose first
/// item is the review and second the witness, onto a domain error.
fn classify_cancellation(review: &Review, reasons: Vec<CancellationReason>) -> DomainError {
    if reasons.len() != 2 {
        error!(
            business_id = %review.business_id,
            review_id = %review.review_id,
            reasons = reasons.len(),
            "create review transaction reported an unexpected number of reasons"
        );
        return DomainError::UnknownTransaction {
            message: format!("expected 2 cancellation reasons, got {}", reasons.len()),
            source: Some(KvError::TransactionCanceled { reasons }),
        };
    }

    if reasons[0].is_condition_failure() {
        warn!(
            business_id = %review.business_id,
            review_id = %review.review_id,
            "review id already taken"
        );
        return DomainError::ReviewAlreadyExists {
            business_id: review.business_id.clone(),
            review_id: review.review_id.to_string(),
        };
    }

    if reasons[1].is_condition_failure() {
        info!(
            business_id = %review.business_id,
            vendor_review_id = %review.vendor_review_id,
            "vendor review id already stored"
        );
        return DomainError::NaturalKeyAlreadyExists {
            business_id: review.business_id.clone(),
            vendor_review_id: review.vendor_review_id.clone(),
        };
    }

    error!(
        business_id = %review.business_id,
        review_id = %review.review_id,
        reasons = ?reasons,
        "create review transaction canceled for unknown reason"
    );
    DomainError::UnknownTransaction {
        message: "create review transaction canceled".into(),
        source: Some(KvError::TransactionCanceled { reasons }),
    }
}
