mod support;

use std::sync::Arc;

use reviewbot_domain::attribute_action::AttributeAction;
use reviewbot_domain::error::DomainError;
use reviewbot_domain::memory::InMemoryKeyValueStore;
use reviewbot_domain::ports::kv::{CancellationReason, KeyValueStore, KvError};
use reviewbot_domain::review::{Review, ReviewKey};
use reviewbot_domain::review_id::ReviewId;
use reviewbot_domain::review_store::ReviewStore;
use serde_json::json;

use support::{BUSINESS_ID, InstrumentedStore, RejectingStore, TABLE, new_review};

fn review(vendor: &str, id: &str) -> Review {
    new_review(vendor)
        .to_review(
            BUSINESS_ID,
            ReviewId::from_alphanumeric(id).unwrap(),
            1_700_000_000_000,
        )
        .unwrap()
}

fn memory_store() -> (InMemoryKeyValueStore, ReviewStore) {
    let kv = InMemoryKeyValueStore::new();
    let store = ReviewStore::new(Arc::new(kv.clone()), TABLE);
    (kv, store)
}

#[tokio::test]
async fn first_allocation_in_empty_partition_is_zero() {
    let (_, store) = memory_store();
    let id = store.get_next_review_id(BUSINESS_ID).await.unwrap();
    assert_eq!(id.to_alphanumeric(), "0");
    assert_eq!(id.as_physical(), "048");
}

#[tokio::test]
async fn allocation_follows_the_latest_review_and_ignores_witnesses() {
    let (_, store) = memory_store();
    store.create_review(&review("r-a", "0")).await.unwrap();
    store.create_review(&review("r-b", "1")).await.unwrap();

    let next = store.get_next_review_id(BUSINESS_ID).await.unwrap();
    assert_eq!(next.to_alphanumeric(), "2");

    let other = store
        .get_next_review_id("accounts/1/locations/9")
        .await
        .unwrap();
    assert_eq!(other.to_alphanumeric(), "0");
}

#[tokio::test]
async fn allocation_continues_past_the_last_single_character_id() {
    let (_, store) = memory_store();
    store.create_review(&review("r-y", "y")).await.unwrap();
    store.create_review(&review("r-z", "z")).await.unwrap();
    assert_eq!(
        store
            .get_next_review_id(BUSINESS_ID)
            .await
            .unwrap()
            .to_alphanumeric(),
        "00"
    );

    // "00" sorts before "z" as a plain string but is the newer id
    store.create_review(&review("r-00", "00")).await.unwrap();
    assert_eq!(
        store
            .get_next_review_id(BUSINESS_ID)
            .await
            .unwrap()
            .to_alphanumeric(),
        "01"
    );
}

#[tokio::test]
async fn create_then_get_returns_the_review() {
    let (kv, store) = memory_store();
    let created = review("r-1", "0");
    store.create_review(&created).await.unwrap();

    assert_eq!(kv.len(TABLE).await, 2);
    let fetched = store.get_review(&created.key()).await.unwrap();
    assert_eq!(fetched, Some(created));

    let missing = ReviewKey::new(BUSINESS_ID, ReviewId::from_alphanumeric("7").unwrap());
    assert_eq!(store.get_review(&missing).await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_creates_with_one_id_have_exactly_one_winner() {
    let (kv, store) = memory_store();
    let first = store.get_next_review_id(BUSINESS_ID).await.unwrap();
    let second = store.get_next_review_id(BUSINESS_ID).await.unwrap();
    assert_eq!(first, second);

    let left = new_review("r-left")
        .to_review(BUSINESS_ID, first, 1)
        .unwrap();
    let right = new_review("r-right")
        .to_review(BUSINESS_ID, second, 2)
        .unwrap();

    let (a, b) = tokio::join!(store.create_review(&left), store.create_review(&right));
    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        Err(DomainError::ReviewAlreadyExists { review_id, .. }) if review_id == "0"
    )));
    assert_eq!(kv.len(TABLE).await, 2);
}

#[tokio::test]
async fn duplicate_vendor_review_is_rejected_without_writing() {
    let (kv, store) = memory_store();
    store.create_review(&review("r-dup", "0")).await.unwrap();

    let err = store
        .create_review(&review("r-dup", "1"))
        .await
        .expect_err("vendor review id already stored");

    assert!(matches!(
        err,
        DomainError::NaturalKeyAlreadyExists { ref vendor_review_id, .. }
            if vendor_review_id.ends_with("/reviews/r-dup")
    ));
    assert!(!err.is_retryable());
    assert_eq!(kv.len(TABLE).await, 2);
}

#[tokio::test]
async fn invalid_review_is_rejected_before_any_write() {
    let kv = InstrumentedStore::new(InMemoryKeyValueStore::new());
    let store = ReviewStore::new(Arc::new(kv.clone()), TABLE);
    let mut bad = review("r-1", "0");
    bad.number_rating = 0;

    let err = store.create_review(&bad).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
    assert_eq!(kv.writes(), 0);
}

#[tokio::test]
async fn unexpected_reason_count_is_an_unknown_transaction() {
    let store = ReviewStore::new(
        Arc::new(RejectingStore {
            error: || KvError::TransactionCanceled {
                reasons: vec![CancellationReason::condition_failed()],
            },
        }),
        TABLE,
    );
    let err = store.create_review(&review("r-1", "0")).await.unwrap_err();
    assert!(matches!(err, DomainError::UnknownTransaction { .. }));
}

#[tokio::test]
async fn store_outage_surfaces_as_unavailable() {
    let store = ReviewStore::new(
        Arc::new(RejectingStore {
            error: || KvError::Unavailable("connection refused".into()),
        }),
        TABLE,
    );

    assert!(matches!(
        store.get_next_review_id(BUSINESS_ID).await,
        Err(DomainError::StoreUnavailable(_))
    ));
    assert!(matches!(
        store.create_review(&review("r-1", "0")).await,
        Err(DomainError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn update_applies_every_action_and_stamps_last_updated() {
    let (_, store) = memory_store();
    let mut created = review("r-1", "0");
    created.last_updated_ms = 5;
    store.create_review(&created).await.unwrap();

    let updated = store
        .update_attributes(
            &created.key(),
            vec![
                AttributeAction::update("ReviewerName", "Ana P."),
                AttributeAction::remove("review"),
                AttributeAction::append("keywords", json!(["ramen", "service"])),
            ],
        )
        .await
        .unwrap();

    assert_eq!(updated.reviewer_name, "Ana P.");
    assert_eq!(updated.review, None);
    assert!(updated.last_updated_ms > 5);

    let appended = store
        .update_attributes(
            &created.key(),
            vec![AttributeAction::append("keywords", json!(["ramen", "price"]))],
        )
        .await
        .unwrap();
    assert_eq!(appended.reviewer_name, "Ana P.");

    let kv_item = store.get_review(&created.key()).await.unwrap().unwrap();
    assert_eq!(kv_item, appended);
}

#[tokio::test]
async fn duplicate_attribute_batch_performs_no_write() {
    let kv = InstrumentedStore::new(InMemoryKeyValueStore::new());
    let store = ReviewStore::new(Arc::new(kv.clone()), TABLE);
    let created = review("r-1", "0");
    store.create_review(&created).await.unwrap();
    let writes = kv.writes();

    let err = store
        .update_attributes(
            &created.key(),
            vec![
                AttributeAction::update("reply", "a"),
                AttributeAction::update("reply", "b"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::DuplicateAttribute(name) if name == "reply"));

    let err = store
        .update_attributes(&created.key(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::EmptyActionSet));

    let err = store
        .update_attributes(
            &created.key(),
            vec![AttributeAction::update("vendorReviewId", "other")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    assert_eq!(kv.writes(), writes);
    assert_eq!(
        store.get_review(&created.key()).await.unwrap(),
        Some(created)
    );
}

#[tokio::test]
async fn failed_update_leaves_the_review_unchanged() {
    let kv = InstrumentedStore::new(InMemoryKeyValueStore::new());
    let store = ReviewStore::new(Arc::new(kv.clone()), TABLE);
    let created = review("r-1", "0");
    store.create_review(&created).await.unwrap();
    let before = store
        .update_attributes(&created.key(), vec![AttributeAction::update("keywords", "ramen")])
        .await
        .unwrap();

    // the stored append target holds a string, so the whole batch is refused
    let err = store
        .update_attributes(
            &created.key(),
            vec![
                AttributeAction::update("reviewerName", "changed"),
                AttributeAction::append("keywords", json!(["service"])),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::TypeMismatch { name, .. } if name == "keywords"));

    kv.fail_writes(true);
    let err = store
        .update_attributes(
            &created.key(),
            vec![AttributeAction::update("reviewerName", "changed")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::StoreUnavailable(_)));
    kv.fail_writes(false);

    assert_eq!(store.get_review(&created.key()).await.unwrap(), Some(before));
    let raw = kv.inner.get(TABLE, &created.key().item_key()).await.unwrap().unwrap();
    assert_eq!(raw.attributes["keywords"], json!("ramen"));
}

#[tokio::test]
async fn batch_breaking_the_review_schema_performs_no_write() {
    let kv = InstrumentedStore::new(InMemoryKeyValueStore::new());
    let store = ReviewStore::new(Arc::new(kv.clone()), TABLE);
    let created = review("r-1", "0");
    store.create_review(&created).await.unwrap();
    let writes = kv.writes();

    let err = store
        .update_attributes(
            &created.key(),
            vec![AttributeAction::update("numberRating", json!("five"))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::TypeMismatch { name, .. } if name == "numberRating"));

    for required in ["numberRating", "reviewerName", "lastUpdated"] {
        let err = store
            .update_attributes(&created.key(), vec![AttributeAction::remove(required)])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "remove {required}");
    }

    let err = store
        .update_attributes(&created.key(), vec![AttributeAction::update("numberRating", 9)])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let err = store
        .update_attributes(&created.key(), vec![AttributeAction::update("reply", "hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    assert_eq!(kv.writes(), writes);
    assert_eq!(
        store.get_review(&created.key()).await.unwrap(),
        Some(created)
    );
}

#[tokio::test]
async fn invalid_stored_review_reads_as_corrupt() {
    let (kv, store) = memory_store();
    let created = review("r-1", "0");
    let mut item = created.to_item().unwrap();
    item.attributes.insert("reply".to_string(), json!("thanks"));
    kv.put(TABLE, &item, None).await.unwrap();

    let err = store.get_review(&created.key()).await.unwrap_err();
    assert!(matches!(err, DomainError::CorruptRecord(_)));
}

#[tokio::test]
async fn update_of_missing_review_does_not_upsert() {
    let (kv, store) = memory_store();
    let key = ReviewKey::new(BUSINESS_ID, ReviewId::first());

    let err = store
        .update_attributes(&key, vec![AttributeAction::update("reply", "hi")])
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::ReviewNotFound { review_id, .. } if review_id == "0"));
    assert!(kv.is_empty(TABLE).await);
}

#[tokio::test]
async fn record_reply_sets_reply_fields_together() {
    let (_, store) = memory_store();
    let created = review("r-1", "0");
    store.create_review(&created).await.unwrap();

    let replied = store
        .record_reply(&created.key(), "Thank you!", "owner-7", 1_700_000_100_000)
        .await
        .unwrap();

    assert_eq!(replied.reply.as_deref(), Some("Thank you!"));
    assert_eq!(replied.replied_by.as_deref(), Some("owner-7"));
    assert_eq!(replied.last_replied_ms, Some(1_700_000_100_000));
    assert_eq!(replied.last_updated_ms, 1_700_000_100_000);

    assert!(matches!(
        store.record_reply(&created.key(), "  ", "owner-7", 0).await,
        Err(DomainError::Validation(_))
    ));
}
