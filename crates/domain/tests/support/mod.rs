#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use reviewbot_domain::memory::InMemoryKeyValueStore;
use reviewbot_domain::ports::BoxFuture;
use reviewbot_domain::ports::kv::{
    Condition, ConditionalPut, Item, ItemKey, KeyValueStore, KvError, QueryRequest,
    UpdateExpression,
};
use reviewbot_domain::review::{NewReview, Vendor};

pub const TABLE: &str = "Review";
pub const BUSINESS_ID: &str = "accounts/111/locations/222";

pub fn new_review(review: &str) -> NewReview {
    NewReview {
        business_id: None,
        vendor_review_id: format!("{BUSINESS_ID}/reviews/{review}"),
        vendor_event_id: format!("evt-{review}"),
        vendor: Vendor::Google,
        number_rating: 4,
        review: Some("lovely ramen, slow service".to_string()),
        reviewer_name: "Ana".to_string(),
        reviewer_profile_photo: "https://example.com/ana.png".to_string(),
        reply_webhook: "https://hooks.example.com/reply".to_string(),
        created_at_ms: 1_700_000_000_000,
        review_last_updated_ms: 1_700_000_000_000,
        reply: None,
        last_replied_ms: None,
    }
}

/// Delegates to an in-memory store while counting writes and optionally
/// failing them.
#[derive(Clone, Default)]
pub struct InstrumentedStore {
    pub inner: InMemoryKeyValueStore,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    stale_queries: Arc<AtomicUsize>,
}

impl InstrumentedStore {
    pub fn new(inner: InMemoryKeyValueStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `count` queries see an empty partition, like a lagging read.
    pub fn serve_stale_queries(&self, count: usize) {
        self.stale_queries.store(count, Ordering::SeqCst);
    }

    fn begin_write(&self) -> Result<(), KvError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for InstrumentedStore {
    fn get(&self, table: &str, key: &ItemKey) -> BoxFuture<'_, Result<Option<Item>, KvError>> {
        self.inner.get(table, key)
    }

    fn put(
        &self,
        table: &str,
        item: &Item,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<(), KvError>> {
        if let Err(err) = self.begin_write() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.put(table, item, condition)
    }

    fn transact_put(
        &self,
        table: &str,
        puts: &[ConditionalPut],
    ) -> BoxFuture<'_, Result<(), KvError>> {
        if let Err(err) = self.begin_write() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.transact_put(table, puts)
    }

    fn query(&self, request: &QueryRequest) -> BoxFuture<'_, Result<Vec<Item>, KvError>> {
        let stale = self
            .stale_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if stale {
            return Box::pin(async { Ok(Vec::new()) });
        }
        self.inner.query(request)
    }

    fn update(
        &self,
        table: &str,
        key: &ItemKey,
        expression: &UpdateExpression,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<Item, KvError>> {
        if let Err(err) = self.begin_write() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.update(table, key, expression, condition)
    }
}

/// Answers every transaction with a fixed error.
pub struct RejectingStore {
    pub error: fn() -> KvError,
}

impl KeyValueStore for RejectingStore {
    fn get(&self, _table: &str, _key: &ItemKey) -> BoxFuture<'_, Result<Option<Item>, KvError>> {
        Box::pin(async { Ok(None) })
    }

    fn put(
        &self,
        _table: &str,
        _item: &Item,
        _condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let error = (self.error)();
        Box::pin(async move { Err(error) })
    }

    fn transact_put(
        &self,
        _table: &str,
        _puts: &[ConditionalPut],
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let error = (self.error)();
        Box::pin(async move { Err(error) })
    }

    fn query(&self, _request: &QueryRequest) -> BoxFuture<'_, Result<Vec<Item>, KvError>> {
        let error = (self.error)();
        Box::pin(async move { Err(error) })
    }

    fn update(
        &self,
        _table: &str,
        _key: &ItemKey,
        _expression: &UpdateExpression,
        _condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<Item, KvError>> {
        let error = (self.error)();
        Box::pin(async move { Err(error) })
    }
}
