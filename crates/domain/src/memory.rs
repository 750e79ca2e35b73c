use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::ports::BoxFuture;
use crate::ports::kv::{
    Attributes, CancellationReason, Condition, ConditionalPut, Item, ItemKey, KeyValueStore,
    KvError, QueryRequest, UpdateExpression, apply_update,
};

type Table = BTreeMap<ItemKey, Attributes>;

/// Key-value store held in process memory.
///
/// Every mutating call holds the write lock for its whole duration, which
/// makes conditional puts, transactions and updates atomic with respect to
/// each other and to readers.
#[derive(Clone, Debug, Default)]
pub struct InMemoryKeyValueStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items in a table, witnesses included.
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }

    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, table: &str, key: &ItemKey) -> BoxFuture<'_, Result<Option<Item>, KvError>> {
        let table = table.to_string();
        let key = key.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .get(&table)
                .and_then(|items| items.get(&key))
                .map(|attributes| Item::new(key.clone(), attributes.clone())))
        })
    }

    fn put(
        &self,
        table: &str,
        item: &Item,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let table = table.to_string();
        let item = item.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let items = tables.entry(table).or_default();
            if let Some(condition) = condition {
                if !condition.holds(items.contains_key(&item.key)) {
                    return Err(KvError::ConditionalCheckFailed);
                }
            }
            items.insert(item.key, item.attributes);
            Ok(())
        })
    }

    fn transact_put(
        &self,
        table: &str,
        puts: &[ConditionalPut],
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let table = table.to_string();
        let puts = puts.to_vec();
        let tables = self.tables.clone();
        Box::pin(async move {
            if puts.is_empty() {
                return Err(KvError::Validation("transaction has no items".into()));
            }
            let distinct = {
                let mut seen = HashSet::new();
                puts.iter().all(|put| seen.insert(&put.item.key))
            };
            if !distinct {
                return Err(KvError::Validation(
                    "transaction cannot include multiple operations on one item".into(),
                ));
            }

            let mut tables = tables.write().await;
            let items = tables.entry(table).or_default();

            let reasons: Vec<CancellationReason> = puts
                .iter()
                .map(|put| match put.condition {
                    Some(condition) if !condition.holds(items.contains_key(&put.item.key)) => {
                        CancellationReason::condition_failed()
                    }
                    _ => CancellationReason::none(),
                })
                .collect();
            if reasons.iter().any(CancellationReason::is_condition_failure) {
                return Err(KvError::TransactionCanceled { reasons });
            }

            for put in puts {
                items.insert(put.item.key, put.item.attributes);
            }
            Ok(())
        })
    }

    fn query(&self, request: &QueryRequest) -> BoxFuture<'_, Result<Vec<Item>, KvError>> {
        let request = request.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let Some(items) = tables.get(&request.table) else {
                return Ok(Vec::new());
            };

            let mut matched: Vec<Item> = items
                .iter()
                .filter(|(key, _)| key.partition_key == request.partition_key)
                .map(|(key, attributes)| Item::new(key.clone(), attributes.clone()))
                .collect();

            if let Some(index) = request.index.as_deref() {
                matched.retain(|item| item.index_value(index).is_some());
                matched.sort_by(|left, right| {
                    left.index_value(index)
                        .cmp(&right.index_value(index))
                        .then_with(|| left.key.sort_key.cmp(&right.key.sort_key))
                });
            }
            if request.descending {
                matched.reverse();
            }
            if let Some(limit) = request.limit {
                matched.truncate(limit);
            }
            Ok(matched)
        })
    }

    fn update(
        &self,
        table: &str,
        key: &ItemKey,
        expression: &UpdateExpression,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<Item, KvError>> {
        let table = table.to_string();
        let key = key.clone();
        let expression = expression.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            if expression.is_empty() {
                return Err(KvError::Validation("update expression is empty".into()));
            }
            let mut tables = tables.write().await;
            let items = tables.entry(table).or_default();
            if let Some(condition) = condition {
                if !condition.holds(items.contains_key(&key)) {
                    return Err(KvError::ConditionalCheckFailed);
                }
            }

            let mut attributes = items.get(&key).cloned().unwrap_or_default();
            apply_update(&mut attributes, &expression)?;
            items.insert(key.clone(), attributes.clone());
            Ok(Item::new(key, attributes))
        })
    }
}
