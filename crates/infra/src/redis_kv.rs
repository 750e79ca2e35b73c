use std::collections::{HashMap, HashSet};

use metrics::counter;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use reviewbot_domain::ports::BoxFuture;
use reviewbot_domain::ports::kv::{
    Attributes, CancellationCode, CancellationReason, Condition, ConditionalPut, Item, ItemKey,
    KeyValueStore, KvError, QueryRequest, UpdateExpression, apply_update,
};
use serde_json::Value;
use tracing::warn;

const UPDATE_RETRY_LIMIT: usize = 5;
const INDEX_MEMBER_SEPARATOR: char = '\0';

const KV_TRANSACTIONS_CANCELED_TOTAL: &str = "reviewbot_kv_transactions_canceled_total";
const KV_UPDATE_CONFLICTS_TOTAL: &str = "reviewbot_kv_update_conflicts_total";

/// Writes items with their conditions checked first. Returns one reason per
/// item when any condition fails, otherwise an empty array.
///
/// KEYS: partition hash per item.
/// ARGV: index count, index names, then (sort key, condition, payload) per item.
const PUT_SCRIPT: &str = r#"
    local index_count = tonumber(ARGV[1])
    local indexes = {}
    for i = 1, index_count do
        indexes[i] = ARGV[1 + i]
    end
    local base = 1 + index_count

    local reasons = {}
    local failed = false
    for i = 1, #KEYS do
        local offset = base + (i - 1) * 3
        local sort_key = ARGV[offset + 1]
        local condition = ARGV[offset + 2]
        local exists = redis.call('HEXISTS', KEYS[i], sort_key) == 1
        if (condition == 'exists' and not exists) or (condition == 'absent' and exists) then
            reasons[i] = 'ConditionalCheckFailed'
            failed = true
        else
            reasons[i] = 'None'
        end
    end
    if failed then
        return reasons
    end

    for i = 1, #KEYS do
        local offset = base + (i - 1) * 3
        local sort_key = ARGV[offset + 1]
        local payload = ARGV[offset + 3]
        local previous = redis.call('HGET', KEYS[i], sort_key)
        for _, name in ipairs(indexes) do
            local index_key = KEYS[i] .. ':idx:' .. name
            if previous then
                local old = cjson.decode(previous)[name]
                if type(old) == 'string' then
                    redis.call('ZREM', index_key, old .. '\0' .. sort_key)
                end
            end
            local new = cjson.decode(payload)[name]
            if type(new) == 'string' then
                redis.call('ZADD', index_key, 0, new .. '\0' .. sort_key)
            end
        end
        redis.call('HSET', KEYS[i], sort_key, payload)
    end
    return {}
"#;

/// Replaces an item only if it still holds the payload it was read with.
///
/// KEYS: partition hash.
/// ARGV: sort key, '1' if the item existed, previous payload, new payload,
/// index count, index names.
const COMPARE_AND_SET_SCRIPT: &str = r#"
    local sort_key = ARGV[1]
    local existed = ARGV[2] == '1'
    local expected = ARGV[3]
    local payload = ARGV[4]
    local index_count = tonumber(ARGV[5])

    local current = redis.call('HGET', KEYS[1], sort_key)
    if existed then
        if current ~= expected then
            return 0
        end
    elseif current then
        return 0
    end

    for i = 1, index_count do
        local name = ARGV[5 + i]
        local index_key = KEYS[1] .. ':idx:' .. name
        if current then
            local old = cjson.decode(current)[name]
            if type(old) == 'string' then
                redis.call('ZREM', index_key, old .. '\0' .. sort_key)
            end
        end
        local new = cjson.decode(payload)[name]
        if type(new) == 'string' then
            redis.call('ZADD', index_key, 0, new .. '\0' .. sort_key)
        end
    end
    redis.call('HSET', KEYS[1], sort_key, payload)
    return 1
"#;

/// Walks a lexical index and returns (sort key, payload) pairs, flattened.
///
/// KEYS: partition hash, index zset. ARGV: 'desc' or 'asc', limit (-1 for all).
const INDEX_QUERY_SCRIPT: &str = r#"
    local members
    if ARGV[1] == 'desc' then
        members = redis.call('ZREVRANGEBYLEX', KEYS[2], '+', '-', 'LIMIT', 0, ARGV[2])
    else
        members = redis.call('ZRANGEBYLEX', KEYS[2], '-', '+', 'LIMIT', 0, ARGV[2])
    end
    local result = {}
    for _, member in ipairs(members) do
        local split = string.find(member, '\0', 1, true)
        if split then
            local sort_key = string.sub(member, split + 1)
            local payload = redis.call('HGET', KEYS[1], sort_key)
            if payload then
                table.insert(result, sort_key)
                table.insert(result, payload)
            end
        end
    end
    return result
"#;

/// Key-value store on Redis.
///
/// Each partition is one hash (`{prefix}:{table}:{partition_key}`) mapping
/// sort keys to JSON attribute maps. Every configured sparse index is a
/// zero-score sorted set beside it whose members are
/// `{index value}\0{sort key}`, so lexical range order is index order.
/// Transactions and updates run as Lua scripts, which Redis executes
/// atomically.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    manager: ConnectionManager,
    prefix: String,
    indexes: Vec<String>,
}

impl RedisKeyValueStore {
    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, KvError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| KvError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| KvError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
            indexes: Vec::new(),
        })
    }

    /// Maintains a sparse index on `attribute` for every item written.
    pub fn with_index(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        if !self.indexes.contains(&attribute) {
            self.indexes.push(attribute);
        }
        self
    }

    fn partition_key(&self, table: &str, partition_key: &str) -> String {
        partition_hash_key(&self.prefix, table, partition_key)
    }

    async fn compare_and_set(
        &self,
        hash_key: &str,
        sort_key: &str,
        previous: Option<&str>,
        payload: &str,
    ) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(COMPARE_AND_SET_SCRIPT);
        let mut invocation = script.key(hash_key);
        invocation
            .arg(sort_key)
            .arg(if previous.is_some() { "1" } else { "0" })
            .arg(previous.unwrap_or_default())
            .arg(payload)
            .arg(self.indexes.len());
        for index in &self.indexes {
            invocation.arg(index);
        }
        let stored: i32 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(stored == 1)
    }
}

impl KeyValueStore for RedisKeyValueStore {
    fn get(&self, table: &str, key: &ItemKey) -> BoxFuture<'_, Result<Option<Item>, KvError>> {
        let hash_key = self.partition_key(table, &key.partition_key);
        let key = key.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let payload: Option<String> = conn
                .hget(&hash_key, &key.sort_key)
                .await
                .map_err(map_redis_error)?;
            payload
                .map(|payload| decode_attributes(&payload).map(|attributes| Item::new(key, attributes)))
                .transpose()
        })
    }

    fn put(
        &self,
        table: &str,
        item: &Item,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let put = ConditionalPut {
            item: item.clone(),
            condition,
        };
        let table = table.to_string();
        Box::pin(async move {
            match self.transact_put(&table, &[put]).await {
                Err(KvError::TransactionCanceled { .. }) => Err(KvError::ConditionalCheckFailed),
                other => other,
            }
        })
    }

    fn transact_put(
        &self,
        table: &str,
        puts: &[ConditionalPut],
    ) -> BoxFuture<'_, Result<(), KvError>> {
        let table = table.to_string();
        let puts = puts.to_vec();
        Box::pin(async move {
            validate_transaction(&puts)?;

            let script = redis::Script::new(PUT_SCRIPT);
            let mut invocation = script.prepare_invoke();
            invocation.arg(self.indexes.len());
            for index in &self.indexes {
                invocation.arg(index);
            }
            for put in &puts {
                invocation
                    .key(self.partition_key(&table, &put.item.key.partition_key))
                    .arg(&put.item.key.sort_key)
                    .arg(condition_arg(put.condition))
                    .arg(encode_attributes(&put.item.attributes)?);
            }

            let mut conn = self.manager.clone();
            let codes: Vec<String> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            if codes.is_empty() {
                return Ok(());
            }

            counter!(KV_TRANSACTIONS_CANCELED_TOTAL, "table" => table.clone()).increment(1);
            Err(KvError::TransactionCanceled {
                reasons: parse_reasons(&codes),
            })
        })
    }

    fn query(&self, request: &QueryRequest) -> BoxFuture<'_, Result<Vec<Item>, KvError>> {
        let request = request.clone();
        Box::pin(async move {
            let hash_key = self.partition_key(&request.table, &request.partition_key);
            let mut conn = self.manager.clone();

            let Some(index) = request.index.as_deref() else {
                let entries: HashMap<String, String> =
                    conn.hgetall(&hash_key).await.map_err(map_redis_error)?;
                let items = decode_entries(&request.partition_key, entries.into_iter().collect())?;
                return Ok(order_by_sort_key(items, request.descending, request.limit));
            };

            if !self.indexes.iter().any(|known| known == index) {
                return Err(KvError::Validation(format!("index '{index}' is not maintained")));
            }
            let flat: Vec<String> = redis::Script::new(INDEX_QUERY_SCRIPT)
                .key(&hash_key)
                .key(index_key(&hash_key, index))
                .arg(if request.descending { "desc" } else { "asc" })
                .arg(request.limit.map_or(-1, |limit| limit as i64))
                .invoke_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            let entries = flat
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            decode_entries(&request.partition_key, entries)
        })
    }

    fn update(
        &self,
        table: &str,
        key: &ItemKey,
        expression: &UpdateExpression,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<Item, KvError>> {
        let hash_key = self.partition_key(table, &key.partition_key);
        let table = table.to_string();
        let key = key.clone();
        let expression = expression.clone();
        Box::pin(async move {
            if expression.is_empty() {
                return Err(KvError::Validation("update expression is empty".into()));
            }

            for attempt in 0..UPDATE_RETRY_LIMIT {
                let mut conn = self.manager.clone();
                let previous: Option<String> = conn
                    .hget(&hash_key, &key.sort_key)
                    .await
                    .map_err(map_redis_error)?;
                if let Some(condition) = condition {
                    if !condition.holds(previous.is_some()) {
                        return Err(KvError::ConditionalCheckFailed);
                    }
                }

                let mut attributes = match previous.as_deref() {
                    Some(payload) => decode_attributes(payload)?,
                    None => Attributes::new(),
                };
                apply_update(&mut attributes, &expression)?;
                let payload = encode_attributes(&attributes)?;

                if self
                    .compare_and_set(&hash_key, &key.sort_key, previous.as_deref(), &payload)
                    .await?
                {
                    return Ok(Item::new(key, attributes));
                }

                counter!(KV_UPDATE_CONFLICTS_TOTAL, "table" => table.clone()).increment(1);
                warn!(
                    table = %table,
                    partition_key = %key.partition_key,
                    sort_key = %key.sort_key,
                    attempt = attempt + 1,
                    "concurrent write during update, retrying"
                );
            }

            Err(KvError::Store(format!(
                "update of '{}' lost {UPDATE_RETRY_LIMIT} races in a row",
                key.sort_key
            )))
        })
    }
}

fn map_redis_error(err: RedisError) -> KvError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        KvError::Unavailable(err.to_string())
    } else {
        KvError::Store(err.to_string())
    }
}

fn partition_hash_key(prefix: &str, table: &str, partition_key: &str) -> String {
    format!("{prefix}:{table}:{partition_key}")
}

fn index_key(hash_key: &str, index: &str) -> String {
    format!("{hash_key}:idx:{index}")
}

fn condition_arg(condition: Option<Condition>) -> &'static str {
    match condition {
        Some(Condition::KeyExists) => "exists",
        Some(Condition::KeyNotExists) => "absent",
        None => "none",
    }
}

fn validate_transaction(puts: &[ConditionalPut]) -> Result<(), KvError> {
    if puts.is_empty() {
        return Err(KvError::Validation("transaction has no items".into()));
    }
    let mut seen = HashSet::new();
    if !puts.iter().all(|put| seen.insert(&put.item.key)) {
        return Err(KvError::Validation(
            "transaction cannot include multiple operations on one item".into(),
        ));
    }
    for put in puts {
        if put.item.key.sort_key.contains(INDEX_MEMBER_SEPARATOR) {
            return Err(KvError::Validation(format!(
                "sort key '{}' contains a NUL character",
                put.item.key.sort_key.escape_default()
            )));
        }
    }
    Ok(())
}

fn parse_reasons(codes: &[String]) -> Vec<CancellationReason> {
    codes
        .iter()
        .map(|code| match CancellationCode::parse(code) {
            CancellationCode::ConditionalCheckFailed => CancellationReason::condition_failed(),
            CancellationCode::None => CancellationReason::none(),
            code => CancellationReason { code, message: None },
        })
        .collect()
}

fn encode_attributes(attributes: &Attributes) -> Result<String, KvError> {
    serde_json::to_string(attributes).map_err(|err| KvError::Serialization(err.to_string()))
}

fn decode_attributes(payload: &str) -> Result<Attributes, KvError> {
    match serde_json::from_str(payload) {
        Ok(Value::Object(attributes)) => Ok(attributes),
        Ok(_) => Err(KvError::Serialization("stored item is not a map".into())),
        Err(err) => Err(KvError::Serialization(err.to_string())),
    }
}

fn decode_entries(partition_key: &str, entries: Vec<(String, String)>) -> Result<Vec<Item>, KvError> {
    entries
        .into_iter()
        .map(|(sort_key, payload)| {
            decode_attributes(&payload)
                .map(|attributes| Item::new(ItemKey::new(partition_key, sort_key), attributes))
        })
        .collect()
}

fn order_by_sort_key(mut items: Vec<Item>, descending: bool, limit: Option<usize>) -> Vec<Item> {
    items.sort_by(|left, right| left.key.sort_key.cmp(&right.key.sort_key));
    if descending {
        items.reverse();
    }
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}
