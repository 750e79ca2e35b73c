use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::BoxFuture;

pub type Attributes = Map<String, Value>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition_key: String,
    pub sort_key: String,
}

impl ItemKey {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Item {
    pub fn new(key: ItemKey, attributes: Attributes) -> Self {
        Self { key, attributes }
    }

    pub fn key_only(key: ItemKey) -> Self {
        Self {
            key,
            attributes: Attributes::new(),
        }
    }

    /// Value of a sparse index attribute, if the item carries one.
    pub fn index_value(&self, index: &str) -> Option<&str> {
        self.attributes.get(index).and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    KeyExists,
    KeyNotExists,
}

impl Condition {
    pub fn holds(self, key_exists: bool) -> bool {
        match self {
            Self::KeyExists => key_exists,
            Self::KeyNotExists => !key_exists,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalPut {
    pub item: Item,
    pub condition: Option<Condition>,
}

impl ConditionalPut {
    pub fn if_absent(item: Item) -> Self {
        Self {
            item,
            condition: Some(Condition::KeyNotExists),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationCode {
    None,
    ConditionalCheckFailed,
    TransactionConflict,
    Other(String),
}

impl CancellationCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "None",
            Self::ConditionalCheckFailed => "ConditionalCheckFailed",
            Self::TransactionConflict => "TransactionConflict",
            Self::Other(code) => code,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "None" => Self::None,
            "ConditionalCheckFailed" => Self::ConditionalCheckFailed,
            "TransactionConflict" => Self::TransactionConflict,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Why one item of a canceled transaction was rejected. A reason is reported
/// for every item, in request order; items that did not fail carry `None`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationReason {
    pub code: CancellationCode,
    pub message: Option<String>,
}

impl CancellationReason {
    pub fn none() -> Self {
        Self {
            code: CancellationCode::None,
            message: None,
        }
    }

    pub fn condition_failed() -> Self {
        Self {
            code: CancellationCode::ConditionalCheckFailed,
            message: Some("the conditional request failed".into()),
        }
    }

    pub fn is_condition_failure(&self) -> bool {
        self.code == CancellationCode::ConditionalCheckFailed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    pub partition_key: String,
    /// Order by this string attribute instead of the sort key. Items without
    /// the attribute are not part of the index.
    pub index: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn partition(table: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            partition_key: partition_key.into(),
            index: None,
            descending: false,
            limit: None,
        }
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A merged partial update: every clause is applied in one atomic write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateExpression {
    pub set: Vec<(String, Value)>,
    pub remove: Vec<String>,
    pub append: Vec<(String, Vec<Value>)>,
}

impl UpdateExpression {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty() && self.append.is_empty()
    }

    pub fn touches(&self, name: &str) -> bool {
        self.set.iter().any(|(attribute, _)| attribute == name)
            || self.remove.iter().any(|attribute| attribute == name)
            || self.append.iter().any(|(attribute, _)| attribute == name)
    }
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("conditional check failed")]
    ConditionalCheckFailed,
    #[error("transaction canceled: [{}]", format_reasons(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("attribute '{attribute}' has the wrong type: {reason}")]
    TypeMismatch { attribute: String, reason: String },
    #[error("key-value serialization error: {0}")]
    Serialization(String),
    #[error("key-value store error: {0}")]
    Store(String),
}

fn format_reasons(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(|reason| reason.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, table: &str, key: &ItemKey) -> BoxFuture<'_, Result<Option<Item>, KvError>>;

    fn put(
        &self,
        table: &str,
        item: &Item,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<(), KvError>>;

    /// Writes all items or none of them.
    fn transact_put(
        &self,
        table: &str,
        puts: &[ConditionalPut],
    ) -> BoxFuture<'_, Result<(), KvError>>;

    fn query(&self, request: &QueryRequest) -> BoxFuture<'_, Result<Vec<Item>, KvError>>;

    /// Applies the expression atomically and returns the post-update item.
    fn update(
        &self,
        table: &str,
        key: &ItemKey,
        expression: &UpdateExpression,
        condition: Option<Condition>,
    ) -> BoxFuture<'_, Result<Item, KvError>>;
}

/// Applies an update expression to an attribute map.
///
/// Names may address nested maps with `.`; the parent of a `set` or `append`
/// target must already exist. `append` adds the elements not yet present in
/// the list, creating it if absent. On error `attributes` is left untouched.
pub fn apply_update(attributes: &mut Attributes, expression: &UpdateExpression) -> Result<(), KvError> {
    let mut next = attributes.clone();

    for (name, value) in &expression.set {
        let (parent, leaf) = resolve_parent(&mut next, name)?;
        parent.insert(leaf.to_string(), value.clone());
    }

    for name in &expression.remove {
        if let Ok((parent, leaf)) = resolve_parent(&mut next, name) {
            parent.remove(leaf);
        }
    }

    for (name, values) in &expression.append {
        let (parent, leaf) = resolve_parent(&mut next, name)?;
        let target = parent
            .entry(leaf.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(existing) = target else {
            return Err(KvError::TypeMismatch {
                attribute: name.clone(),
                reason: "append target is not a list".into(),
            });
        };
        for value in values {
            if !existing.contains(value) {
                existing.push(value.clone());
            }
        }
    }

    *attributes = next;
    Ok(())
}

fn resolve_parent<'a, 'n>(
    attributes: &'a mut Attributes,
    name: &'n str,
) -> Result<(&'a mut Attributes, &'n str), KvError> {
    let mut segments: Vec<&str> = name.split('.').collect();
    let leaf = segments
        .pop()
        .filter(|leaf| !leaf.is_empty())
        .ok_or_else(|| KvError::Validation(format!("invalid attribute path '{name}'")))?;

    let mut current = attributes;
    for segment in segments {
        current = match current.get_mut(segment) {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(KvError::Validation(format!(
                    "document path '{name}' is not valid for this item"
                )));
            }
        };
    }
    Ok((current, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attributes(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn applies_set_remove_and_append_together() {
        let mut item = attributes(json!({
            "reply": "old",
            "keywords": ["a"],
            "draft": true
        }));
        let expression = UpdateExpression {
            set: vec![("reply".into(), json!("thanks"))],
            remove: vec!["draft".into()],
            append: vec![("keywords".into(), vec![json!("a"), json!("b")])],
        };

        apply_update(&mut item, &expression).unwrap();

        assert_eq!(
            Value::Object(item),
            json!({ "reply": "thanks", "keywords": ["a", "b"] })
        );
    }

    #[test]
    fn append_creates_missing_list() {
        let mut item = Attributes::new();
        let expression = UpdateExpression {
            append: vec![("tags".into(), vec![json!("x")])],
            ..UpdateExpression::default()
        };
        apply_update(&mut item, &expression).unwrap();
        assert_eq!(item.get("tags"), Some(&json!(["x"])));
    }

    #[test]
    fn failed_update_leaves_item_untouched() {
        let mut item = attributes(json!({ "reply": "old", "rating": 5 }));
        let before = item.clone();
        let expression = UpdateExpression {
            set: vec![("reply".into(), json!("new"))],
            remove: vec![],
            append: vec![("rating".into(), vec![json!(1)])],
        };

        let err = apply_update(&mut item, &expression).unwrap_err();

        assert!(matches!(err, KvError::TypeMismatch { attribute, .. } if attribute == "rating"));
        assert_eq!(item, before);
    }

    #[test]
    fn nested_paths_require_existing_parent() {
        let mut item = attributes(json!({ "settings": { "auto": false } }));
        let expression = UpdateExpression {
            set: vec![("settings.auto".into(), json!(true))],
            ..UpdateExpression::default()
        };
        apply_update(&mut item, &expression).unwrap();
        assert_eq!(item["settings"]["auto"], json!(true));

        let missing = UpdateExpression {
            set: vec![("profile.name".into(), json!("x"))],
            ..UpdateExpression::default()
        };
        assert!(apply_update(&mut item, &missing).is_err());
    }

    #[test]
    fn cancellation_reasons_render_in_order() {
        let err = KvError::TransactionCanceled {
            reasons: vec![CancellationReason::none(), CancellationReason::condition_failed()],
        };
        assert_eq!(
            err.to_string(),
            "transaction canceled: [None, ConditionalCheckFailed]"
        );
    }
}
