use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::kv::UpdateExpression;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Update,
    Remove,
    Append,
}

/// One intended mutation of a stored record.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeAction {
    Update { name: String, value: Value },
    Remove { name: String },
    /// `value` must be a list; its elements are added to the stored list.
    Append { name: String, value: Value },
}

impl AttributeAction {
    pub fn update(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Update {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Update with any serializable value.
    pub fn update_serialized<T: Serialize>(name: impl Into<String>, value: &T) -> DomainResult<Self> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|err| DomainError::TypeMismatch {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        Ok(Self::Update { name, value })
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self::Remove { name: name.into() }
    }

    pub fn append(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Append {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Update { .. } => ActionKind::Update,
            Self::Remove { .. } => ActionKind::Remove,
            Self::Append { .. } => ActionKind::Append,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Update { name, .. } | Self::Remove { name } | Self::Append { name, .. } => name,
        }
    }

    fn name_mut(&mut self) -> &mut String {
        match self {
            Self::Update { name, .. } | Self::Remove { name } | Self::Append { name, .. } => name,
        }
    }

    fn validate(&self) -> DomainResult<()> {
        if let Self::Append { name, value } = self {
            if !value.is_array() {
                return Err(DomainError::TypeMismatch {
                    name: name.clone(),
                    reason: format!("append requires a list value, got {}", value_kind(value)),
                });
            }
        }
        Ok(())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Lower-cases the first letter of every `.`-separated segment, the stored
/// attribute naming convention. Empty segments are rejected.
pub fn normalize_attribute_name(name: &str) -> DomainResult<String> {
    if name.is_empty() {
        return Err(DomainError::InvalidAttributeName(name.to_string()));
    }
    let mut segments = Vec::new();
    for segment in name.split('.') {
        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return Err(DomainError::InvalidAttributeName(name.to_string()));
        };
        segments.push(first.to_lowercase().chain(chars).collect::<String>());
    }
    Ok(segments.join("."))
}

/// A validated, non-empty batch of actions with distinct attribute names.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeActionSet {
    actions: Vec<AttributeAction>,
}

impl AttributeActionSet {
    pub fn new(actions: Vec<AttributeAction>) -> DomainResult<Self> {
        validate(&actions)?;
        let mut normalized = Vec::with_capacity(actions.len());
        for mut action in actions {
            let name = normalize_attribute_name(action.name())?;
            *action.name_mut() = name;
            normalized.push(action);
        }
        // normalization can fold two spellings onto one attribute
        validate(&normalized)?;
        Ok(Self {
            actions: normalized,
        })
    }

    pub fn actions(&self) -> &[AttributeAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.iter().any(|action| action.name() == name)
    }

    /// Merges every action into one update expression.
    pub fn to_update_expression(&self) -> UpdateExpression {
        let mut expression = UpdateExpression::default();
        for action in &self.actions {
            match action {
                AttributeAction::Update { name, value } => {
                    expression.set.push((name.clone(), value.clone()));
                }
                AttributeAction::Remove { name } => expression.remove.push(name.clone()),
                AttributeAction::Append { name, value } => {
                    let values = value.as_array().cloned().unwrap_or_default();
                    expression.append.push((name.clone(), values));
                }
            }
        }
        expression
    }
}

/// Checks a batch before it reaches the store.
pub fn validate(actions: &[AttributeAction]) -> DomainResult<()> {
    if actions.is_empty() {
        return Err(DomainError::EmptyActionSet);
    }
    let mut names = HashSet::with_capacity(actions.len());
    for action in actions {
        if !names.insert(action.name()) {
            return Err(DomainError::DuplicateAttribute(action.name().to_string()));
        }
        action.validate()?;
    }
    Ok(())
}
