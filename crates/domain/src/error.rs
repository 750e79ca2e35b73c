use thiserror::Error;

use crate::ports::kv::KvError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid character '{character}' in review id '{input}'")]
    InvalidCharacter { input: String, character: char },
    #[error("malformed review id '{0}'")]
    MalformedId(String),
    #[error("no attribute actions provided")]
    EmptyActionSet,
    #[error("duplicate attribute name '{0}' in action set")]
    DuplicateAttribute(String),
    #[error("type mismatch on attribute '{name}': {reason}")]
    TypeMismatch { name: String, reason: String },
    #[error("invalid attribute name '{0}'")]
    InvalidAttributeName(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("review '{review_id}' already exists for business '{business_id}'")]
    ReviewAlreadyExists {
        business_id: String,
        review_id: String,
    },
    #[error("vendor review id '{vendor_review_id}' already exists for business '{business_id}'")]
    NaturalKeyAlreadyExists {
        business_id: String,
        vendor_review_id: String,
    },
    #[error("review '{review_id}' does not exist for business '{business_id}'")]
    ReviewNotFound {
        business_id: String,
        review_id: String,
    },
    #[error("transaction failed for unknown reason: {message}")]
    UnknownTransaction {
        message: String,
        #[source]
        source: Option<KvError>,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] KvError),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl DomainError {
    /// Only a synthetic key collision is worth another allocate+create round.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReviewAlreadyExists { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCharacter { .. }
                | Self::MalformedId(_)
                | Self::EmptyActionSet
                | Self::DuplicateAttribute(_)
                | Self::TypeMismatch { .. }
                | Self::InvalidAttributeName(_)
                | Self::Validation(_)
        )
    }
}
