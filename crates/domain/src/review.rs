use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use validator::Validate;

use crate::DomainResult;
use crate::attribute_action::{AttributeAction, AttributeActionSet};
use crate::error::DomainError;
use crate::ports::kv::{Attributes, Item, ItemKey};
use crate::review_id::ReviewId;

/// Sort-key prefix of the items that reserve a vendor review id per business.
pub const UNIQUE_VENDOR_REVIEW_ID_PREFIX: &str = "#UNIQUE_VENDOR_REVIEW_ID#";

/// Sparse attribute ordering review items by allocation order.
pub const ID_ORDER_INDEX: &str = "idOrder";

const BUSINESS_ID_ATTRIBUTE: &str = "businessId";
const REVIEW_ID_ATTRIBUTE: &str = "reviewId";
const REPLY_ATTRIBUTE: &str = "reply";
const LAST_REPLIED_ATTRIBUTE: &str = "lastReplied";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vendor {
    #[default]
    Google,
}

/// `accounts/<digits>/locations/<digits>`, the parent key of reviews.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct BusinessId(String);

impl BusinessId {
    pub fn parse(value: &str) -> DomainResult<Self> {
        let segments: Vec<&str> = value.split('/').collect();
        match segments.as_slice() {
            ["accounts", account, "locations", location]
                if is_digits(account) && is_digits(location) =>
            {
                Ok(Self(value.to_string()))
            }
            _ => Err(DomainError::Validation(format!(
                "invalid business id '{value}'"
            ))),
        }
    }

    /// Extracts the business from
    /// `accounts/<a>/locations/<l>/reviews/<review>`.
    pub fn from_vendor_review_id(vendor_review_id: &str) -> DomainResult<Self> {
        let segments: Vec<&str> = vendor_review_id.split('/').collect();
        match segments.as_slice() {
            [accounts @ "accounts", account, locations @ "locations", location, "reviews", review]
                if !review.is_empty() =>
            {
                Self::parse(&format!("{accounts}/{account}/{locations}/{location}"))
            }
            _ => Err(DomainError::Validation(format!(
                "vendor review id '{vendor_review_id}' does not name a business"
            ))),
        }
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

impl fmt::Display for BusinessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BusinessId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BusinessId> for String {
    fn from(value: BusinessId) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReviewKey {
    pub business_id: String,
    pub review_id: ReviewId,
}

impl ReviewKey {
    pub fn new(business_id: impl Into<String>, review_id: ReviewId) -> Self {
        Self {
            business_id: business_id.into(),
            review_id,
        }
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.business_id.clone(), self.review_id.as_physical())
    }
}

pub fn witness_key(business_id: &str, vendor_review_id: &str) -> ItemKey {
    ItemKey::new(
        business_id,
        format!("{UNIQUE_VENDOR_REVIEW_ID_PREFIX}{vendor_review_id}"),
    )
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[validate(length(min = 1))]
    pub business_id: String,
    pub review_id: ReviewId,
    #[validate(length(min = 1))]
    pub vendor_review_id: String,
    pub vendor_event_id: String,
    pub vendor: Vendor,
    #[validate(range(min = 1, max = 5))]
    pub number_rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    pub reviewer_name: String,
    #[validate(url)]
    pub reviewer_profile_photo: String,
    #[validate(url)]
    pub reply_webhook: String,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    #[serde(rename = "reviewLastUpdated")]
    pub review_last_updated_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(rename = "lastReplied", default, skip_serializing_if = "Option::is_none")]
    pub last_replied_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_by: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated_ms: i64,
}

impl Review {
    pub fn key(&self) -> ReviewKey {
        ReviewKey::new(self.business_id.clone(), self.review_id.clone())
    }

    pub fn check(&self) -> DomainResult<()> {
        self.validate()
            .map_err(|err| DomainError::Validation(err.to_string()))?;
        if self.reply.is_some() != self.last_replied_ms.is_some() {
            return Err(DomainError::Validation(
                "reply and lastReplied must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Stored form: the key split out, every other field an attribute.
    pub fn to_item(&self) -> DomainResult<Item> {
        let value = serde_json::to_value(self).map_err(|err| {
            DomainError::Validation(format!("failed to serialize review: {err}"))
        })?;
        let Value::Object(mut attributes) = value else {
            return Err(DomainError::Validation("review is not a map".into()));
        };
        attributes.remove(BUSINESS_ID_ATTRIBUTE);
        attributes.remove(REVIEW_ID_ATTRIBUTE);
        attributes.insert(
            ID_ORDER_INDEX.to_string(),
            Value::String(self.review_id.order_key()),
        );
        Ok(Item::new(self.key().item_key(), attributes))
    }

    /// Decodes a stored item and checks it. A record that fails either step
    /// is corrupt.
    pub fn from_stored_item(item: Item) -> DomainResult<Self> {
        let review = Self::from_item(item)?;
        review.check().map_err(|err| {
            DomainError::CorruptRecord(format!(
                "review '{}' / '{}' is invalid: {err}",
                review.business_id,
                review.review_id.as_physical()
            ))
        })?;
        Ok(review)
    }

    /// Refuses a batch that would leave a stored review undecodable or
    /// invalid. Attributes outside the review schema are not checked.
    pub fn check_actions(actions: &AttributeActionSet) -> DomainResult<()> {
        let template = schema_template()?;
        let mut patched = template.clone();

        for action in actions.actions() {
            let name = action.name();
            if !template.contains_key(name) {
                continue;
            }
            match action {
                AttributeAction::Update { value, .. } => {
                    let mut single = template.clone();
                    single.insert(name.to_string(), value.clone());
                    decode_template(single).map_err(|err| DomainError::TypeMismatch {
                        name: name.to_string(),
                        reason: err.to_string(),
                    })?;
                    patched.insert(name.to_string(), value.clone());
                }
                AttributeAction::Remove { .. } => {
                    let mut single = template.clone();
                    single.remove(name);
                    if decode_template(single).is_err() {
                        return Err(DomainError::Validation(format!(
                            "attribute '{name}' is required and cannot be removed"
                        )));
                    }
                    patched.remove(name);
                }
                AttributeAction::Append { .. } => {
                    return Err(DomainError::TypeMismatch {
                        name: name.to_string(),
                        reason: "append target is not a list".into(),
                    });
                }
            }
        }

        if actions.contains(REPLY_ATTRIBUTE) != actions.contains(LAST_REPLIED_ATTRIBUTE) {
            return Err(DomainError::Validation(
                "reply and lastReplied must be changed together".into(),
            ));
        }
        decode_template(patched)
            .map_err(|err| DomainError::Validation(err.to_string()))?
            .check()
    }

    pub fn from_item(item: Item) -> DomainResult<Self> {
        let Item { key, mut attributes } = item;
        attributes.remove(ID_ORDER_INDEX);
        insert_key(&mut attributes, &key);
        serde_json::from_value(Value::Object(attributes)).map_err(|err| {
            DomainError::CorruptRecord(format!(
                "review '{}' / '{}' does not decode: {err}",
                key.partition_key, key.sort_key
            ))
        })
    }
}

/// A valid review with every optional field present, serialized.
fn schema_template() -> DomainResult<Attributes> {
    let template = Review {
        business_id: "accounts/0/locations/0".to_string(),
        review_id: ReviewId::first(),
        vendor_review_id: "accounts/0/locations/0/reviews/0".to_string(),
        vendor_event_id: String::new(),
        vendor: Vendor::default(),
        number_rating: 1,
        review: Some(String::new()),
        reviewer_name: String::new(),
        reviewer_profile_photo: "https://example.com/".to_string(),
        reply_webhook: "https://example.com/".to_string(),
        created_at_ms: 0,
        review_last_updated_ms: 0,
        reply: Some(String::new()),
        last_replied_ms: Some(0),
        replied_by: Some(String::new()),
        last_updated_ms: 0,
    };
    match serde_json::to_value(&template) {
        Ok(Value::Object(attributes)) => Ok(attributes),
        Ok(_) => Err(DomainError::Validation("review is not a map".into())),
        Err(err) => Err(DomainError::Validation(format!(
            "failed to serialize review: {err}"
        ))),
    }
}

fn decode_template(attributes: Attributes) -> Result<Review, serde_json::Error> {
    serde_json::from_value(Value::Object(attributes))
}

fn insert_key(attributes: &mut Attributes, key: &ItemKey) {
    attributes.insert(
        BUSINESS_ID_ATTRIBUTE.to_string(),
        Value::String(key.partition_key.clone()),
    );
    attributes.insert(
        REVIEW_ID_ATTRIBUTE.to_string(),
        Value::String(key.sort_key.clone()),
    );
}

/// An incoming review before an id has been allocated for it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    /// Parent key; derived from `vendor_review_id` when absent.
    #[serde(default)]
    pub business_id: Option<String>,
    pub vendor_review_id: String,
    pub vendor_event_id: String,
    #[serde(default)]
    pub vendor: Vendor,
    pub number_rating: u8,
    #[serde(default)]
    pub review: Option<String>,
    pub reviewer_name: String,
    pub reviewer_profile_photo: String,
    pub reply_webhook: String,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    #[serde(rename = "reviewLastUpdated")]
    pub review_last_updated_ms: i64,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(rename = "lastReplied", default)]
    pub last_replied_ms: Option<i64>,
}

impl NewReview {
    pub fn resolve_business_id(&self) -> DomainResult<String> {
        match self.business_id.as_deref().map(str::trim) {
            Some(business_id) if !business_id.is_empty() => Ok(business_id.to_string()),
            _ => BusinessId::from_vendor_review_id(&self.vendor_review_id).map(String::from),
        }
    }

    pub fn to_review(
        &self,
        business_id: &str,
        review_id: ReviewId,
        now_ms: i64,
    ) -> DomainResult<Review> {
        let review = Review {
            business_id: business_id.to_string(),
            review_id,
            vendor_review_id: self.vendor_review_id.clone(),
            vendor_event_id: self.vendor_event_id.clone(),
            vendor: self.vendor,
            number_rating: self.number_rating,
            review: self.review.clone(),
            reviewer_name: self.reviewer_name.clone(),
            reviewer_profile_photo: self.reviewer_profile_photo.clone(),
            reply_webhook: self.reply_webhook.clone(),
            created_at_ms: self.created_at_ms,
            review_last_updated_ms: self.review_last_updated_ms,
            reply: self.reply.clone(),
            last_replied_ms: self.last_replied_ms,
            replied_by: None,
            last_updated_ms: now_ms,
        };
        review.check()?;
        Ok(review)
    }
}
