//! Sortable review identifiers.
//!
//! A review id has a short logical form over the alphabet `0-9A-Za-z` (what
//! business users type in chat, e.g. `"az"`) and a physical form stored as the
//! sort key: every character becomes its code point padded to three digits
//! (`"az"` -> `"097122"`). Physical ids of equal length compare the same way
//! as their logical forms.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::DomainResult;
use crate::error::DomainError;

pub const GROUP_WIDTH: usize = 3;

/// Logical id of the first review allocated under a business.
pub const FIRST_LOGICAL_ID: &str = "0";

pub fn is_alphabet_char(character: char) -> bool {
    character.is_ascii_alphanumeric()
}

pub fn is_alphabet_code(code: u32) -> bool {
    char::from_u32(code).is_some_and(is_alphabet_char)
}

/// Encodes a logical id into its physical digit string.
pub fn encode(logical: &str) -> DomainResult<String> {
    if logical.is_empty() {
        return Err(DomainError::Validation("review id must not be empty".into()));
    }
    let mut physical = String::with_capacity(logical.len() * GROUP_WIDTH);
    for character in logical.chars() {
        if !is_alphabet_char(character) {
            return Err(DomainError::InvalidCharacter {
                input: logical.to_string(),
                character,
            });
        }
        physical.push_str(&format!("{:03}", character as u32));
    }
    Ok(physical)
}

/// Decodes a physical digit string back into the logical id.
pub fn decode(physical: &str) -> DomainResult<String> {
    let codes = group_codes(physical)?;
    Ok(codes
        .into_iter()
        .filter_map(char::from_u32)
        .collect::<String>())
}

/// Splits a physical id into its code points, validating every group.
pub(crate) fn group_codes(physical: &str) -> DomainResult<Vec<u32>> {
    let malformed = || DomainError::MalformedId(physical.to_string());
    if physical.is_empty()
        || physical.len() % GROUP_WIDTH != 0
        || !physical.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(malformed());
    }
    physical
        .as_bytes()
        .chunks(GROUP_WIDTH)
        .map(|group| {
            let code = group
                .iter()
                .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));
            if is_alphabet_code(code) {
                Ok(code)
            } else {
                Err(malformed())
            }
        })
        .collect()
}

/// A validated review id, held in its physical form.
///
/// `Ord` follows allocation order: shorter ids first, then plain string order
/// of the physical form. For ids of equal length this is exactly the
/// lexicographic order of the stored sort keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReviewId(String);

impl ReviewId {
    pub fn from_alphanumeric(logical: &str) -> DomainResult<Self> {
        encode(logical).map(Self)
    }

    pub fn from_physical(physical: impl Into<String>) -> DomainResult<Self> {
        let physical = physical.into();
        group_codes(&physical)?;
        Ok(Self(physical))
    }

    pub fn first() -> Self {
        Self(format!("{:03}", u32::from(b'0')))
    }

    pub fn as_physical(&self) -> &str {
        &self.0
    }

    pub fn into_physical(self) -> String {
        self.0
    }

    pub fn to_alphanumeric(&self) -> String {
        self.0
            .as_bytes()
            .chunks(GROUP_WIDTH)
            .filter_map(|group| std::str::from_utf8(group).ok()?.parse::<u32>().ok())
            .filter_map(char::from_u32)
            .collect()
    }

    /// Number of logical characters.
    pub fn len(&self) -> usize {
        self.0.len() / GROUP_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Physical digits read as an integer (`"097122"` -> `97122`), when it fits.
    pub fn numeric(&self) -> Option<u128> {
        self.0.parse().ok()
    }

    /// Fixed-width key whose plain string order is allocation order.
    pub fn order_key(&self) -> String {
        format!("{:04}{}", self.len(), self.0)
    }

    pub fn next(&self) -> Self {
        Self(crate::sequence::next_physical(&self.0))
    }

    pub fn previous(&self) -> Option<Self> {
        crate::sequence::previous_physical(&self.0).map(Self)
    }
}

impl Ord for ReviewId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ReviewId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_alphanumeric())
    }
}

impl Serialize for ReviewId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ReviewId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let physical = String::deserialize(deserializer)?;
        Self::from_physical(physical).map_err(serde::de::Error::custom)
    }
}
