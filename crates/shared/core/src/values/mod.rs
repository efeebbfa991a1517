use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Price value - uses Decimal for precision
pub type Price = Decimal;

/// Quantity value - uses Decimal for precision
pub type Quantity = Decimal;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Asset ticker (e.g. "BTC", "USDT")
pub type Asset = String;

const MAX_ENTITY_ID_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidEntityId {
    #[error("entity id must not be empty")]
    Empty,

    #[error("entity id longer than {MAX_ENTITY_ID_LEN} characters")]
    TooLong,

    #[error("entity id contains illegal character {0:?}")]
    IllegalCharacter(char),
}

/// Identifier of a trading entity (one trader account).
///
/// The id doubles as a storage key, so it is restricted to ASCII
/// alphanumerics plus `-`, `_`, `.` and `@`, and may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidEntityId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidEntityId::Empty);
        }
        if id.len() > MAX_ENTITY_ID_LEN {
            return Err(InvalidEntityId::TooLong);
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')))
        {
            return Err(InvalidEntityId::IllegalCharacter(c));
        }
        if id.starts_with('.') {
            return Err(InvalidEntityId::IllegalCharacter('.'));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = InvalidEntityId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Identifier of an order within one trader.
///
/// Assigned by the entity as `order-<n>`, counting placed orders from 1,
/// so replaying the log reproduces the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the `n`-th order placed by a trader (1-based)
    pub fn from_number(n: u64) -> Self {
        Self(format!("order-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
