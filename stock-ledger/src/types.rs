use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, StockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl TransactionId {
    /// Checkpoint of a cache row that has never folded anything.
    pub const ZERO: TransactionId = TransactionId(0);
}

impl ItemId {
    pub fn validate(self) -> Result<Self> {
        if self.0 > 0 {
            Ok(self)
        } else {
            Err(StockError::invalid(format!("unknown item id {}", self.0)))
        }
    }
}

impl LocationId {
    pub fn validate(self) -> Result<Self> {
        if self.0 > 0 {
            Ok(self)
        } else {
            Err(StockError::invalid(format!("invalid location id {}", self.0)))
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one materialized level row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StockKey {
    pub location_id: LocationId,
    pub item_id: ItemId,
}

impl StockKey {
    pub fn new(location_id: LocationId, item_id: ItemId) -> Result<Self> {
        Ok(Self {
            location_id: location_id.validate()?,
            item_id: item_id.validate()?,
        })
    }

    /// Re-checks a key that may have been built from its public fields.
    pub fn validate(self) -> Result<Self> {
        Self::new(self.location_id, self.item_id)
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "location {} / item {}", self.location_id, self.item_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TransactionType {
    StockIn,
    StockOut,
    Adjustment,
    Sale,
    Return,
    NewStock,
    MoveFrom,
    MoveTo,
}

impl TransactionType {
    pub fn id(self) -> i32 {
        match self {
            TransactionType::StockIn => 1,
            TransactionType::StockOut => 2,
            TransactionType::Adjustment => 3,
            TransactionType::Sale => 4,
            TransactionType::Return => 5,
            TransactionType::NewStock => 6,
            TransactionType::MoveFrom => 7,
            TransactionType::MoveTo => 8,
        }
    }
}

impl TryFrom<i32> for TransactionType {
    type Error = StockError;

    fn try_from(id: i32) -> Result<Self> {
        match id {
            1 => Ok(TransactionType::StockIn),
            2 => Ok(TransactionType::StockOut),
            3 => Ok(TransactionType::Adjustment),
            4 => Ok(TransactionType::Sale),
            5 => Ok(TransactionType::Return),
            6 => Ok(TransactionType::NewStock),
            7 => Ok(TransactionType::MoveFrom),
            8 => Ok(TransactionType::MoveTo),
            other => Err(StockError::invalid(format!("unknown transaction type {}", other))),
        }
    }
}

impl From<TransactionType> for i32 {
    fn from(kind: TransactionType) -> Self {
        kind.id()
    }
}

/// Opaque payload attached to a transaction. The core never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum TransactionMetadata {
    #[serde(rename = "v1")]
    V1 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        #[serde(default)]
        attributes: serde_json::Map<String, serde_json::Value>,
    },
}

impl TransactionMetadata {
    pub fn note(note: impl Into<String>) -> Self {
        TransactionMetadata::V1 {
            note: Some(note.into()),
            attributes: serde_json::Map::new(),
        }
    }
}

/// An append request. `id` and `occurred_at` are assigned by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub item_id: ItemId,
    pub location_id: LocationId,
    #[serde(default)]
    pub zone: String,
    pub quantity_delta: i64,
    #[serde(default)]
    pub unit_cost: BigDecimal,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub related_transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub related_order_id: Option<Uuid>,
    #[serde(default)]
    pub related_user_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Option<TransactionMetadata>,
}

impl NewTransaction {
    pub fn new(item_id: ItemId, location_id: LocationId, quantity_delta: i64, transaction_type: TransactionType) -> Self {
        Self {
            item_id,
            location_id,
            zone: String::new(),
            quantity_delta,
            unit_cost: BigDecimal::default(),
            transaction_type,
            related_transaction_id: None,
            related_order_id: None,
            related_user_id: None,
            metadata: None,
        }
    }

    pub fn key(&self) -> Result<StockKey> {
        StockKey::new(self.location_id, self.item_id)
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: BigDecimal) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    pub fn with_order(mut self, order_id: Uuid) -> Self {
        self.related_order_id = Some(order_id);
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.related_user_id = Some(user_id);
        self
    }

    pub fn related_to(mut self, transaction_id: TransactionId) -> Self {
        self.related_transaction_id = Some(transaction_id);
        self
    }

    pub fn with_metadata(mut self, metadata: TransactionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_transaction(self, id: TransactionId, occurred_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            item_id: self.item_id,
            location_id: self.location_id,
            zone: self.zone,
            quantity_delta: self.quantity_delta,
            unit_cost: self.unit_cost,
            occurred_at,
            transaction_type: self.transaction_type,
            related_transaction_id: self.related_transaction_id,
            related_order_id: self.related_order_id,
            related_user_id: self.related_user_id,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub zone: String,
    pub quantity_delta: i64,
    pub unit_cost: BigDecimal,
    pub occurred_at: DateTime<Utc>,
    pub transaction_type: TransactionType,
    pub related_transaction_id: Option<TransactionId>,
    pub related_order_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub metadata: Option<TransactionMetadata>,
}

impl Transaction {
    pub fn key(&self) -> StockKey {
        StockKey {
            location_id: self.location_id,
            item_id: self.item_id,
        }
    }
}

/// Materialized quantity for one key, correct as of `checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationLevel {
    pub location_id: LocationId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub checkpoint: TransactionId,
}

impl LocationLevel {
    pub fn zero(key: StockKey) -> Self {
        Self {
            location_id: key.location_id,
            item_id: key.item_id,
            quantity: 0,
            checkpoint: TransactionId::ZERO,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            location_id: self.location_id,
            item_id: self.item_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: LocationId,
    pub name: String,
    pub status: LocationStatus,
}

impl Location {
    pub fn is_active(&self) -> bool {
        self.status == LocationStatus::Active
    }
}
