use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use stock_ledger::{
    ItemId, Location, LocationId, LocationLevel, LocationStatus, NewTransaction, StockError, StockKey, Transaction,
    TransactionId, TransactionMetadata, TransactionType,
};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct DbTransaction {
    pub id: i64,
    pub item_id: i64,
    pub location_id: i64,
    pub zone: String,
    pub quantity_delta: i64,
    pub unit_cost: BigDecimal,
    pub occurred_at: DateTime<Utc>,
    pub transaction_type_id: i32,
    pub related_transaction_id: Option<i64>,
    pub related_order_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct NewDbTransaction {
    pub item_id: i64,
    pub location_id: i64,
    pub zone: String,
    pub quantity_delta: i64,
    pub unit_cost: BigDecimal,
    pub transaction_type_id: i32,
    pub related_transaction_id: Option<i64>,
    pub related_order_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Queryable, Insertable)]
#[diesel(table_name = crate::schema::location_levels)]
pub struct DbLocationLevel {
    pub location_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub checkpoint_transaction_id: i64,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::stock_locations)]
pub struct DbLocation {
    pub location_id: i64,
    pub name: String,
    pub active: bool,
}

impl TryFrom<NewTransaction> for NewDbTransaction {
    type Error = StockError;

    fn try_from(entry: NewTransaction) -> Result<Self, Self::Error> {
        let metadata = entry
            .metadata
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StockError::invalid(format!("metadata is not serializable: {}", e)))?;

        Ok(Self {
            item_id: entry.item_id.0,
            location_id: entry.location_id.0,
            zone: entry.zone,
            quantity_delta: entry.quantity_delta,
            unit_cost: entry.unit_cost,
            transaction_type_id: entry.transaction_type.id(),
            related_transaction_id: entry.related_transaction_id.map(|id| id.0),
            related_order_id: entry.related_order_id,
            related_user_id: entry.related_user_id,
            metadata,
        })
    }
}

impl TryFrom<DbTransaction> for Transaction {
    type Error = StockError;

    fn try_from(row: DbTransaction) -> Result<Self, Self::Error> {
        let id = row.id;
        let malformed = move |what: String| StockError::unavailable(format!("malformed transaction {}: {}", id, what));
        let transaction_type = TransactionType::try_from(row.transaction_type_id).map_err(|e| malformed(e.to_string()))?;
        let metadata = row
            .metadata
            .map(serde_json::from_value::<TransactionMetadata>)
            .transpose()
            .map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            id: TransactionId(row.id),
            item_id: ItemId(row.item_id),
            location_id: LocationId(row.location_id),
            zone: row.zone,
            quantity_delta: row.quantity_delta,
            unit_cost: row.unit_cost,
            occurred_at: row.occurred_at,
            transaction_type,
            related_transaction_id: row.related_transaction_id.map(TransactionId),
            related_order_id: row.related_order_id,
            related_user_id: row.related_user_id,
            metadata,
        })
    }
}

impl DbLocationLevel {
    pub fn zero(key: StockKey) -> Self {
        Self {
            location_id: key.location_id.0,
            item_id: key.item_id.0,
            quantity: 0,
            checkpoint_transaction_id: 0,
        }
    }
}

impl From<DbLocationLevel> for LocationLevel {
    fn from(row: DbLocationLevel) -> Self {
        Self {
            location_id: LocationId(row.location_id),
            item_id: ItemId(row.item_id),
            quantity: row.quantity,
            checkpoint: TransactionId(row.checkpoint_transaction_id),
        }
    }
}

impl From<DbLocation> for Location {
    fn from(row: DbLocation) -> Self {
        Self {
            location_id: LocationId(row.location_id),
            name: row.name,
            status: if row.active { LocationStatus::Active } else { LocationStatus::Inactive },
        }
    }
}
