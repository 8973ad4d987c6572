use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{ItemId, LocationId, LocationLevel, StockKey, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Applied(LocationLevel),
    /// The stored checkpoint moved since the caller observed it; nothing was written.
    Conflict,
}

/// Materialized per-(location, item) levels.
#[async_trait]
pub trait LocationLevelCache: Send + Sync {
    /// Returns the stored row, creating a zeroed one if absent. Creation is
    /// idempotent per key under concurrent callers.
    async fn get_or_create(&self, key: StockKey) -> Result<LocationLevel>;

    /// Batch read. Every requested location is present in the result; rows
    /// that do not exist come back zeroed and are not created.
    async fn get_many(
        &self,
        location_ids: &[LocationId],
        item_id: ItemId,
    ) -> Result<BTreeMap<LocationId, LocationLevel>>;

    /// Compare-and-swap on the checkpoint. Applies only when the stored
    /// checkpoint equals `observed` and `new_checkpoint > observed`.
    async fn advance(
        &self,
        key: StockKey,
        observed: TransactionId,
        new_quantity: i64,
        new_checkpoint: TransactionId,
    ) -> Result<AdvanceOutcome>;
}
