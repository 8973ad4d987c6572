use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ItemId, Location, LocationId};

/// Read-only view of the stock locations, owned elsewhere.
#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn list_locations(&self, active_only: bool) -> Result<Vec<Location>>;

    async fn active_location_ids(&self) -> Result<Vec<LocationId>> {
        Ok(self
            .list_locations(true)
            .await?
            .into_iter()
            .map(|location| location.location_id)
            .collect())
    }
}

/// Per-item stock policy hooks.
#[async_trait]
pub trait StockClassifier: Send + Sync {
    async fn is_always_in_stock(&self, item_id: ItemId) -> Result<bool>;

    async fn is_stock_managed(&self, item_id: ItemId) -> Result<bool>;
}

/// Every item is managed and none is unconditionally in stock.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

#[async_trait]
impl StockClassifier for DefaultClassifier {
    async fn is_always_in_stock(&self, _item_id: ItemId) -> Result<bool> {
        Ok(false)
    }

    async fn is_stock_managed(&self, _item_id: ItemId) -> Result<bool> {
        Ok(true)
    }
}
