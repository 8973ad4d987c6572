use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::LocationLevelCache;
use crate::directory::{LocationDirectory, StockClassifier};
use crate::error::{add_quantity, Result, StockError};
use crate::log::TransactionLog;
use crate::types::{ItemId, Location, LocationId, StockKey, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationBreakdown {
    pub cached_quantity: i64,
    pub last_checkpoint_id: TransactionId,
    pub unreconciled_delta: i64,
}

impl LocationBreakdown {
    pub fn quantity(&self, key: StockKey) -> Result<i64> {
        add_quantity(key, self.cached_quantity, self.unreconciled_delta)
    }
}

/// Read side of the ledger. Combines the cached level with the live log tail
/// and never writes to the cache.
#[derive(Clone)]
pub struct StockQueryService {
    log: Arc<dyn TransactionLog>,
    cache: Arc<dyn LocationLevelCache>,
    directory: Arc<dyn LocationDirectory>,
    classifier: Arc<dyn StockClassifier>,
}

impl StockQueryService {
    pub fn new(
        log: Arc<dyn TransactionLog>,
        cache: Arc<dyn LocationLevelCache>,
        directory: Arc<dyn LocationDirectory>,
        classifier: Arc<dyn StockClassifier>,
    ) -> Self {
        Self { log, cache, directory, classifier }
    }

    pub async fn get_location_breakdown(
        &self,
        item_id: ItemId,
        location_ids: &[LocationId],
    ) -> Result<BTreeMap<LocationId, LocationBreakdown>> {
        let item_id = item_id.validate()?;
        for location_id in location_ids {
            location_id.validate()?;
        }
        if location_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let levels = self.cache.get_many(location_ids, item_id).await?;
        let tails = levels.values().map(|level| async move {
            let key = level.key();
            let delta = self.unreconciled_delta(key, level.checkpoint).await?;
            Ok::<_, StockError>((
                key.location_id,
                LocationBreakdown {
                    cached_quantity: level.quantity,
                    last_checkpoint_id: level.checkpoint,
                    unreconciled_delta: delta,
                },
            ))
        });

        Ok(try_join_all(tails).await?.into_iter().collect())
    }

    async fn unreconciled_delta(&self, key: StockKey, checkpoint: TransactionId) -> Result<i64> {
        match self.log.max_id(key).await? {
            Some(max_id) if max_id > checkpoint => self.log.sum_delta_since(key, checkpoint, max_id).await,
            _ => Ok(0),
        }
    }

    pub async fn get_stock_level(&self, item_id: ItemId, location_ids: &[LocationId]) -> Result<i64> {
        let breakdown = self.get_location_breakdown(item_id, location_ids).await?;
        breakdown.iter().try_fold(0_i64, |total, (&location_id, location)| {
            let key = StockKey { location_id, item_id };
            add_quantity(key, total, location.quantity(key)?)
        })
    }

    /// Stock level across every active location in the directory.
    pub async fn get_stock_level_active(&self, item_id: ItemId) -> Result<i64> {
        let location_ids = self.directory.active_location_ids().await?;
        self.get_stock_level(item_id, &location_ids).await
    }

    pub async fn is_in_stock(&self, item_id: ItemId, location_ids: &[LocationId]) -> Result<bool> {
        Ok(self.get_stock_level(item_id, location_ids).await? > 0)
    }

    pub async fn is_always_in_stock(&self, item_id: ItemId) -> Result<bool> {
        self.classifier.is_always_in_stock(item_id.validate()?).await
    }

    pub async fn is_stock_managed(&self, item_id: ItemId) -> Result<bool> {
        self.classifier.is_stock_managed(item_id.validate()?).await
    }

    pub async fn list_locations(&self, active_only: bool) -> Result<Vec<Location>> {
        self.directory.list_locations(active_only).await
    }

    pub async fn active_location_ids(&self) -> Result<Vec<LocationId>> {
        self.directory.active_location_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DefaultClassifier;
    use crate::memory::MemoryStockStore;
    use crate::reconcile::ReconciliationEngine;
    use crate::types::{LocationStatus, NewTransaction, TransactionType};
    use async_trait::async_trait;
    use rstest::rstest;

    const A: LocationId = LocationId(1);
    const B: LocationId = LocationId(2);
    const ITEM: ItemId = ItemId(1);

    fn service(store: &Arc<MemoryStockStore>) -> StockQueryService {
        StockQueryService::new(store.clone(), store.clone(), store.clone(), Arc::new(DefaultClassifier))
    }

    async fn append(store: &MemoryStockStore, location_id: LocationId, delta: i64) -> TransactionId {
        store
            .append(NewTransaction::new(ITEM, location_id, delta, TransactionType::Adjustment))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lazy_reads_track_the_log_before_and_after_reconciliation() {
        let store = Arc::new(MemoryStockStore::new());
        let query = service(&store);
        let engine = ReconciliationEngine::new(store.clone(), store.clone());
        append(&store, A, 10).await;
        let second = append(&store, A, -3).await;

        assert_eq!(query.get_stock_level(ITEM, &[A]).await.unwrap(), 7);

        let key = StockKey::new(A, ITEM).unwrap();
        let level = engine.reconcile(key).await.unwrap().level();
        assert_eq!((level.quantity, level.checkpoint), (7, second));

        append(&store, A, -2).await;
        assert_eq!(query.get_stock_level(ITEM, &[A]).await.unwrap(), 5);
        assert_eq!(store.level(key).map(|level| level.quantity), Some(7));
    }

    #[tokio::test]
    async fn breakdown_reports_cached_and_unreconciled_parts() {
        let store = Arc::new(MemoryStockStore::new());
        let engine = ReconciliationEngine::new(store.clone(), store.clone());
        append(&store, A, 4).await;
        let checkpoint = engine.reconcile(StockKey::new(A, ITEM).unwrap()).await.unwrap().level().checkpoint;
        append(&store, A, 6).await;
        append(&store, B, 1).await;

        let breakdown = service(&store).get_location_breakdown(ITEM, &[A, B]).await.unwrap();

        assert_eq!(
            breakdown[&A],
            LocationBreakdown { cached_quantity: 4, last_checkpoint_id: checkpoint, unreconciled_delta: 6 }
        );
        assert_eq!(
            breakdown[&B],
            LocationBreakdown { cached_quantity: 0, last_checkpoint_id: TransactionId::ZERO, unreconciled_delta: 1 }
        );
    }

    #[tokio::test]
    async fn unknown_location_is_zero_not_an_error() {
        let store = Arc::new(MemoryStockStore::new());
        let breakdown = service(&store).get_location_breakdown(ITEM, &[LocationId(42)]).await.unwrap();
        assert_eq!(
            breakdown[&LocationId(42)],
            LocationBreakdown { cached_quantity: 0, last_checkpoint_id: TransactionId::ZERO, unreconciled_delta: 0 }
        );
    }

    #[tokio::test]
    async fn empty_location_set_totals_zero() {
        let store = Arc::new(MemoryStockStore::new());
        append(&store, A, 3).await;
        assert_eq!(service(&store).get_stock_level(ITEM, &[]).await.unwrap(), 0);
        assert!(!service(&store).is_in_stock(ITEM, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn cached_plus_tail_overflow_is_an_error() {
        let store = Arc::new(MemoryStockStore::new());
        append(&store, A, i64::MAX).await;
        ReconciliationEngine::new(store.clone(), store.clone())
            .reconcile(StockKey::new(A, ITEM).unwrap())
            .await
            .unwrap();
        append(&store, A, 1).await;

        let err = service(&store).get_stock_level(ITEM, &[A]).await.unwrap_err();
        assert_eq!(err, StockError::QuantityOverflow(StockKey::new(A, ITEM).unwrap()));
    }

    #[tokio::test]
    async fn totals_across_locations_overflow_instead_of_wrapping() {
        let store = Arc::new(MemoryStockStore::new());
        append(&store, A, i64::MAX).await;
        append(&store, B, 1).await;

        let err = service(&store).get_stock_level(ITEM, &[A, B]).await.unwrap_err();
        assert!(matches!(err, StockError::QuantityOverflow(_)));
        assert_eq!(service(&store).get_stock_level(ITEM, &[A]).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn reads_never_touch_the_cache() {
        let store = Arc::new(MemoryStockStore::new());
        append(&store, A, 3).await;
        let query = service(&store);

        query.get_location_breakdown(ITEM, &[A, B]).await.unwrap();
        query.get_stock_level(ITEM, &[A]).await.unwrap();
        query.is_in_stock(ITEM, &[A]).await.unwrap();

        assert_eq!(store.level(StockKey::new(A, ITEM).unwrap()), None);
        assert_eq!(store.level(StockKey::new(B, ITEM).unwrap()), None);
    }

    #[rstest]
    #[case(&[5], true)]
    #[case(&[5, -5], false)]
    #[case(&[2, -4], false)]
    #[tokio::test]
    async fn in_stock_means_strictly_positive(#[case] deltas: &[i64], #[case] expected: bool) {
        let store = Arc::new(MemoryStockStore::new());
        for delta in deltas {
            append(&store, A, *delta).await;
        }
        assert_eq!(service(&store).is_in_stock(ITEM, &[A]).await.unwrap(), expected);
    }

    #[rstest]
    #[case(ItemId(0), &[A])]
    #[case(ITEM, &[LocationId(0)])]
    #[case(ITEM, &[A, LocationId(-3)])]
    #[tokio::test]
    async fn invalid_input_is_rejected_before_store_access(#[case] item: ItemId, #[case] locations: &[LocationId]) {
        let store = Arc::new(MemoryStockStore::new());
        store.set_available(false);
        let err = service(&store).get_stock_level(item, locations).await.unwrap_err();
        assert!(matches!(err, StockError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn store_outage_propagates_from_reads() {
        let store = Arc::new(MemoryStockStore::new());
        store.set_available(false);
        let err = service(&store).get_stock_level(ITEM, &[A]).await.unwrap_err();
        assert!(matches!(err, StockError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn active_locations_drive_the_default_total() {
        let store = Arc::new(MemoryStockStore::with_locations([
            Location { location_id: A, name: "Main".to_string(), status: LocationStatus::Active },
            Location { location_id: B, name: "Closed".to_string(), status: LocationStatus::Inactive },
        ]));
        append(&store, A, 3).await;
        append(&store, B, 50).await;

        assert_eq!(service(&store).get_stock_level_active(ITEM).await.unwrap(), 3);
    }

    struct AlwaysStocked;

    #[async_trait]
    impl StockClassifier for AlwaysStocked {
        async fn is_always_in_stock(&self, _item_id: ItemId) -> Result<bool> {
            Ok(true)
        }

        async fn is_stock_managed(&self, _item_id: ItemId) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn classification_is_delegated() {
        let store = Arc::new(MemoryStockStore::new());
        assert!(!service(&store).is_always_in_stock(ITEM).await.unwrap());
        assert!(service(&store).is_stock_managed(ITEM).await.unwrap());

        let custom = StockQueryService::new(store.clone(), store.clone(), store.clone(), Arc::new(AlwaysStocked));
        assert!(custom.is_always_in_stock(ITEM).await.unwrap());
        assert!(!custom.is_stock_managed(ITEM).await.unwrap());
    }
}
