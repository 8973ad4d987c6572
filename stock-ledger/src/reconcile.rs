use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{AdvanceOutcome, LocationLevelCache};
use crate::error::{add_quantity, Result};
use crate::log::TransactionLog;
use crate::types::{LocationLevel, StockKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "level", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// New transactions were folded in; carries the committed level.
    Advanced(LocationLevel),
    /// Nothing newer than the checkpoint; carries the level as read.
    UpToDate(LocationLevel),
    /// Another reconciler moved the checkpoint first; carries the stale level
    /// this attempt started from. The next attempt starts from the new one.
    Conflict(LocationLevel),
}

impl ReconcileOutcome {
    pub fn level(&self) -> LocationLevel {
        match self {
            ReconcileOutcome::Advanced(level)
            | ReconcileOutcome::UpToDate(level)
            | ReconcileOutcome::Conflict(level) => *level,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileOutcome::Conflict(_))
    }
}

/// Folds unreconciled log entries into the level cache, one key at a time.
#[derive(Clone)]
pub struct ReconciliationEngine {
    log: Arc<dyn TransactionLog>,
    cache: Arc<dyn LocationLevelCache>,
}

impl ReconciliationEngine {
    pub fn new(log: Arc<dyn TransactionLog>, cache: Arc<dyn LocationLevelCache>) -> Self {
        Self { log, cache }
    }

    pub async fn reconcile(&self, key: StockKey) -> Result<ReconcileOutcome> {
        let key = key.validate()?;
        let level = self.cache.get_or_create(key).await?;

        let max_id = match self.log.max_id(key).await? {
            Some(id) if id > level.checkpoint => id,
            _ => {
                debug!("{} already reconciled at {}", key, level.checkpoint);
                return Ok(ReconcileOutcome::UpToDate(level));
            }
        };

        let delta = self.log.sum_delta_since(key, level.checkpoint, max_id).await?;
        let new_quantity = add_quantity(key, level.quantity, delta)?;

        match self.cache.advance(key, level.checkpoint, new_quantity, max_id).await? {
            AdvanceOutcome::Applied(advanced) => {
                info!(
                    "Reconciled {}: {} -> {} (checkpoint {} -> {})",
                    key, level.quantity, advanced.quantity, level.checkpoint, advanced.checkpoint
                );
                Ok(ReconcileOutcome::Advanced(advanced))
            }
            AdvanceOutcome::Conflict => {
                debug!("Lost reconciliation race for {} from checkpoint {}", key, level.checkpoint);
                Ok(ReconcileOutcome::Conflict(level))
            }
        }
    }

    /// Reconciles each key in order, stopping at the first hard error.
    pub async fn reconcile_many(&self, keys: &[StockKey]) -> Result<Vec<(StockKey, ReconcileOutcome)>> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            outcomes.push((*key, self.reconcile(*key).await?));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StockError;
    use crate::memory::MemoryStockStore;
    use crate::types::{ItemId, LocationId, NewTransaction, TransactionId, TransactionType};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::Barrier;

    fn key(location: i64, item: i64) -> StockKey {
        StockKey::new(LocationId(location), ItemId(item)).unwrap()
    }

    fn engine(store: &Arc<MemoryStockStore>) -> ReconciliationEngine {
        ReconciliationEngine::new(store.clone(), store.clone())
    }

    async fn append(store: &MemoryStockStore, key: StockKey, delta: i64) -> TransactionId {
        store
            .append(NewTransaction::new(key.item_id, key.location_id, delta, TransactionType::Adjustment))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reconcile_folds_all_transactions() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(1, 1);
        append(&store, key, 10).await;
        let last = append(&store, key, -3).await;

        let outcome = engine(&store).reconcile(key).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Advanced(LocationLevel {
                location_id: key.location_id,
                item_id: key.item_id,
                quantity: 7,
                checkpoint: last,
            })
        );
    }

    #[tokio::test]
    async fn reconcile_without_transactions_creates_zero_row() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(3, 9);

        let outcome = engine(&store).reconcile(key).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::UpToDate(LocationLevel::zero(key)));
        assert_eq!(store.level(key), Some(LocationLevel::zero(key)));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(1, 2);
        append(&store, key, 4).await;
        let engine = engine(&store);

        let first = engine.reconcile(key).await.unwrap();
        let second = engine.reconcile(key).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Advanced(_)));
        assert_eq!(second, ReconcileOutcome::UpToDate(first.level()));
    }

    #[tokio::test]
    async fn reconcile_only_sums_past_the_checkpoint() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(2, 2);
        let other = self::key(2, 3);
        let engine = engine(&store);
        append(&store, key, 10).await;
        engine.reconcile(key).await.unwrap();
        append(&store, other, 100).await;
        let last = append(&store, key, -2).await;

        let level = engine.reconcile(key).await.unwrap().level();

        assert_eq!(level.quantity, 8);
        assert_eq!(level.checkpoint, last);
    }

    #[tokio::test]
    async fn reconcile_many_reports_each_key() {
        let store = Arc::new(MemoryStockStore::new());
        let a = key(1, 1);
        let b = key(2, 1);
        append(&store, a, 5).await;

        let outcomes = engine(&store).reconcile_many(&[a, b]).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], (k, ReconcileOutcome::Advanced(_)) if k == a));
        assert!(matches!(outcomes[1], (k, ReconcileOutcome::UpToDate(_)) if k == b));
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(1, 1);
        append(&store, key, 5).await;
        store.set_available(false);

        let err = engine(&store).reconcile(key).await.unwrap_err();

        assert!(matches!(err, StockError::StoreUnavailable(_)));
        store.set_available(true);
        assert_eq!(store.level(key), None);
    }

    #[tokio::test]
    async fn hand_built_invalid_keys_are_rejected_before_any_row_exists() {
        let store = Arc::new(MemoryStockStore::new());
        let bad = StockKey { location_id: LocationId(0), item_id: ItemId(-5) };

        let err = engine(&store).reconcile(bad).await.unwrap_err();

        assert!(matches!(err, StockError::InvalidInput(_)));
        assert_eq!(store.level(bad), None);
    }

    #[tokio::test]
    async fn overflowing_fold_fails_and_keeps_the_row() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(1, 1);
        let engine = engine(&store);
        let first = append(&store, key, i64::MAX).await;
        engine.reconcile(key).await.unwrap();
        append(&store, key, 1).await;

        let err = engine.reconcile(key).await.unwrap_err();

        assert_eq!(err, StockError::QuantityOverflow(key));
        let level = store.level(key).unwrap();
        assert_eq!((level.quantity, level.checkpoint), (i64::MAX, first));
    }

    /// Holds every reader at `sum_delta_since` until `parties` of them arrive,
    /// so they all compute from the same stale checkpoint.
    struct LockstepLog {
        inner: Arc<MemoryStockStore>,
        barrier: Barrier,
    }

    #[async_trait]
    impl TransactionLog for LockstepLog {
        async fn append(&self, entry: NewTransaction) -> Result<TransactionId> {
            self.inner.append(entry).await
        }

        async fn get(&self, id: TransactionId) -> Result<Option<crate::Transaction>> {
            self.inner.get(id).await
        }

        async fn sum_delta_since(&self, key: StockKey, since: TransactionId, upto: TransactionId) -> Result<i64> {
            self.barrier.wait().await;
            self.inner.sum_delta_since(key, since, upto).await
        }

        async fn max_id(&self, key: StockKey) -> Result<Option<TransactionId>> {
            self.inner.max_id(key).await
        }

        async fn latest_id(&self) -> Result<Option<TransactionId>> {
            self.inner.latest_id().await
        }

        async fn keys_between(&self, since: TransactionId, upto: TransactionId, limit: usize) -> Result<Vec<StockKey>> {
            self.inner.keys_between(since, upto, limit).await
        }
    }

    #[tokio::test]
    async fn concurrent_reconcilers_do_not_double_count() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(1, 1);
        append(&store, key, 10).await;
        append(&store, key, -3).await;
        let log = Arc::new(LockstepLog { inner: store.clone(), barrier: Barrier::new(2) });
        let engine = ReconciliationEngine::new(log, store.clone());

        let (a, b) = tokio::join!(engine.reconcile(key), engine.reconcile(key));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|outcome| outcome.is_conflict());

        assert!(matches!(outcomes[0], ReconcileOutcome::Advanced(_)));
        assert!(outcomes[1].is_conflict());
        assert_eq!(store.level(key).map(|level| level.quantity), Some(7));
    }

    #[tokio::test]
    async fn many_parallel_reconcilers_converge_on_true_sum() {
        let store = Arc::new(MemoryStockStore::new());
        let key = key(4, 4);
        let engine = engine(&store);
        let mut expected = 0;
        let mut tasks = Vec::new();
        for delta in [5_i64, -2, 7, 1, -4, 3, 8, -1] {
            expected += delta;
            append(&store, key, delta).await;
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move { engine.reconcile(key).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        engine.reconcile(key).await.unwrap();

        let levels: BTreeMap<_, _> = store.get_many(&[key.location_id], key.item_id).await.unwrap();
        assert_eq!(levels[&key.location_id].quantity, expected);
    }
}
