//! In-process store implementing every storage trait of the core.
//!
//! A single mutex stands in for the durable store's atomicity primitives:
//! every trait operation takes it once, so each one is atomic on its own and
//! `advance` behaves as a conditional update.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{AdvanceOutcome, LocationLevelCache};
use crate::directory::LocationDirectory;
use crate::error::{Result, StockError};
use crate::log::TransactionLog;
use crate::types::{
    ItemId, Location, LocationId, LocationLevel, NewTransaction, StockKey, Transaction, TransactionId,
};

#[derive(Default)]
struct Inner {
    transactions: Vec<Transaction>,
    levels: HashMap<StockKey, LocationLevel>,
    locations: BTreeMap<LocationId, Location>,
}

pub struct MemoryStockStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let store = Self::new();
        for location in locations {
            store.put_location(location);
        }
        store
    }

    pub fn put_location(&self, location: Location) {
        self.inner.lock().locations.insert(location.location_id, location);
    }

    /// Simulates losing the backing store; every operation fails while unset.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw cache row, without creating it.
    pub fn level(&self, key: StockKey) -> Option<LocationLevel> {
        self.inner.lock().levels.get(&key).copied()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StockError::unavailable("memory store is offline"))
        }
    }
}

fn in_range(transaction: &Transaction, since: TransactionId, upto: TransactionId) -> bool {
    transaction.id > since && transaction.id <= upto
}

#[async_trait]
impl TransactionLog for MemoryStockStore {
    async fn append(&self, entry: NewTransaction) -> Result<TransactionId> {
        entry.key()?;
        self.check_available()?;
        let mut inner = self.inner.lock();
        let id = TransactionId(inner.transactions.last().map_or(0, |last| last.id.0) + 1);
        inner.transactions.push(entry.into_transaction(id, Utc::now()));
        Ok(id)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.check_available()?;
        let inner = self.inner.lock();
        // Ids are dense and start at 1.
        let found = id
            .0
            .checked_sub(1)
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| inner.transactions.get(index))
            .cloned();
        Ok(found)
    }

    async fn sum_delta_since(&self, key: StockKey, since: TransactionId, upto: TransactionId) -> Result<i64> {
        self.check_available()?;
        let inner = self.inner.lock();
        // Wide accumulator, narrowed once, like SUM over BIGINT in Postgres.
        let total: i128 = inner
            .transactions
            .iter()
            .filter(|transaction| transaction.key() == key && in_range(transaction, since, upto))
            .map(|transaction| i128::from(transaction.quantity_delta))
            .sum();
        i64::try_from(total).map_err(|_| StockError::QuantityOverflow(key))
    }

    async fn max_id(&self, key: StockKey) -> Result<Option<TransactionId>> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .find(|transaction| transaction.key() == key)
            .map(|transaction| transaction.id))
    }

    async fn latest_id(&self) -> Result<Option<TransactionId>> {
        self.check_available()?;
        Ok(self.inner.lock().transactions.last().map(|transaction| transaction.id))
    }

    async fn keys_between(&self, since: TransactionId, upto: TransactionId, limit: usize) -> Result<Vec<StockKey>> {
        self.check_available()?;
        let inner = self.inner.lock();
        let keys: BTreeSet<StockKey> = inner
            .transactions
            .iter()
            .filter(|transaction| in_range(transaction, since, upto))
            .map(Transaction::key)
            .collect();
        Ok(keys.into_iter().take(limit).collect())
    }
}

#[async_trait]
impl LocationLevelCache for MemoryStockStore {
    async fn get_or_create(&self, key: StockKey) -> Result<LocationLevel> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        Ok(*inner.levels.entry(key).or_insert_with(|| LocationLevel::zero(key)))
    }

    async fn get_many(&self, location_ids: &[LocationId], item_id: ItemId) -> Result<BTreeMap<LocationId, LocationLevel>> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(location_ids
            .iter()
            .map(|&location_id| {
                let key = StockKey { location_id, item_id };
                let level = inner.levels.get(&key).copied().unwrap_or_else(|| LocationLevel::zero(key));
                (location_id, level)
            })
            .collect())
    }

    async fn advance(
        &self,
        key: StockKey,
        observed: TransactionId,
        new_quantity: i64,
        new_checkpoint: TransactionId,
    ) -> Result<AdvanceOutcome> {
        self.check_available()?;
        if new_checkpoint <= observed {
            return Ok(AdvanceOutcome::Conflict);
        }
        let mut inner = self.inner.lock();
        match inner.levels.get_mut(&key) {
            Some(level) if level.checkpoint == observed => {
                level.quantity = new_quantity;
                level.checkpoint = new_checkpoint;
                Ok(AdvanceOutcome::Applied(*level))
            }
            _ => Ok(AdvanceOutcome::Conflict),
        }
    }
}

#[async_trait]
impl LocationDirectory for MemoryStockStore {
    async fn list_locations(&self, active_only: bool) -> Result<Vec<Location>> {
        self.check_available()?;
        let inner = self.inner.lock();
        Ok(inner
            .locations
            .values()
            .filter(|location| !active_only || location.is_active())
            .cloned()
            .collect())
    }
}
