use async_trait::async_trait;

use crate::error::Result;
use crate::types::{NewTransaction, StockKey, Transaction, TransactionId};

/// Append-only store of quantity-changing events.
///
/// Ids are assigned at insertion and are strictly increasing across all keys.
/// For any single key, a reader that observes id `n` must also observe every
/// id below `n` for that key; stores with concurrent writers have to
/// serialize appends per key to keep that promise.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, entry: NewTransaction) -> Result<TransactionId>;

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Sum of `quantity_delta` over ids in `(since, upto]`. Zero when nothing matches.
    async fn sum_delta_since(
        &self,
        key: StockKey,
        since: TransactionId,
        upto: TransactionId,
    ) -> Result<i64>;

    async fn max_id(&self, key: StockKey) -> Result<Option<TransactionId>>;

    /// Highest id across every key.
    async fn latest_id(&self) -> Result<Option<TransactionId>>;

    /// Distinct keys touched by ids in `(since, upto]`, at most `limit` of them.
    async fn keys_between(
        &self,
        since: TransactionId,
        upto: TransactionId,
        limit: usize,
    ) -> Result<Vec<StockKey>>;
}
