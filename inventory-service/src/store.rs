use async_trait::async_trait;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::PoolError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::ToPrimitive;
use std::collections::BTreeMap;
use stock_ledger::{
    AdvanceOutcome, ItemId, Location, LocationDirectory, LocationId, LocationLevel, LocationLevelCache,
    NewTransaction, Result, StockError, StockKey, Transaction, TransactionId, TransactionLog,
};
use tracing::debug;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// PostgreSQL implementation of the ledger, the level cache and the location
/// directory, sharing one connection pool.
#[derive(Clone)]
pub struct PgStockStore {
    pool: DbPool,
}

impl PgStockStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>> {
        self.pool.get().await.map_err(map_pool_error)
    }
}

fn map_pool_error(error: bb8::RunError<PoolError>) -> StockError {
    match error {
        bb8::RunError::User(e) => StockError::unavailable(format!("connection failed: {}", e)),
        bb8::RunError::TimedOut => StockError::unavailable("timed out waiting for a pooled connection"),
    }
}

fn map_diesel_error(error: diesel::result::Error) -> StockError {
    use diesel::result::Error as DieselError;

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "stock store query failed");
        }
        _ => debug!(error = %error, "stock store query failed"),
    }
    StockError::unavailable(error.to_string())
}

/// Advisory lock key for appends. Collisions only serialize unrelated keys.
fn append_lock_key(key: StockKey) -> i64 {
    key.location_id.0.rotate_left(32) ^ key.item_id.0
}

fn sum_to_i64(key: StockKey, sum: Option<BigDecimal>) -> Result<i64> {
    match sum {
        None => Ok(0),
        Some(total) => total.to_i64().ok_or(StockError::QuantityOverflow(key)),
    }
}

#[async_trait]
impl TransactionLog for PgStockStore {
    async fn append(&self, entry: NewTransaction) -> Result<TransactionId> {
        let key = entry.key()?;
        let row = NewDbTransaction::try_from(entry)?;
        let mut conn = self.conn().await?;

        // Ids come from a sequence, so two appends for the same key could
        // commit out of id order. Holding a per-key lock until commit keeps
        // every committed id prefix of a key gap-free for reconcilers.
        let id = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                        .bind::<BigInt, _>(append_lock_key(key))
                        .execute(conn)
                        .await?;

                    diesel::insert_into(stock_transactions::table)
                        .values(&row)
                        .returning(stock_transactions::id)
                        .get_result::<i64>(conn)
                        .await
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        Ok(TransactionId(id))
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let mut conn = self.conn().await?;
        let row = stock_transactions::table
            .find(id.0)
            .first::<DbTransaction>(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn sum_delta_since(&self, key: StockKey, since: TransactionId, upto: TransactionId) -> Result<i64> {
        let mut conn = self.conn().await?;
        let total = stock_transactions::table
            .filter(stock_transactions::location_id.eq(key.location_id.0))
            .filter(stock_transactions::item_id.eq(key.item_id.0))
            .filter(stock_transactions::id.gt(since.0))
            .filter(stock_transactions::id.le(upto.0))
            .select(diesel::dsl::sum(stock_transactions::quantity_delta))
            .get_result::<Option<BigDecimal>>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        sum_to_i64(key, total)
    }

    async fn max_id(&self, key: StockKey) -> Result<Option<TransactionId>> {
        let mut conn = self.conn().await?;
        let max = stock_transactions::table
            .filter(stock_transactions::location_id.eq(key.location_id.0))
            .filter(stock_transactions::item_id.eq(key.item_id.0))
            .select(diesel::dsl::max(stock_transactions::id))
            .get_result::<Option<i64>>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(max.map(TransactionId))
    }

    async fn latest_id(&self) -> Result<Option<TransactionId>> {
        let mut conn = self.conn().await?;
        let max = stock_transactions::table
            .select(diesel::dsl::max(stock_transactions::id))
            .get_result::<Option<i64>>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(max.map(TransactionId))
    }

    async fn keys_between(&self, since: TransactionId, upto: TransactionId, limit: usize) -> Result<Vec<StockKey>> {
        let mut conn = self.conn().await?;
        let rows = stock_transactions::table
            .filter(stock_transactions::id.gt(since.0))
            .filter(stock_transactions::id.le(upto.0))
            .select((stock_transactions::location_id, stock_transactions::item_id))
            .distinct()
            .order((stock_transactions::location_id.asc(), stock_transactions::item_id.asc()))
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .load::<(i64, i64)>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows
            .into_iter()
            .map(|(location_id, item_id)| StockKey {
                location_id: LocationId(location_id),
                item_id: ItemId(item_id),
            })
            .collect())
    }
}

#[async_trait]
impl LocationLevelCache for PgStockStore {
    async fn get_or_create(&self, key: StockKey) -> Result<LocationLevel> {
        let mut conn = self.conn().await?;
        diesel::insert_into(location_levels::table)
            .values(&DbLocationLevel::zero(key))
            .on_conflict((location_levels::location_id, location_levels::item_id))
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let row = location_levels::table
            .find((key.location_id.0, key.item_id.0))
            .first::<DbLocationLevel>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(row.into())
    }

    async fn get_many(&self, location_ids: &[LocationId], item_id: ItemId) -> Result<BTreeMap<LocationId, LocationLevel>> {
        let mut levels: BTreeMap<LocationId, LocationLevel> = location_ids
            .iter()
            .map(|&location_id| (location_id, LocationLevel::zero(StockKey { location_id, item_id })))
            .collect();
        if levels.is_empty() {
            return Ok(levels);
        }

        let mut conn = self.conn().await?;
        let ids: Vec<i64> = levels.keys().map(|location_id| location_id.0).collect();
        let rows = location_levels::table
            .filter(location_levels::item_id.eq(item_id.0))
            .filter(location_levels::location_id.eq_any(ids))
            .load::<DbLocationLevel>(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        for row in rows {
            let level = LocationLevel::from(row);
            levels.insert(level.location_id, level);
        }
        Ok(levels)
    }

    async fn advance(
        &self,
        key: StockKey,
        observed: TransactionId,
        new_quantity: i64,
        new_checkpoint: TransactionId,
    ) -> Result<AdvanceOutcome> {
        if new_checkpoint <= observed {
            return Ok(AdvanceOutcome::Conflict);
        }

        let mut conn = self.conn().await?;
        let updated = diesel::update(
            location_levels::table
                .filter(location_levels::location_id.eq(key.location_id.0))
                .filter(location_levels::item_id.eq(key.item_id.0))
                .filter(location_levels::checkpoint_transaction_id.eq(observed.0)),
        )
        .set((
            location_levels::quantity.eq(new_quantity),
            location_levels::checkpoint_transaction_id.eq(new_checkpoint.0),
        ))
        .get_result::<DbLocationLevel>(&mut conn)
        .await
        .optional()
        .map_err(map_diesel_error)?;

        Ok(match updated {
            Some(row) => AdvanceOutcome::Applied(row.into()),
            None => AdvanceOutcome::Conflict,
        })
    }
}

#[async_trait]
impl LocationDirectory for PgStockStore {
    async fn list_locations(&self, active_only: bool) -> Result<Vec<Location>> {
        let mut conn = self.conn().await?;
        let mut query = stock_locations::table.into_boxed::<diesel::pg::Pg>();
        if active_only {
            query = query.filter(stock_locations::active.eq(true));
        }
        let rows = query
            .order(stock_locations::location_id.asc())
            .load::<DbLocation>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Location::from).collect())
    }
}
