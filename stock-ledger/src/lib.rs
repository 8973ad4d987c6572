//! Append-only stock ledger with a materialized per-location level cache.
//!
//! Writers append [`Transaction`]s to a [`TransactionLog`]. The
//! [`ReconciliationEngine`] folds them into [`LocationLevel`] rows of a
//! [`LocationLevelCache`], and [`StockQueryService`] answers stock questions
//! from the cached rows plus whatever the log holds past their checkpoints.

mod cache;
mod directory;
mod error;
mod log;
mod memory;
mod query;
mod reconcile;
mod types;

pub use cache::{AdvanceOutcome, LocationLevelCache};
pub use directory::{DefaultClassifier, LocationDirectory, StockClassifier};
pub use error::{Result, StockError};
pub use log::TransactionLog;
pub use memory::MemoryStockStore;
pub use query::{LocationBreakdown, StockQueryService};
pub use reconcile::{ReconcileOutcome, ReconciliationEngine};
pub use types::{
    ItemId, Location, LocationId, LocationLevel, LocationStatus, NewTransaction, StockKey, Transaction,
    TransactionId, TransactionMetadata, TransactionType,
};
