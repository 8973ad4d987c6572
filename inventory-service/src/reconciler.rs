use std::sync::Arc;
use std::time::Duration;
use stock_ledger::{ReconcileOutcome, ReconciliationEngine, Result, TransactionId, TransactionLog};
use tokio::time;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub advanced: usize,
    pub conflicts: usize,
    pub watermark: TransactionId,
}

/// Periodically folds new transactions into the level cache.
///
/// Works through the log in id windows of at most `batch_size` transactions,
/// starting at the watermark. Ids are allocated before commit, so a lower id
/// can become visible after a higher one. The watermark therefore trails one
/// pass behind: it never moves past the head observed on the previous pass,
/// and every id above it is scanned again. A transaction is only missed if
/// it commits more than a full interval after taking its id.
///
/// Conflicted windows hold the watermark and are retried on the next tick.
pub struct BackgroundReconciler {
    log: Arc<dyn TransactionLog>,
    engine: ReconciliationEngine,
    interval: Duration,
    batch_size: usize,
    watermark: TransactionId,
    previous_head: TransactionId,
}

impl BackgroundReconciler {
    pub fn new(log: Arc<dyn TransactionLog>, engine: ReconciliationEngine, interval: Duration, batch_size: usize) -> Self {
        Self {
            log,
            engine,
            interval,
            batch_size: batch_size.max(1),
            watermark: TransactionId::ZERO,
            previous_head: TransactionId::ZERO,
        }
    }

    pub async fn run(mut self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.run_pass().await {
                Ok(report) if report.advanced > 0 || report.conflicts > 0 => info!(
                    "Advanced {} levels ({} conflicts), watermark {}",
                    report.advanced, report.conflicts, report.watermark
                ),
                Ok(_) => {}
                Err(e) => error!("Error reconciling stock levels: {}", e),
            }
        }
    }

    pub async fn run_pass(&mut self) -> Result<PassReport> {
        let mut report = PassReport { watermark: self.watermark, ..PassReport::default() };
        let head = match self.log.latest_id().await? {
            Some(head) => head,
            None => return Ok(report),
        };
        let settled = self.previous_head.min(head);
        self.previous_head = head;

        let mut cursor = self.watermark;
        while cursor < head {
            let window = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
            let upto = TransactionId(cursor.0.saturating_add(window).min(head.0));
            let keys = self.log.keys_between(cursor, upto, self.batch_size).await?;
            let outcomes = self.engine.reconcile_many(&keys).await?;

            let conflicts = outcomes.iter().filter(|(_, outcome)| outcome.is_conflict()).count();
            report.advanced += outcomes
                .iter()
                .filter(|(_, outcome)| matches!(outcome, ReconcileOutcome::Advanced(_)))
                .count();
            report.conflicts += conflicts;
            if conflicts > 0 {
                debug!("Holding watermark at {} after {} conflicts", self.watermark, conflicts);
                break;
            }
            cursor = upto;
            self.watermark = self.watermark.max(cursor.min(settled));
        }

        report.watermark = self.watermark;
        Ok(report)
    }
}
