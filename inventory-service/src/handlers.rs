use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use stock_ledger::{NewTransaction, Result, StockError, TransactionId, TransactionLog};
use tracing::{error, info, warn};

/// Appends stock transactions published on a Kafka topic.
pub struct TransactionConsumer {
    log: Arc<dyn TransactionLog>,
}

impl TransactionConsumer {
    pub fn new(log: Arc<dyn TransactionLog>) -> Self {
        Self { log }
    }

    /// Consumes until the stream ends or the store fails. On a store failure
    /// the offending offset is left uncommitted so a restart picks it up again.
    pub async fn run(&self, consumer: StreamConsumer) -> anyhow::Result<()> {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    match m.payload_view::<str>() {
                        Some(Ok(json_str)) => match self.handle_payload(json_str).await {
                            Ok(id) => info!("Recorded stock transaction {} from offset {}", id, m.offset()),
                            // Malformed requests are committed and dropped.
                            Err(e @ StockError::InvalidInput(_)) => warn!("Dropping stock transaction: {}", e),
                            Err(e) => return Err(e.into()),
                        },
                        Some(Err(e)) => error!("Error parsing payload: {}", e),
                        None => warn!("Skipping empty message at offset {}", m.offset()),
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
        Ok(())
    }

    pub async fn handle_payload(&self, payload: &str) -> Result<TransactionId> {
        let entry: NewTransaction = serde_json::from_str(payload)
            .map_err(|e| StockError::invalid(format!("undecodable stock transaction: {}", e)))?;
        self.log.append(entry).await
    }
}
