pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use tracing::debug;

use crate::models::datasets::transactions::TransactionRecord;
use crate::models::errors::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAck {
    Inserted,
    // Already stored by an earlier delivery of the same log
    Duplicate,
}

/// Append-only sink for decoded transactions.
///
/// Implementations report an existing id as `StoreError::DuplicateKey`;
/// `persist` turns that into a successful `PersistAck::Duplicate` so that
/// re-delivered logs are idempotent.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn persist(&self, record: &TransactionRecord) -> Result<PersistAck, StoreError> {
        match self.insert(record).await {
            Ok(()) => Ok(PersistAck::Inserted),
            Err(StoreError::DuplicateKey { id }) => {
                debug!("Transaction {} already stored, skipping duplicate", id);
                Ok(PersistAck::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}
