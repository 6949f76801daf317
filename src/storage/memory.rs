//! In-memory transaction store.
//!
//! Used when no MongoDB URI is configured and by the tests. All data is lost
//! when the process exits.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::datasets::transactions::TransactionRecord;
use crate::models::errors::StoreError;
use crate::storage::TransactionStore;

#[derive(Default)]
struct Inner {
    ids: HashSet<String>,
    records: Vec<TransactionRecord>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every insert fails with a
    /// backend error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stored records in insertion order.
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }

        let mut inner = self.lock();
        if !inner.ids.insert(record.id.clone()) {
            return Err(StoreError::DuplicateKey {
                id: record.id.clone(),
            });
        }
        inner.records.push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Backend("store unavailable".to_string()))
        }
    }
}
