use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::listener::ListenerController;
use crate::models::datasets::transactions::TransactionRecord;
use crate::utils::retry::retry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEvent {
    pub record: TransactionRecord,
    pub timestamp: DateTime<Utc>,
    // Number of drain cycles that have already failed for this entry
    pub retry_count: u32,
}

impl FailedEvent {
    pub fn new(record: TransactionRecord) -> Self {
        Self {
            record,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Bounded FIFO of decoded transactions whose first persist attempt failed.
#[derive(Debug)]
pub struct RetryQueue {
    capacity: usize,
    entries: VecDeque<FailedEvent>,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Appends an entry. When the queue is full the oldest entry is evicted and
    /// returned so the caller can dead-letter it.
    pub fn push(&mut self, event: FailedEvent) -> Option<FailedEvent> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(event);
        evicted
    }

    pub fn snapshot(&self) -> Vec<FailedEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes the first entry with the given record id.
    pub fn remove(&mut self, id: &str) -> Option<FailedEvent> {
        let position = self.entries.iter().position(|event| event.record.id == id)?;
        self.entries.remove(position)
    }

    /// Bumps the retry count of the first entry with the given id and returns
    /// the new count, or `None` if the entry is gone.
    pub fn mark_failed(&mut self, id: &str) -> Option<u32> {
        let event = self.entries.iter_mut().find(|event| event.record.id == id)?;
        event.retry_count += 1;
        Some(event.retry_count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub attempted: usize,
    pub persisted: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl ListenerController {
    /// Runs one drain cycle over a snapshot of the retry queue. Entries queued
    /// while the cycle runs wait for the next one.
    pub async fn drain_retry_queue(&self) -> DrainSummary {
        let pending = self.failed_events();
        let mut summary = DrainSummary {
            attempted: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return summary;
        }

        info!("Retrying {} failed events", pending.len());
        let backoff = self.settings.retry.backoff();

        for event in pending {
            let record = &event.record;
            let started = Instant::now();
            let context = format!("persist transaction {}", record.id);

            match retry(|| self.store.persist(record), &backoff, &context).await {
                Ok(_) => {
                    summary.persisted += 1;
                    let now = Utc::now();
                    let depth = {
                        let mut state = self.lock_state();
                        state.failed_events.remove(&record.id);
                        state.counters.processed_events += 1;
                        state.counters.last_event_processed = Some(now);
                        state.failed_events.len()
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.events_processed.add(1, &metrics.labels());
                        metrics.retry_queue_depth.record(depth as u64, &metrics.labels());
                        metrics
                            .event_processing_time
                            .record(started.elapsed().as_secs_f64(), &metrics.labels());
                    }
                    debug!("Recovered transaction {} from the retry queue", record.id);
                }
                Err(e) => {
                    summary.failed += 1;
                    let (retry_count, expired) = {
                        let mut state = self.lock_state();
                        state.counters.failed_events += 1;
                        state.last_error = Some(e.to_string());
                        let retry_count = state.failed_events.mark_failed(&record.id);
                        let expired = match (retry_count, self.settings.retry.max_drain_cycles) {
                            (Some(count), Some(max)) if count >= max => {
                                state.failed_events.remove(&record.id)
                            }
                            _ => None,
                        };
                        (retry_count, expired)
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.events_failed.add(1, &metrics.labels());
                    }
                    warn!(
                        "Transaction {} still failing after {} drain cycles: {}",
                        record.id,
                        retry_count.unwrap_or(event.retry_count + 1),
                        e
                    );
                    if let Some(expired) = expired {
                        summary.dead_lettered += 1;
                        self.dead_letter(expired, "exceeded maximum drain cycles");
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            let depth = self.lock_state().failed_events.len();
            metrics.retry_queue_depth.record(depth as u64, &metrics.labels());
        }

        info!(
            "Retry drain finished: {} persisted, {} still failing, {} dead-lettered",
            summary.persisted, summary.failed, summary.dead_lettered
        );
        summary
    }
}

/// Spawns the periodic drain task. The first cycle runs one full interval
/// after the call.
pub fn spawn_retry_drain(
    controller: Arc<ListenerController>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = Duration::from_secs(controller.settings.retry.drain_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Retry drain task cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    controller.drain_retry_queue().await;
                }
            }
        }
        info!("Retry drain task shut down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::transactions::TransactionStatus;

    fn event(id: &str) -> FailedEvent {
        FailedEvent::new(TransactionRecord {
            id: id.to_string(),
            order_id: 1,
            customer_address: "0x0000000000000000000000000000000000000001".to_string(),
            amount: "1".to_string(),
            timestamp: Utc::now(),
            status: TransactionStatus::Completed,
            block_number: None,
            transaction_hash: None,
            log_index: None,
        })
    }

    fn ids(queue: &RetryQueue) -> Vec<String> {
        queue.snapshot().into_iter().map(|e| e.record.id).collect()
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut queue = RetryQueue::new(2);
        assert!(queue.push(event("a")).is_none());
        assert!(queue.push(event("b")).is_none());

        let evicted = queue.push(event("c")).unwrap();

        assert_eq!(evicted.record.id, "a");
        assert_eq!(ids(&queue), vec!["b", "c"]);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_remove_and_mark_failed() {
        let mut queue = RetryQueue::new(10);
        queue.push(event("a"));
        queue.push(event("b"));

        assert_eq!(queue.mark_failed("b"), Some(1));
        assert_eq!(queue.mark_failed("b"), Some(2));
        assert_eq!(queue.mark_failed("missing"), None);

        assert_eq!(queue.remove("a").map(|e| e.record.id), Some("a".to_string()));
        assert!(queue.remove("a").is_none());
        assert_eq!(queue.snapshot()[0].retry_count, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_capacity_still_holds_one_entry() {
        let mut queue = RetryQueue::new(0);
        assert!(queue.push(event("a")).is_none());
        assert!(!queue.is_empty());
    }
}
