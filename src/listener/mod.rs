//! Subscription lifecycle for the order payment event.
//!
//! A `ListenerController` owns at most one live subscription. Each
//! subscription runs in its own task together with the cancellation token that
//! stops it, so a restart can tear the old task down completely before the new
//! one is opened. All listener state sits behind a single mutex that is never
//! held across an await point; a separate async lock serializes start, stop and
//! restart.

pub mod decoder;
pub mod health;
pub mod retry_queue;
pub mod source;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::listener::decoder::{TopicLayout, TransactionDecoder};
use crate::listener::retry_queue::{FailedEvent, RetryQueue};
use crate::listener::source::{EventSource, EventSourceFactory, SourceEvent, SourceSettings};
use crate::metrics::Metrics;
use crate::models::common::{Config, RetryQueueConfig};
use crate::models::datasets::logs::RawLogRecord;
use crate::models::errors::ListenerError;
use crate::storage::{PersistAck, TransactionStore};

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub source: SourceSettings,
    pub layout: TopicLayout,
    pub restart_cooldown: Duration,
    pub stale_after: Duration,
    pub retry: RetryQueueConfig,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ListenerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: SourceSettings {
                endpoint: config.listener.ws_url.clone(),
                contract_address: config.listener.contract_address.clone(),
            },
            layout: config.decoder.clone(),
            restart_cooldown: Duration::from_secs(config.listener.restart_cooldown_secs),
            stale_after: Duration::from_secs(config.health.stale_after_secs),
            retry: config.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerCounters {
    pub processed_events: u64,
    pub failed_events: u64,
    pub reconnect_attempts: u64,
    pub last_event_processed: Option<DateTime<Utc>>,
    pub decode_failures: u64,
    pub dead_lettered: u64,
}

#[derive(Debug)]
pub struct ListenerState {
    pub is_listening: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failed_events: RetryQueue,
    pub counters: ListenerCounters,
    // Incremented on every successful start; tags the live subscription
    generation: u64,
}

impl ListenerState {
    fn new(retry_capacity: usize) -> Self {
        Self {
            is_listening: false,
            start_time: None,
            last_event_time: None,
            last_error: None,
            failed_events: RetryQueue::new(retry_capacity),
            counters: ListenerCounters::default(),
            generation: 0,
        }
    }
}

struct ActiveSubscription {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(
                "Processing task for subscription {} did not exit cleanly: {}",
                self.generation, e
            );
        }
    }
}

pub struct ListenerController {
    settings: ListenerSettings,
    factory: Arc<dyn EventSourceFactory>,
    store: Arc<dyn TransactionStore>,
    metrics: Option<Metrics>,
    state: Mutex<ListenerState>,
    lifecycle: tokio::sync::Mutex<Option<ActiveSubscription>>,
}

impl ListenerController {
    pub fn new(
        settings: ListenerSettings,
        factory: Arc<dyn EventSourceFactory>,
        store: Arc<dyn TransactionStore>,
        metrics: Option<Metrics>,
    ) -> Self {
        let state = ListenerState::new(settings.retry.capacity);
        Self {
            settings,
            factory,
            store,
            metrics,
            state: Mutex::new(state),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock_state().is_listening
    }

    /// Opens the subscription and spawns its processing task. Returns as soon
    /// as the subscription is established.
    pub async fn start(self: &Arc<Self>) -> Result<(), ListenerError> {
        let mut active = self.lifecycle.lock().await;
        self.start_locked(&mut active).await
    }

    /// Tears the current subscription down, waits out the cooldown and
    /// subscribes again.
    pub async fn restart(self: &Arc<Self>) -> Result<(), ListenerError> {
        let mut active = self.lifecycle.lock().await;
        self.restart_locked(&mut active).await
    }

    /// Stops the subscription without reconnecting.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let mut active = self.lifecycle.lock().await;
        {
            let mut state = self.lock_state();
            if !state.is_listening {
                return Err(ListenerError::NotListening);
            }
            state.is_listening = false;
        }
        if let Some(subscription) = active.take() {
            subscription.shutdown().await;
        }
        info!("Event listener stopped");
        Ok(())
    }

    async fn start_locked(
        self: &Arc<Self>,
        active: &mut Option<ActiveSubscription>,
    ) -> Result<(), ListenerError> {
        if self.lock_state().is_listening {
            return Err(ListenerError::AlreadyListening);
        }

        // A subscription that died without a restart still owns a finished task
        if let Some(stale) = active.take() {
            stale.shutdown().await;
        }

        let source = match self.open_source().await {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to start event listener: {}", e);
                self.lock_state().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let generation = {
            let mut state = self.lock_state();
            state.is_listening = true;
            state.start_time = Some(Utc::now());
            state.generation += 1;
            state.generation
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run_processing_loop(
            source,
            generation,
            cancel.clone(),
        ));
        *active = Some(ActiveSubscription {
            generation,
            cancel,
            task,
        });

        info!("Listening for contract events (subscription {})", generation);
        Ok(())
    }

    async fn open_source(&self) -> Result<Box<dyn EventSource>, ListenerError> {
        let (endpoint, contract) = self.settings.source.resolve()?;
        self.factory.open(&endpoint, contract).await
    }

    async fn restart_locked(
        self: &Arc<Self>,
        active: &mut Option<ActiveSubscription>,
    ) -> Result<(), ListenerError> {
        {
            let mut state = self.lock_state();
            if !state.is_listening {
                return Err(ListenerError::NotListening);
            }
            state.is_listening = false;
        }

        info!("Restarting event listener...");
        if let Some(subscription) = active.take() {
            subscription.shutdown().await;
        }

        tokio::time::sleep(self.settings.restart_cooldown).await;

        self.lock_state().counters.reconnect_attempts += 1;
        if let Some(metrics) = &self.metrics {
            metrics.reconnects.add(1, &metrics.labels());
        }

        self.start_locked(active).await
    }

    /// Self-healing restart requested by a processing task whose subscription
    /// died. Skipped when that subscription has already been replaced.
    ///
    /// Boxed because it is spawned from the processing task it restarts.
    fn restart_after_failure(self: Arc<Self>, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut active = self.lifecycle.lock().await;
            if active.as_ref().map(|subscription| subscription.generation) != Some(generation) {
                debug!(
                    "Subscription {} was already replaced, skipping automatic restart",
                    generation
                );
                return;
            }

            if let Err(e) = self.restart_locked(&mut active).await {
                error!("Automatic restart failed: {}", e);
            }
        })
    }

    async fn run_processing_loop(
        self: Arc<Self>,
        mut source: Box<dyn EventSource>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Processing task for subscription {} cancelled", generation);
                    break;
                }
                event = source.next_event() => event,
            };

            match event {
                SourceEvent::Log(log) => self.handle_log(log).await,
                SourceEvent::Terminated(reason) => {
                    let err = ListenerError::Subscription(reason);
                    error!("{}", err);
                    self.lock_state().last_error = Some(err.to_string());
                    // Restart waits for this task to finish, so it has to run elsewhere
                    tokio::spawn(Arc::clone(&self).restart_after_failure(generation));
                    break;
                }
            }
        }

        source.close().await;
    }

    async fn handle_log(&self, log: RawLogRecord) {
        if log.removed {
            warn!(
                "Skipping log removed by chain reorganization (block {:?}, tx {:?})",
                log.block_number, log.tx_hash
            );
            return;
        }

        let started = Instant::now();

        let record = match log.decode_transaction(&self.settings.layout, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping undecodable log: {}", e);
                {
                    let mut state = self.lock_state();
                    state.counters.failed_events += 1;
                    state.counters.decode_failures += 1;
                }
                if let Some(metrics) = &self.metrics {
                    metrics.events_failed.add(1, &metrics.labels());
                    metrics.decode_failures.add(1, &metrics.labels());
                }
                return;
            }
        };

        match self.store.persist(&record).await {
            Ok(ack) => {
                self.record_processed();
                if ack == PersistAck::Inserted {
                    info!(
                        "Stored new transaction: order {} customer {} amount {} status {}",
                        record.order_id,
                        record.customer_address,
                        record.amount,
                        record.status.as_str()
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Failed to store transaction {}, queueing for retry: {}",
                    record.id, e
                );
                let (evicted, depth) = {
                    let mut state = self.lock_state();
                    state.counters.failed_events += 1;
                    state.last_error = Some(e.to_string());
                    let evicted = state.failed_events.push(FailedEvent::new(record));
                    (evicted, state.failed_events.len())
                };
                if let Some(metrics) = &self.metrics {
                    metrics.events_failed.add(1, &metrics.labels());
                    metrics.retry_queue_depth.record(depth as u64, &metrics.labels());
                }
                if let Some(evicted) = evicted {
                    self.dead_letter(evicted, "retry queue is full");
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .event_processing_time
                .record(started.elapsed().as_secs_f64(), &metrics.labels());
        }
    }

    fn record_processed(&self) {
        let now = Utc::now();
        {
            let mut state = self.lock_state();
            state.last_event_time = Some(now);
            state.counters.processed_events += 1;
            state.counters.last_event_processed = Some(now);
        }
        if let Some(metrics) = &self.metrics {
            metrics.events_processed.add(1, &metrics.labels());
        }
    }

    /// Last stop for an event that cannot stay queued. The full record is
    /// logged so it can be replayed by hand.
    fn dead_letter(&self, event: FailedEvent, reason: &str) {
        let payload = serde_json::to_string(&event.record)
            .unwrap_or_else(|e| format!("<unserializable record {}: {}>", event.record.id, e));
        error!(
            "Dead-lettering transaction {} after {} drain cycles ({}): {}",
            event.record.id, event.retry_count, reason, payload
        );
        self.lock_state().counters.dead_lettered += 1;
        if let Some(metrics) = &self.metrics {
            metrics.dead_lettered.add(1, &metrics.labels());
        }
    }

    /// Snapshot of the events waiting for the next drain cycle.
    pub fn failed_events(&self) -> Vec<FailedEvent> {
        self.lock_state().failed_events.snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
