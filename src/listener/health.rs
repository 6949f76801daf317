use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::listener::{ListenerController, ListenerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    // Never started
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub is_healthy: bool,
    pub is_listening: bool,
    pub last_event_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    pub reconnect_attempts: u64,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed_events: u64,
    pub failed_events: u64,
    pub reconnect_attempts: u64,
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    pub last_event_processed: Option<DateTime<Utc>>,
    pub decode_failures: u64,
    pub dead_lettered: u64,
    pub queued_events: usize,
}

fn elapsed_secs(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> u64 {
    since
        .map(|since| (now - since).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

impl ListenerState {
    pub fn health(&self, now: DateTime<Utc>, stale_after: Duration) -> HealthReport {
        // Before the first event the subscription start is the reference point
        let reference = self.last_event_time.or(self.start_time);
        let fresh = reference
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
            .is_some_and(|age| age < stale_after);
        let is_healthy = self.is_listening && fresh;

        let status = if is_healthy {
            HealthStatus::Healthy
        } else if self.start_time.is_none() {
            HealthStatus::Down
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            is_healthy,
            is_listening: self.is_listening,
            last_event_time: self.last_event_time,
            start_time: self.start_time,
            uptime_secs: elapsed_secs(now, self.start_time),
            reconnect_attempts: self.counters.reconnect_attempts,
            last_error: self.last_error.clone(),
        }
    }

    pub fn metrics_snapshot(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_events: self.counters.processed_events,
            failed_events: self.counters.failed_events,
            reconnect_attempts: self.counters.reconnect_attempts,
            uptime_secs: elapsed_secs(now, self.start_time),
            last_event_processed: self.counters.last_event_processed,
            decode_failures: self.counters.decode_failures,
            dead_lettered: self.counters.dead_lettered,
            queued_events: self.failed_events.len(),
        }
    }
}

impl ListenerController {
    pub fn health(&self) -> HealthReport {
        self.lock_state().health(Utc::now(), self.settings.stale_after)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.lock_state().metrics_snapshot(Utc::now())
    }
}
