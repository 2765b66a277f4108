//! Thread-safe counters for the subscriber
//!
//! A [`DispatchMetrics`] is created by the service and shared (via `Arc`)
//! with the dispatcher and the test-event publisher. Counters are atomics;
//! handler latencies are kept in a bounded, mutex-protected window.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const LATENCY_WINDOW: usize = 1000;

/// Counters for the dispatch loop and the publisher
pub struct DispatchMetrics {
    messages_received: AtomicU64,
    events_handled: AtomicU64,
    unsupported_content_type: AtomicU64,
    decode_failures: AtomicU64,
    invalid_events: AtomicU64,
    bus_errors: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    handler_times: Mutex<Vec<u64>>, // in microseconds
    started_at: AtomicU64,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            events_handled: AtomicU64::new(0),
            unsupported_content_type: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            invalid_events: AtomicU64::new(0),
            bus_errors: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            handler_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_handled(&self, duration: Duration) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
        self.record_handler_time(duration);
    }

    pub fn unsupported_content_type(&self) {
        self.unsupported_content_type
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_event(&self) {
        self.invalid_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bus_error(&self) {
        self.bus_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_handler_time(&self, duration: Duration) {
        if let Ok(mut times) = self.handler_times.lock() {
            times.push(duration.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Calculate handler latency statistics (avg, p50, p95, p99)
    fn calculate_handler_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.handler_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p50, p95, p99) = self.calculate_handler_time_statistics();
        let now = current_timestamp();

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            events_handled: self.events_handled.load(Ordering::Relaxed),
            unsupported_content_type: self.unsupported_content_type.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            bus_errors: self.bus_errors.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            avg_handler_time_us: avg,
            handler_time_p50_us: p50,
            handler_time_p95_us: p95,
            handler_time_p99_us: p99,
        }
    }
}

/// Point-in-time view of [`DispatchMetrics`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub messages_received: u64,
    pub events_handled: u64,
    pub unsupported_content_type: u64,
    pub decode_failures: u64,
    pub invalid_events: u64,
    pub bus_errors: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub avg_handler_time_us: f64,
    pub handler_time_p50_us: f64,
    pub handler_time_p95_us: f64,
    pub handler_time_p99_us: f64,
}

impl MetricsSnapshot {
    /// Envelopes that reached the dispatcher but never reached the handler
    pub fn rejected(&self) -> u64 {
        self.unsupported_content_type + self.decode_failures + self.invalid_events
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower_value = sorted_data[index.floor() as usize] as f64;
    let upper_value = sorted_data[index.ceil() as usize] as f64;

    lower_value + (upper_value - lower_value) * index.fract()
}
