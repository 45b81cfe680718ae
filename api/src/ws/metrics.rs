//! Hub metrics tracking.
//!
//! Provides atomic counters for monitoring connections and fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Metrics for the hub.
#[derive(Debug)]
pub struct HubMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
    subscriptions: AtomicU64,
    unsubscriptions: AtomicU64,
    overflow_closes: AtomicU64,
    pong_timeouts: AtomicU64,
    broker_failures: AtomicU64,
    start_time: Instant,
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HubMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            unsubscriptions: AtomicU64::new(0),
            overflow_closes: AtomicU64::new(0),
            pong_timeouts: AtomicU64::new(0),
            broker_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection registered.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection unregistered.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an inbound envelope.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` envelopes written to sockets.
    pub fn record_messages_sent(&self, count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a subscription.
    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unsubscription.
    pub fn record_unsubscription(&self) {
        self.unsubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed because its queue was full.
    pub fn record_overflow_close(&self) {
        self.overflow_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed for missing the liveness window.
    pub fn record_pong_timeout(&self) {
        self.pong_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed broker operation.
    pub fn record_broker_failure(&self) {
        self.broker_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the total overflow closes.
    #[must_use]
    pub fn overflow_closes(&self) -> u64 {
        self.overflow_closes.load(Ordering::Relaxed)
    }

    /// Returns the total broker failures.
    #[must_use]
    pub fn broker_failures(&self) -> u64 {
        self.broker_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        let opened = self.connections_opened();
        let closed = self.connections_closed();
        HubMetricsSnapshot {
            connections_opened: opened,
            connections_closed: closed,
            active_connections: opened.saturating_sub(closed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            unsubscriptions: self.unsubscriptions.load(Ordering::Relaxed),
            overflow_closes: self.overflow_closes(),
            pong_timeouts: self.pong_timeouts.load(Ordering::Relaxed),
            broker_failures: self.broker_failures(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

/// A point-in-time snapshot of hub metrics, served at `GET /metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubMetricsSnapshot {
    /// Total connections registered.
    pub connections_opened: u64,
    /// Total connections unregistered.
    pub connections_closed: u64,
    /// Currently registered connections.
    pub active_connections: u64,
    /// Inbound envelopes.
    pub messages_received: u64,
    /// Envelopes written to sockets.
    pub messages_sent: u64,
    /// Errors.
    pub errors: u64,
    /// Subscriptions.
    pub subscriptions: u64,
    /// Unsubscriptions.
    pub unsubscriptions: u64,
    /// Connections closed for a full queue.
    pub overflow_closes: u64,
    /// Connections closed for missing the liveness window.
    pub pong_timeouts: u64,
    /// Failed broker operations.
    pub broker_failures: u64,
    /// Seconds since start.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = HubMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_opened, 0);
        assert_eq!(snapshot.active_connections, 0);
    }

    #[test]
    fn test_metrics_record_connection() {
        let metrics = HubMetrics::default();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_opened, 2);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[test]
    fn test_metrics_record_messages() {
        let metrics = HubMetrics::new();
        metrics.record_message_received();
        metrics.record_messages_sent(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 3);
    }

    #[test]
    fn test_metrics_failure_counters() {
        let metrics = HubMetrics::new();
        metrics.record_overflow_close();
        metrics.record_pong_timeout();
        metrics.record_broker_failure();
        metrics.record_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.overflow_closes, 1);
        assert_eq!(snapshot.pong_timeouts, 1);
        assert_eq!(snapshot.broker_failures, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(HubMetrics::new().snapshot()).expect("serialize");
        assert!(json.get("uptime_secs").is_some());
        assert!(json.get("overflow_closes").is_some());
    }
}
