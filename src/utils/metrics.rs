//! Observability and Metrics
//!
//! This module provides metrics collection and observability features
//! for monitoring engine performance and health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for engine operations
#[derive(Debug)]
pub struct Metrics {
    /// Total sessions accepted
    pub sessions_total: AtomicU64,
    /// Currently live sessions
    pub sessions_active: AtomicU64,
    /// Total frames sent
    pub frames_sent: AtomicU64,
    /// Total frames received
    pub frames_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Sessions rejected for a token mismatch
    pub token_rejects: AtomicU64,
    /// Successful credential exchanges
    pub auth_successes: AtomicU64,
    /// Rejected credential exchanges
    pub auth_failures: AtomicU64,
    /// Watchdog deadlines that fired
    pub watchdog_expiries: AtomicU64,
    /// Register-memory read requests served
    pub register_reads: AtomicU64,
    /// Register-memory write requests served
    pub register_writes: AtomicU64,
    /// Transport-level errors observed
    pub transport_errors: AtomicU64,
    /// Protocol-level errors observed (echo mismatch, malformed frames)
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            token_rejects: AtomicU64::new(0),
            auth_successes: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            watchdog_expiries: AtomicU64::new(0),
            register_reads: AtomicU64::new(0),
            register_writes: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a newly accepted session
    pub fn session_opened(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session teardown
    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a frame sent
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame received
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a session rejected for a bad token
    pub fn token_reject(&self) {
        self.token_rejects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted credential exchange
    pub fn auth_success(&self) {
        self.auth_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected credential exchange
    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a watchdog deadline firing
    pub fn watchdog_expiry(&self) {
        self.watchdog_expiries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served register read
    pub fn register_read(&self) {
        self.register_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served register write
    pub fn register_write(&self) {
        self.register_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport error
    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            token_rejects: self.token_rejects.load(Ordering::Relaxed),
            auth_successes: self.auth_successes.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            watchdog_expiries: self.watchdog_expiries.load(Ordering::Relaxed),
            register_reads: self.register_reads.load(Ordering::Relaxed),
            register_writes: self.register_writes.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_total = snapshot.sessions_total,
            sessions_active = snapshot.sessions_active,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            token_rejects = snapshot.token_rejects,
            auth_successes = snapshot.auth_successes,
            auth_failures = snapshot.auth_failures,
            watchdog_expiries = snapshot.watchdog_expiries,
            register_reads = snapshot.register_reads,
            register_writes = snapshot.register_writes,
            transport_errors = snapshot.transport_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Engine metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub token_rejects: u64,
    pub auth_successes: u64,
    pub auth_failures: u64,
    pub watchdog_expiries: u64,
    pub register_reads: u64,
    pub register_writes: u64,
    pub transport_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
