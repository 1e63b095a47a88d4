// Session telemetry
//
// Lightweight lock-free counters for one render session, logged as a
// summary at the end of cleanup.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Telemetry for a single adaptor session.
#[derive(Debug)]
pub struct SessionTelemetry {
    /// Frames rendered successfully
    pub frames_rendered: AtomicU64,

    /// Initialization actions placed on the queue
    pub actions_enqueued: AtomicUsize,

    /// Abnormal worker exits observed
    pub worker_errors: AtomicU64,

    /// Exit code of the most recent abnormal worker exit
    last_exit_code: AtomicI32,

    start_time: Instant,
}

impl SessionTelemetry {
    pub fn new() -> Self {
        Self {
            frames_rendered: AtomicU64::new(0),
            actions_enqueued: AtomicUsize::new(0),
            worker_errors: AtomicU64::new(0),
            last_exit_code: AtomicI32::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a lifecycle event.
    pub fn record_event(&self, event: &str) {
        tracing::info!(event, "session event");
    }

    pub fn record_frame(&self, frame: i64) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(frame, "frame rendered");
    }

    pub fn record_actions_enqueued(&self, count: usize) {
        self.actions_enqueued.store(count, Ordering::Relaxed);
    }

    /// Record an abnormal worker exit observed in the given lifecycle scope.
    pub fn record_worker_error(&self, scope: &str, exit_code: i32) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
        self.last_exit_code.store(exit_code, Ordering::Relaxed);
        tracing::error!(scope, exit_code, "abnormal worker exit");
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log the end-of-session summary.
    pub fn log_summary(&self, worker_version: Option<&str>) {
        tracing::info!(
            "session summary: {} frames rendered, {} worker errors, Maya version {}, uptime {:.1}s",
            self.frames_rendered.load(Ordering::Relaxed),
            self.worker_errors.load(Ordering::Relaxed),
            worker_version.unwrap_or("unknown"),
            self.uptime().as_secs_f64(),
        );
    }
}

impl Default for SessionTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
