// Session state
//
// This module provides the SessionMonitor, the one piece of state shared
// between the controller's lifecycle calls and the classifier callbacks that
// run on the worker's output-pump tasks.

use std::sync::RwLock;

use thiserror::Error;
use tokio::sync::broadcast;

/// A fatal condition reported by the worker through its output stream.
///
/// Recorded asynchronously by a classifier callback and surfaced
/// synchronously in the controller at its next poll tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WorkerFault(pub String);

/// Status events emitted when the session state changes.
///
/// Subscribers (the CLI, an embedding task runner) receive these without
/// polling the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    /// Render progress has been updated
    Progress {
        percent: u32,
        message: Option<String>,
    },

    /// The rendering flag changed
    RenderingChanged {
        rendering: bool,
    },

    /// The worker announced its application version
    VersionDetected {
        version: String,
    },

    /// A fatal fault was recorded from the worker's output
    FaultRecorded {
        message: String,
    },
}

/// Snapshot of the session state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// True between `start_render` being issued and the completion marker
    pub rendering: bool,

    /// Last reported render progress, 0-100
    pub progress: u32,

    /// Last status message attached to a progress update
    pub status_message: Option<String>,

    /// Application version announced by the worker, when seen
    pub worker_version: Option<String>,

    /// Pending fatal fault, if the classifier recorded one
    pub fault: Option<WorkerFault>,

    /// True while `on_cleanup` is underway; suppresses fault propagation so
    /// cleanup can proceed after a failure
    pub cleaning_up: bool,
}

/// Thread-safe session monitor with event emission.
///
/// Classifier callbacks mutate this from the output-pump tasks while the
/// controller busy-waits on it; [`check_fault`](Self::check_fault) is the
/// accessor that converts the asynchronously recorded fault into an error at
/// the next poll tick, so no worker-reported failure is lost and nothing
/// continues silently past one.
#[derive(Debug)]
pub struct SessionMonitor {
    state: RwLock<SessionState>,
    events: broadcast::Sender<StatusEvent>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(SessionState::default()),
            events,
        }
    }

    /// Get a clone of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.read().unwrap().clone()
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Surface a pending fault as an error.
    ///
    /// Returns `Err` if a fault has been recorded and cleanup is not
    /// underway. Called on every poll iteration of the controller's wait
    /// loops.
    pub fn check_fault(&self) -> Result<(), WorkerFault> {
        let state = self.state.read().unwrap();
        match &state.fault {
            Some(fault) if !state.cleaning_up => Err(fault.clone()),
            _ => Ok(()),
        }
    }

    /// True if a fault is pending and would propagate.
    ///
    /// Completion and progress handlers consult this guard and become no-ops
    /// once a fault is recorded; during cleanup the guard reports false so
    /// those handlers keep running.
    pub fn fault_pending(&self) -> bool {
        let state = self.state.read().unwrap();
        state.fault.is_some() && !state.cleaning_up
    }

    /// Record a fatal fault from the worker's output.
    ///
    /// A later fault replaces an earlier one that has not yet been observed.
    pub fn record_fault(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("worker fault: {}", message);
        self.state.write().unwrap().fault = Some(WorkerFault(message.clone()));
        let _ = self.events.send(StatusEvent::FaultRecorded { message });
    }

    pub fn is_rendering(&self) -> bool {
        self.state.read().unwrap().rendering
    }

    pub fn set_rendering(&self, rendering: bool) {
        let changed = {
            let mut state = self.state.write().unwrap();
            let changed = state.rendering != rendering;
            state.rendering = rendering;
            changed
        };
        if changed {
            let _ = self.events.send(StatusEvent::RenderingChanged { rendering });
        }
    }

    /// Update render progress, optionally with a status message.
    pub fn update_status(&self, percent: u32, message: Option<&str>) {
        {
            let mut state = self.state.write().unwrap();
            state.progress = percent;
            if let Some(message) = message {
                state.status_message = Some(message.to_string());
            }
        }
        match message {
            Some(message) => tracing::info!(progress = percent, "{}", message),
            None => tracing::debug!(progress = percent, "progress update"),
        }
        let _ = self.events.send(StatusEvent::Progress {
            percent,
            message: message.map(str::to_string),
        });
    }

    /// Record the application version announced by the worker.
    pub fn record_version(&self, version: impl Into<String>) {
        let version = version.into();
        tracing::info!("worker application version {}", version);
        self.state.write().unwrap().worker_version = Some(version.clone());
        let _ = self.events.send(StatusEvent::VersionDetected { version });
    }

    pub fn worker_version(&self) -> Option<String> {
        self.state.read().unwrap().worker_version.clone()
    }

    /// Mark cleanup as underway, suppressing fault propagation.
    pub fn begin_cleanup(&self) {
        self.state.write().unwrap().cleaning_up = true;
    }

    pub fn end_cleanup(&self) {
        self.state.write().unwrap().cleaning_up = false;
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
