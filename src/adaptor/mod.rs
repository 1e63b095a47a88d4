// Adaptor state machine
//
// Orchestrates one render session: start the action-channel server, spawn
// the worker, feed it ordered initialization actions, run one render per
// on_run call, and tear everything down in on_cleanup. The controller only
// ever suspends in bounded busy-wait loops so a fault recorded by the
// classifier surfaces within one poll tick.

mod callbacks;
mod pathmap;

pub use pathmap::{ARNOLD_PATHMAP_ENV, ArnoldPathmap};

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;

use crate::config::AdaptorConfig;
use crate::handlers::RegexHandler;
use crate::ipc::{Action, ActionQueue, AdaptorServer, ServerHandle};
use crate::models::{InitData, PathMappingRule, Renderer, RunData};
use crate::process::{LoggingSubprocess, ProcessHandle};
use crate::state::{SessionMonitor, WorkerFault};
use crate::telemetry::SessionTelemetry;

/// Environment variable telling the worker where the adaptor socket is.
pub const SERVER_PATH_ENV: &str = "MAYA_ADAPTOR_SERVER_PATH";

/// Environment variable holding extra client-script search directories.
pub const CLIENT_PATH_ENV: &str = "MAYA_ADAPTOR_CLIENT_PATH";

/// The client entry-point script the worker interpreter is launched with.
pub const CLIENT_SCRIPT_NAME: &str = "maya_client.py";

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);
const ACTION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors raised by the adaptor lifecycle.
#[derive(Debug, Error)]
pub enum AdaptorError {
    #[error("init data failed validation: {0}")]
    InvalidInitData(String),

    #[error("run data failed validation: {0}")]
    InvalidRunData(String),

    #[error("Could not find a socket path because the server did not finish initializing")]
    ServerNotStarted,

    #[error(
        "Could not find maya_client.py. Check that the client package is in one of the \
         following directories: {searched:?}"
    )]
    ClientScriptNotFound { searched: Vec<Utf8PathBuf> },

    #[error("could not write the arnold path-mapping file: {0}")]
    PathMapping(std::io::Error),

    #[error("failed to launch the worker process: {0}")]
    LaunchFailed(std::io::Error),

    #[error("Maya encountered an error and was not able to complete initialization actions.")]
    InitializationFailed,

    #[error(
        "Maya did not complete initialization actions in {timeout_s} seconds and failed to start."
    )]
    InitializationTimedOut { timeout_s: f64 },

    #[error("Cannot render because Maya is not running.")]
    NotRunning,

    #[error(
        "Maya exited early and did not render successfully, please check render logs. \
         Exit code {exit_code}"
    )]
    WorkerExited { exit_code: i32 },

    /// A fault recorded from the worker's output stream
    #[error(transparent)]
    Fault(#[from] WorkerFault),
}

/// Wall-clock deadline computed once at wait start.
#[derive(Debug, Clone, Copy)]
struct Deadline(Instant);

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Handle for requesting cancellation from a signal context.
///
/// Obtained after `on_start`; holds only the worker's process handle, so
/// cancelling never contends with the lifecycle methods.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    worker: Option<ProcessHandle>,
}

impl CancelHandle {
    /// Kill the worker immediately. The worker has no graceful mid-render
    /// stop, so no cooperative shutdown is attempted.
    pub fn cancel(&self) {
        tracing::info!("CANCEL REQUESTED");
        match &self.worker {
            Some(worker) if worker.is_running() => worker.kill_now(),
            _ => tracing::info!("Nothing to cancel because Maya is not running"),
        }
    }
}

/// Drives a headless Maya worker through a render session.
///
/// One adaptor instance per session; it exclusively owns the worker process,
/// the server task and the action queue for its lifetime and is not reused.
pub struct MayaAdaptor {
    init_raw: Value,
    config: AdaptorConfig,
    rules: Arc<Vec<PathMappingRule>>,
    queue: Arc<ActionQueue>,
    monitor: Arc<SessionMonitor>,
    telemetry: Arc<SessionTelemetry>,
    server: Option<ServerHandle>,
    worker: Option<LoggingSubprocess>,
    arnold_pathmap: Option<ArnoldPathmap>,
}

impl MayaAdaptor {
    pub fn new(init_data: Value, rules: Vec<PathMappingRule>, config: AdaptorConfig) -> Self {
        Self {
            init_raw: init_data,
            config,
            rules: Arc::new(rules),
            queue: Arc::new(ActionQueue::new()),
            monitor: Arc::new(SessionMonitor::new()),
            telemetry: Arc::new(SessionTelemetry::new()),
            server: None,
            worker: None,
            arnold_pathmap: None,
        }
    }

    pub fn monitor(&self) -> Arc<SessionMonitor> {
        self.monitor.clone()
    }

    pub fn telemetry(&self) -> Arc<SessionTelemetry> {
        self.telemetry.clone()
    }

    /// The action-channel socket path, once the server has published it.
    pub fn server_path(&self) -> Option<Utf8PathBuf> {
        self.server.as_ref().and_then(ServerHandle::socket_path)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            worker: self.worker.as_ref().map(LoggingSubprocess::handle),
        }
    }

    /// The shared action queue. The consumer side belongs to the worker's
    /// request loop; embedders should only ever inspect it.
    pub fn action_queue(&self) -> Arc<ActionQueue> {
        self.queue.clone()
    }

    /// True while the worker process is alive.
    pub fn worker_is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(LoggingSubprocess::is_running)
    }

    /// Validate the init payload, start the server and the worker, and wait
    /// for the worker to drain its initialization actions.
    pub async fn on_start(&mut self) -> Result<(), AdaptorError> {
        let init = InitData::validate(&self.init_raw)
            .map_err(|err| AdaptorError::InvalidInitData(err.to_string()))?;

        self.monitor.update_status(0, Some("Initializing Maya"));

        let server = AdaptorServer::spawn(self.queue.clone(), self.rules.clone());
        let socket_path = self.wait_for_socket(&server).await?;
        self.server = Some(server);

        self.populate_action_queue(&init);
        self.start_worker(&init, &socket_path)?;

        let deadline = Deadline::after(self.config.worker_start_timeout());
        loop {
            self.monitor.check_fault()?;
            if !self.worker_is_running() || self.queue.is_empty() || deadline.expired() {
                break;
            }
            sleep(ACTION_POLL_INTERVAL).await;
        }

        self.telemetry.record_event("adaptor.start");

        if !self.queue.is_empty() {
            return Err(if deadline.expired() {
                AdaptorError::InitializationTimedOut {
                    timeout_s: self.config.worker_start_timeout_s,
                }
            } else {
                // The worker died or stalled with actions still pending;
                // this is a failure, not a timeout.
                AdaptorError::InitializationFailed
            });
        }
        Ok(())
    }

    /// Render one frame: enqueue a single `start_render` action and wait for
    /// the completion marker, a fault, or the worker dying.
    pub async fn on_run(&mut self, run_data: &Value) -> Result<(), AdaptorError> {
        if !self.worker_is_running() {
            return Err(AdaptorError::NotRunning);
        }

        let run = RunData::validate(run_data)
            .map_err(|err| AdaptorError::InvalidRunData(err.to_string()))?;

        self.monitor.set_rendering(true);
        self.queue.enqueue_action(run.start_render_action());

        // No deadline here: frame render times are unbounded by design;
        // bounding them is the task runner's job.
        loop {
            self.monitor.check_fault()?;
            if !self.worker_is_running() || !self.monitor.is_rendering() {
                break;
            }
            sleep(ACTION_POLL_INTERVAL).await;
        }

        if !self.worker_is_running() {
            // The worker must stay resident between frames, so any exit here
            // is abnormal even if it claims success.
            let exit_code = self
                .worker
                .as_ref()
                .and_then(LoggingSubprocess::exit_code)
                .unwrap_or(-1);
            self.telemetry.record_worker_error("on_run", exit_code);
            return Err(AdaptorError::WorkerExited { exit_code });
        }

        self.telemetry.record_frame(run.frame);
        Ok(())
    }

    /// Best-effort teardown of per-render side channels. Never errors.
    pub async fn on_stop(&mut self) {
        self.cleanup_arnold_pathmap();
    }

    /// Close the session: ask the worker to exit, force-terminate it if it
    /// will not, and shut down the action channel. Never errors; every
    /// failure along the way is logged and cleanup keeps going.
    pub async fn on_cleanup(&mut self) {
        self.monitor.begin_cleanup();

        self.queue.enqueue_front(Action::close());
        let deadline = Deadline::after(self.config.worker_end_timeout());
        while self.worker_is_running() && !deadline.expired() {
            sleep(ACTION_POLL_INTERVAL).await;
        }
        if self.worker_is_running() {
            tracing::error!(
                "Maya did not complete cleanup actions and failed to gracefully shutdown. \
                 Terminating."
            );
            if let Some(worker) = &self.worker {
                worker.terminate(Duration::ZERO).await;
            }
        }

        if let Some(server) = self.server.take() {
            server.shutdown();
            match tokio::time::timeout(self.config.server_end_timeout(), server.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!("Failed to shutdown the Maya Adaptor server: {}", err);
                }
                Err(_) => tracing::error!("Failed to shutdown the Maya Adaptor server."),
            }
        }

        self.cleanup_arnold_pathmap();
        self.telemetry
            .log_summary(self.monitor.worker_version().as_deref());
        self.monitor.end_cleanup();
    }

    /// Cancel a render in progress by killing the worker outright.
    pub fn on_cancel(&self) {
        self.cancel_handle().cancel();
    }

    async fn wait_for_socket(&self, server: &ServerHandle) -> Result<Utf8PathBuf, AdaptorError> {
        let deadline = Deadline::after(self.config.server_start_timeout());
        loop {
            if let Some(path) = server.socket_path() {
                return Ok(path);
            }
            if deadline.expired() {
                return Err(AdaptorError::ServerNotStarted);
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    /// Queue the session's initialization actions: the renderer first, then
    /// the full path-mapping rule set, then scene and project, then the
    /// remaining recognized init keys.
    fn populate_action_queue(&self, init: &InitData) {
        self.queue.enqueue_action(Action::with_value(
            "renderer",
            "renderer",
            json!(init.renderer),
        ));

        let rule_map: serde_json::Map<String, Value> = self
            .rules
            .iter()
            .map(|rule| (rule.source_path.clone(), json!(rule.destination_path)))
            .collect();
        self.queue.enqueue_action(Action::with_value(
            "path_mapping",
            "path_mapping_rules",
            Value::Object(rule_map),
        ));

        for action in init.init_actions() {
            self.queue.enqueue_action(action);
        }
        self.telemetry.record_actions_enqueued(self.queue.len());
    }

    fn start_worker(&mut self, init: &InitData, socket_path: &Utf8PathBuf) -> Result<(), AdaptorError> {
        let mut envs = vec![(SERVER_PATH_ENV.to_string(), socket_path.to_string())];

        if init.renderer_kind() == Renderer::Arnold {
            let pathmap = ArnoldPathmap::write(&self.rules).map_err(AdaptorError::PathMapping)?;
            envs.push(pathmap.env_entry());
            self.arnold_pathmap = Some(pathmap);
        }

        let client_script = self.locate_client_script()?;
        let handler = Arc::new(RegexHandler::new(callbacks::regex_callbacks(
            init,
            &self.monitor,
        )));

        let executable = self.config.executable_for(init.version).to_string();
        let worker = LoggingSubprocess::start(
            &executable,
            &[client_script.to_string()],
            &envs,
            handler.clone(),
            handler,
        )
        .map_err(AdaptorError::LaunchFailed)?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Find the client entry-point script, trying the env-var directories,
    /// the configured directories, and the executable-adjacent default in
    /// that order.
    fn locate_client_script(&self) -> Result<Utf8PathBuf, AdaptorError> {
        let mut searched = Vec::new();
        for dir in self.client_search_dirs() {
            let candidate = dir.join(CLIENT_SCRIPT_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(dir);
        }
        Err(AdaptorError::ClientScriptNotFound { searched })
    }

    fn client_search_dirs(&self) -> Vec<Utf8PathBuf> {
        let mut dirs = Vec::new();
        if let Ok(paths) = env::var(CLIENT_PATH_ENV) {
            dirs.extend(
                env::split_paths(&paths).filter_map(|path| Utf8PathBuf::try_from(path).ok()),
            );
        }
        dirs.extend(self.config.client_search_paths.iter().cloned());
        if let Ok(exe) = env::current_exe() {
            if let Some(parent) = exe.parent() {
                if let Ok(parent) = Utf8PathBuf::try_from(parent.to_path_buf()) {
                    dirs.push(parent.join("client"));
                }
            }
        }
        dirs
    }

    fn cleanup_arnold_pathmap(&mut self) {
        if let Some(pathmap) = self.arnold_pathmap.take() {
            pathmap.remove();
        }
    }
}
