// maya-adaptor - render-farm adaptor for headless Maya
//
// This is the library crate containing the process-supervision core: the
// action channel, the worker process wrapper, the output classifier and the
// adaptor state machine. The binary crate (main.rs) provides the CLI entry
// point used by the task runner.

pub mod adaptor;
pub mod config;
pub mod handlers;
pub mod ipc;
pub mod logging;
pub mod models;
pub mod process;
pub mod state;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use adaptor::{AdaptorError, CancelHandle, MayaAdaptor};
pub use config::AdaptorConfig;
pub use ipc::{Action, ActionQueue};
pub use models::{InitData, PathMappingRule, Renderer, RunData};
pub use state::{SessionMonitor, StatusEvent};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
