// Action channel server
//
// A Unix-domain socket server the worker polls for its next action. JSON
// lines both ways: `{"request": "next_action"}` pops the queue,
// `{"request": "map_path", "path": ...}` applies the controller's
// path-mapping rules. The socket lives in an owner-only runtime directory
// and the path is published only once the listener is bound.

use std::sync::{Arc, OnceLock};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ipc::{Action, ActionQueue};
use crate::models::{PathMappingRule, map_path};

/// Requests the worker may send over the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Pop the next pending action
    NextAction,
    /// Apply the path-mapping rules to a worker-side path
    MapPath { path: String },
}

/// Response to [`ClientRequest::NextAction`]. `action` is null when the
/// queue is empty and the worker should poll again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Option<Action>,
}

/// Response to [`ClientRequest::MapPath`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResponse {
    pub path: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Handle to a running adaptor server task.
///
/// The socket path is `None` until the listener is bound; the controller
/// busy-polls for it with a bounded timeout.
#[derive(Debug)]
pub struct ServerHandle {
    socket_path: Arc<OnceLock<Utf8PathBuf>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> Option<Utf8PathBuf> {
        self.socket_path.get().cloned()
    }

    /// Ask the serve loop and every open connection to unwind.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the serve task to finish. Call [`shutdown`](Self::shutdown)
    /// first; bound the wait with `tokio::time::timeout`.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

/// The action-channel server.
pub struct AdaptorServer;

impl AdaptorServer {
    /// Spawn the server task for the given queue and rule set.
    ///
    /// Binding happens on the task; a bind failure is logged and leaves the
    /// socket path unpublished, which the controller reports as a fatal
    /// configuration error when its discovery wait times out.
    pub fn spawn(queue: Arc<ActionQueue>, rules: Arc<Vec<PathMappingRule>>) -> ServerHandle {
        let socket_path = Arc::new(OnceLock::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let published = socket_path.clone();
        let task = tokio::spawn(async move {
            serve(queue, rules, published, shutdown_rx).await;
        });

        ServerHandle {
            socket_path,
            shutdown,
            task,
        }
    }
}

async fn serve(
    queue: Arc<ActionQueue>,
    rules: Arc<Vec<PathMappingRule>>,
    published: Arc<OnceLock<Utf8PathBuf>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Owner-only runtime directory; removed when the serve loop ends.
    let runtime_dir = match tempfile::Builder::new().prefix("maya-adaptor-").tempdir() {
        Ok(dir) => dir,
        Err(err) => {
            tracing::error!("could not create server runtime directory: {}", err);
            return;
        }
    };
    let path = runtime_dir.path().join("adaptor.sock");
    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("could not bind adaptor socket at {}: {}", path.display(), err);
            return;
        }
    };

    let socket_path = match Utf8PathBuf::try_from(path) {
        Ok(path) => path,
        Err(err) => {
            tracing::error!("adaptor socket path is not UTF-8: {}", err);
            return;
        }
    };
    tracing::info!("adaptor server listening at {}", socket_path);
    let _ = published.set(socket_path);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::debug!("adaptor server shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            queue.clone(),
                            rules.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(err) => {
                        tracing::warn!("failed to accept worker connection: {}", err);
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    queue: Arc<ActionQueue>,
    rules: Arc<Vec<PathMappingRule>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            // EOF: the worker closed its end (e.g. after performing close).
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("error reading worker request: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ClientRequest>(&line) {
            Ok(ClientRequest::NextAction) => {
                let action = queue.dequeue_action();
                if let Some(action) = &action {
                    tracing::debug!("serving action '{}' to worker", action.name);
                }
                serde_json::to_string(&ActionResponse { action })
            }
            Ok(ClientRequest::MapPath { path }) => serde_json::to_string(&PathResponse {
                path: map_path(&rules, &path),
            }),
            Err(err) => serde_json::to_string(&ErrorResponse {
                error: format!("malformed request: {err}"),
            }),
        };

        let encoded = match response {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!("could not encode response: {}", err);
                break;
            }
        };
        if let Err(err) = write_half.write_all(format!("{encoded}\n").as_bytes()).await {
            tracing::warn!("error writing response to worker: {}", err);
            break;
        }
    }
}
