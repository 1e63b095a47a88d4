// Worker process supervision
//
// LoggingSubprocess spawns the worker with piped stdio, pumps every output
// line through an output classifier (and the log), and tracks the exit code
// so the controller can poll liveness without owning the child.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handlers::RegexHandler;

/// Cheap, clonable control surface for a spawned worker.
///
/// Holds only the pid and the exit watch, so it can be handed to a
/// signal-handling context and used to kill the worker without touching the
/// rest of the wrapper.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: i32,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    /// True while the child has not exited.
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit code once the child has exited; `None` while running. Deaths by
    /// signal are reported as the negated signal number.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Kill the child immediately. Safe to call from a signal context and
    /// idempotent once the child is gone.
    pub fn kill_now(&self) {
        self.send_signal(Signal::SIGKILL);
    }

    /// Request shutdown.
    ///
    /// Zero grace kills outright. Otherwise a SIGTERM is sent and the child
    /// is given `grace` to exit before being killed.
    pub async fn terminate(&self, grace: Duration) {
        if !self.is_running() {
            return;
        }

        if grace.is_zero() {
            self.kill_now();
            return;
        }

        self.send_signal(Signal::SIGTERM);
        let mut exit_rx = self.exit_rx.clone();
        let exited = tokio::time::timeout(grace, exit_rx.wait_for(|code| code.is_some())).await;
        if exited.is_err() {
            tracing::warn!(
                pid = self.pid,
                "worker did not exit within {:.1}s of SIGTERM, killing",
                grace.as_secs_f64()
            );
            self.kill_now();
        }
    }

    fn send_signal(&self, signal: Signal) {
        match kill(Pid::from_raw(self.pid), signal) {
            Ok(()) => tracing::debug!(pid = self.pid, "sent {}", signal),
            // ESRCH just means the child already exited.
            Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => tracing::warn!(pid = self.pid, "failed to send {}: {}", signal, err),
        }
    }
}

/// A supervised child process whose output streams are consumed
/// line-by-line by classifier callbacks.
#[derive(Debug)]
pub struct LoggingSubprocess {
    handle: ProcessHandle,
    program: String,
    _stdout_pump: JoinHandle<()>,
    _stderr_pump: JoinHandle<()>,
    _waiter: JoinHandle<()>,
}

impl LoggingSubprocess {
    /// Spawn `program args...` with the given extra environment variables,
    /// attaching a classifier to each output stream.
    ///
    /// The call returns as soon as the child is spawned; output pumping and
    /// exit tracking run on their own tasks and never block the caller.
    pub fn start(
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        stdout_handler: Arc<RegexHandler>,
        stderr_handler: Arc<RegexHandler>,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in envs {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let pid = child.id().map(|id| id as i32).unwrap_or(-1);
        tracing::info!(pid, "started worker: {} {}", program, args.join(" "));

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let stdout_pump = tokio::spawn(pump_lines(stdout, "stdout", stdout_handler));
        let stderr_pump = tokio::spawn(pump_lines(stderr, "stderr", stderr_handler));

        let (exit_tx, exit_rx) = watch::channel(None);
        let waiter = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(err) => {
                    tracing::error!("failed waiting on worker: {}", err);
                    -1
                }
            };
            tracing::info!("worker exited with code {}", code);
            let _ = exit_tx.send(Some(code));
        });

        Ok(Self {
            handle: ProcessHandle { pid, exit_rx },
            program: program.to_string(),
            _stdout_pump: stdout_pump,
            _stderr_pump: stderr_pump,
            _waiter: waiter,
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.handle.exit_code()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn kill_now(&self) {
        self.handle.kill_now()
    }

    pub async fn terminate(&self, grace: Duration) {
        self.handle.terminate(grace).await
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| -sig))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

async fn pump_lines(
    stream: impl AsyncRead + Unpin,
    stream_name: &'static str,
    handler: Arc<RegexHandler>,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(stream = stream_name, "{}", line);
                handler.handle_line(&line);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(stream = stream_name, "stopped reading worker output: {}", err);
                break;
            }
        }
    }
}
