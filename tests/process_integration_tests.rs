//! Integration tests for the worker process wrapper
//!
//! Real child processes (`sh` stand-ins) exercising line classification,
//! exit-code reporting and both termination paths.

#![cfg(unix)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use regex::Regex;

use maya_adaptor::handlers::{RegexCallback, RegexHandler};
use maya_adaptor::process::LoggingSubprocess;

fn spawn_sh(
    script: &str,
    stdout_handler: Arc<RegexHandler>,
    stderr_handler: Arc<RegexHandler>,
) -> LoggingSubprocess {
    LoggingSubprocess::start(
        "sh",
        &["-c".to_string(), script.to_string()],
        &[],
        stdout_handler,
        stderr_handler,
    )
    .expect("failed to spawn sh")
}

async fn wait_for_exit(process: &LoggingSubprocess) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(code) = process.exit_code() {
            return code;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("child did not exit in time");
}

#[tokio::test]
async fn test_progress_style_lines_are_classified_from_stdout() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();
    let handler = Arc::new(RegexHandler::new(vec![RegexCallback::new(
        vec![Regex::new(r"\[PROGRESS\] ([0-9]+) percent").unwrap()],
        move |captures| {
            seen_in_handler
                .lock()
                .unwrap()
                .push(captures[1].parse::<u32>().unwrap());
        },
    )]));

    let process = spawn_sh(
        "echo '[PROGRESS] 25 percent'; echo '[PROGRESS] 50 percent'; echo '[PROGRESS] 100 percent'",
        handler,
        Arc::new(RegexHandler::default()),
    );

    assert_eq!(wait_for_exit(&process).await, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*seen.lock().unwrap(), vec![25, 50, 100]);
}

#[tokio::test]
async fn test_stdout_and_stderr_are_classified_independently() {
    let stdout_hits = Arc::new(AtomicUsize::new(0));
    let stderr_hits = Arc::new(AtomicUsize::new(0));

    let stdout_counter = stdout_hits.clone();
    let stdout_handler = Arc::new(RegexHandler::new(vec![RegexCallback::new(
        vec![Regex::new("out").unwrap()],
        move |_| {
            stdout_counter.fetch_add(1, Ordering::SeqCst);
        },
    )]));
    let stderr_counter = stderr_hits.clone();
    let stderr_handler = Arc::new(RegexHandler::new(vec![RegexCallback::new(
        vec![Regex::new("err").unwrap()],
        move |_| {
            stderr_counter.fetch_add(1, Ordering::SeqCst);
        },
    )]));

    let process = spawn_sh("echo out; echo err >&2; echo out", stdout_handler, stderr_handler);

    wait_for_exit(&process).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stdout_hits.load(Ordering::SeqCst), 2);
    assert_eq!(stderr_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nonzero_exit_code_is_observed() {
    let process = spawn_sh(
        "exit 17",
        Arc::new(RegexHandler::default()),
        Arc::new(RegexHandler::default()),
    );
    assert_eq!(wait_for_exit(&process).await, 17);
    assert!(!process.is_running());
}

#[tokio::test]
async fn test_zero_grace_termination_is_immediate() {
    let process = spawn_sh(
        "sleep 30",
        Arc::new(RegexHandler::default()),
        Arc::new(RegexHandler::default()),
    );
    assert!(process.is_running());
    assert!(process.exit_code().is_none());

    let started = Instant::now();
    process.terminate(Duration::ZERO).await;
    let code = wait_for_exit(&process).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_ne!(code, 0);
}

#[tokio::test]
async fn test_graceful_termination_falls_back_to_kill() {
    // The child ignores SIGTERM, so the grace period must elapse and the
    // fallback SIGKILL must land.
    let process = spawn_sh(
        "trap '' TERM; sleep 30",
        Arc::new(RegexHandler::default()),
        Arc::new(RegexHandler::default()),
    );
    // Give the shell a moment to install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    process.terminate(Duration::from_millis(500)).await;

    let code = wait_for_exit(&process).await;
    assert_ne!(code, 0);
    assert!(!process.is_running());
}

#[tokio::test]
async fn test_handle_outlives_the_wrapper_borrow() {
    let process = spawn_sh(
        "sleep 30",
        Arc::new(RegexHandler::default()),
        Arc::new(RegexHandler::default()),
    );
    let handle = process.handle();
    assert!(handle.is_running());

    handle.kill_now();
    wait_for_exit(&process).await;
    assert!(!handle.is_running());
    assert_eq!(handle.exit_code(), process.exit_code());
}
