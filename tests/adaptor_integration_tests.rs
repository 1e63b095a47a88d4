//! Integration tests for the adaptor lifecycle
//!
//! A shell script standing in for the Maya client plays the worker role:
//! the adaptor spawns it through the normal path (configured interpreter +
//! discovered client script) while a test task drains the action queue the
//! way the worker's request loop would.

#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use maya_adaptor::ipc::ActionQueue;
use maya_adaptor::{AdaptorConfig, AdaptorError, MayaAdaptor};

/// A worker that announces its version and then completes one frame every
/// 100ms until killed.
const RENDERING_WORKER: &str = r#"
echo "MayaClient: Maya Version 2024"
i=1
while [ $i -le 300 ]; do
    echo "MayaClient: Finished Rendering Frame $i"
    i=$((i+1))
    sleep 0.1
done
sleep 30
"#;

fn write_client_script(dir: &Utf8Path, body: &str) {
    fs::write(dir.join("maya_client.py"), body).unwrap();
}

fn test_config(client_dir: &Utf8Path) -> AdaptorConfig {
    let mut config = AdaptorConfig::default();
    config.executable = "sh".to_string();
    config.client_search_paths = vec![client_dir.to_path_buf()];
    config.worker_start_timeout_s = 15.0;
    config.worker_end_timeout_s = 1.0;
    config.server_end_timeout_s = 5.0;
    config
}

fn init_data() -> Value {
    json!({
        "renderer": "mayaSoftware",
        "scene_file": "/projects/shot/scene.mb",
        "project_path": "/projects/shot",
        "camera": "persp",
        "render_layer": "beauty",
    })
}

fn scratch_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

/// Stand-in for the worker's request loop: pop actions until close shows up.
fn spawn_drainer(queue: Arc<ActionQueue>) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut drained = Vec::new();
        loop {
            match queue.dequeue_action() {
                Some(action) => {
                    let done = action.is_close();
                    drained.push(action.name);
                    if done {
                        break;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        drained
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_full_lifecycle_renders_frames_and_cleans_up() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, RENDERING_WORKER);

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let drainer = spawn_drainer(adaptor.action_queue());

    adaptor.on_start().await.expect("on_start failed");
    assert!(adaptor.action_queue().is_empty());
    assert!(adaptor.worker_is_running());
    assert!(adaptor.server_path().is_some());

    adaptor.on_run(&json!({"frame": 1})).await.expect("frame 1 failed");
    assert!(!adaptor.monitor().is_rendering());

    adaptor.on_run(&json!({"frame": 2})).await.expect("frame 2 failed");

    let monitor = adaptor.monitor();
    wait_until(|| monitor.worker_version().is_some(), "version detection").await;
    assert_eq!(monitor.worker_version().as_deref(), Some("2024"));
    assert_eq!(monitor.snapshot().progress, 100);

    adaptor.on_stop().await;

    // The worker never exits on its own; cleanup must force-terminate it
    // and still return promptly.
    let cleanup_started = Instant::now();
    adaptor.on_cleanup().await;
    assert!(cleanup_started.elapsed() < Duration::from_secs(8));

    wait_until(|| !adaptor.worker_is_running(), "worker termination").await;

    let drained = drainer.await.unwrap();
    assert_eq!(drained.first().map(String::as_str), Some("renderer"));
    assert_eq!(drained.last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_on_start_fails_when_worker_dies_before_draining() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, "exit 1\n");

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let err = adaptor.on_start().await.unwrap_err();

    assert!(matches!(err, AdaptorError::InitializationFailed));
    assert!(!adaptor.action_queue().is_empty());

    adaptor.on_cleanup().await;
}

#[tokio::test]
async fn test_on_start_times_out_when_queue_never_drains() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, "sleep 30\n");

    let mut config = test_config(&dir);
    config.worker_start_timeout_s = 0.3;

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), config);
    let err = adaptor.on_start().await.unwrap_err();

    match &err {
        AdaptorError::InitializationTimedOut { timeout_s } => assert_eq!(*timeout_s, 0.3),
        other => panic!("expected a timeout, got: {other}"),
    }
    // The message names the configured timeout so logs are self-explaining.
    assert!(err.to_string().contains("0.3 seconds"));

    adaptor.on_cleanup().await;
    wait_until(|| !adaptor.worker_is_running(), "worker termination").await;
}

#[tokio::test]
async fn test_worker_reported_error_aborts_initialization() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, "echo 'Error: cannot load plugin Mayatomr'; sleep 30\n");

    let mut init = init_data();
    init["strict_error_checking"] = json!(true);

    let mut adaptor = MayaAdaptor::new(init, Vec::new(), test_config(&dir));
    let err = adaptor.on_start().await.unwrap_err();

    match &err {
        AdaptorError::Fault(fault) => {
            assert!(fault.0.contains("Maya Encountered an Error"));
            assert!(fault.0.contains("cannot load plugin Mayatomr"));
        }
        other => panic!("expected a worker fault, got: {other}"),
    }

    adaptor.on_cleanup().await;
}

#[tokio::test]
async fn test_on_run_reports_abnormal_worker_exit_with_code() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, "sleep 1; exit 7\n");

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let drainer = spawn_drainer(adaptor.action_queue());

    adaptor.on_start().await.expect("on_start failed");

    let err = adaptor.on_run(&json!({"frame": 1})).await.unwrap_err();
    match err {
        AdaptorError::WorkerExited { exit_code } => assert_eq!(exit_code, 7),
        other => panic!("expected an abnormal exit, got: {other}"),
    }

    adaptor.on_cleanup().await;
    drainer.abort();
}

#[tokio::test]
async fn test_on_run_rejects_malformed_run_data() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, RENDERING_WORKER);

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let drainer = spawn_drainer(adaptor.action_queue());

    adaptor.on_start().await.expect("on_start failed");

    let err = adaptor.on_run(&json!({"bad": "data"})).await.unwrap_err();
    assert!(matches!(err, AdaptorError::InvalidRunData(_)));

    adaptor.on_cleanup().await;
    drainer.await.unwrap();
}

#[tokio::test]
async fn test_on_cancel_kills_a_live_worker() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, RENDERING_WORKER);

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let drainer = spawn_drainer(adaptor.action_queue());

    adaptor.on_start().await.expect("on_start failed");
    assert!(adaptor.worker_is_running());

    adaptor.on_cancel();
    wait_until(|| !adaptor.worker_is_running(), "cancel to kill the worker").await;

    // A dead worker means the next frame is refused outright.
    let err = adaptor.on_run(&json!({"frame": 3})).await.unwrap_err();
    assert!(matches!(err, AdaptorError::NotRunning));

    adaptor.on_cleanup().await;
    drainer.abort();
}

#[tokio::test]
async fn test_missing_client_script_lists_searched_directories() {
    let (_scratch, dir) = scratch_dir();
    // No script written.

    let mut adaptor = MayaAdaptor::new(init_data(), Vec::new(), test_config(&dir));
    let err = adaptor.on_start().await.unwrap_err();

    match &err {
        AdaptorError::ClientScriptNotFound { searched } => {
            assert!(searched.contains(&dir));
        }
        other => panic!("expected a missing-client error, got: {other}"),
    }
    assert!(err.to_string().contains("maya_client.py"));

    adaptor.on_cleanup().await;
}

#[tokio::test]
async fn test_arnold_session_writes_and_removes_the_pathmap_file() {
    let (_scratch, dir) = scratch_dir();
    write_client_script(&dir, RENDERING_WORKER);

    let mut init = init_data();
    init["renderer"] = json!("arnold");
    let rules = vec![maya_adaptor::PathMappingRule {
        source_os: maya_adaptor::models::SourceOs::Linux,
        source_path: "/farm".to_string(),
        destination_path: "/local".to_string(),
    }];

    let mut adaptor = MayaAdaptor::new(init, rules, test_config(&dir));
    let drainer = spawn_drainer(adaptor.action_queue());

    adaptor.on_start().await.expect("on_start failed");

    adaptor.on_stop().await;
    adaptor.on_cleanup().await;
    drainer.await.unwrap();
}
