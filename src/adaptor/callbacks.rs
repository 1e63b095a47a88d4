// Classifier registry
//
// Builds the per-session table of regex callbacks applied to the worker's
// stdout/stderr. Which entries are present depends on initialization flags;
// the license handlers enrich their fault with environment diagnostics
// because a bare license message is useless on a farm host.

use std::env;
use std::sync::Arc;

use regex::Regex;

use crate::handlers::RegexCallback;
use crate::models::InitData;
use crate::state::SessionMonitor;

const MAYA_LICENSE_ERROR: &str = "RuntimeError: Error encountered when initializing Maya - \
     Please check for sufficient disk space \
     and necessary write permissions of MAYA_APP_DIR.";
const VRAY_LICENSE_ERROR: &str = "error: Could not obtain a license";
const RENDERMAN_LICENSE_ERROR: &str = r".*\{SEVERE\}\s+License.*";

/// Build the classifier callbacks for one render session.
///
/// Every entry is tried against every output line; the error and
/// arnold-license entries are only registered when the corresponding init
/// flags are set.
pub(crate) fn regex_callbacks(
    init: &InitData,
    monitor: &Arc<SessionMonitor>,
) -> Vec<RegexCallback> {
    let completed_regexes =
        vec![compile("MayaClient: Finished Rendering Frame [0-9]+")];
    let progress_regexes = vec![
        compile(r"\[PROGRESS\] ([0-9]+) percent"),
        compile("([0-9]+)% done"),    // arnold
        compile(r"R90000\s+([0-9]+)%"), // renderman
    ];
    let error_regexes = vec![compile(".*Exception:.*|.*Error:.*|.*Warning.*|.*SEVERE.*")];
    let version_regexes = vec![compile("MayaClient: Maya Version ([0-9]+)")];

    let mut callbacks = Vec::new();

    let complete_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(completed_regexes, move |_| {
        // No-op once a fault is pending, unless cleanup suppresses it.
        if complete_monitor.fault_pending() {
            return;
        }
        complete_monitor.set_rendering(false);
        complete_monitor.update_status(100, None);
    }));

    let progress_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(progress_regexes, move |captures| {
        if progress_monitor.fault_pending() {
            return;
        }
        if let Some(percent) = captures.get(1).and_then(|m| m.as_str().parse().ok()) {
            progress_monitor.update_status(percent, None);
        }
    }));

    if init.strict_error_checking() {
        let error_monitor = monitor.clone();
        callbacks.push(RegexCallback::new(error_regexes, move |captures| {
            error_monitor.record_fault(format!("Maya Encountered an Error: {}", &captures[0]));
        }));
    }

    if init.error_on_arnold_license_fail() {
        let arnold_monitor = monitor.clone();
        callbacks.push(RegexCallback::new(
            vec![compile(
                "(aborting render because the abort_on_license_fail option was enabled)",
            )],
            move |captures| {
                arnold_monitor
                    .record_fault(format!("Maya Encountered an Error: {}", &captures[0]));
            },
        ));
    }

    let renderman_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(
        vec![compile(RENDERMAN_LICENSE_ERROR)],
        move |captures| {
            renderman_monitor.record_fault(format!(
                "{}\nThis error is typically associated with a licensing error \
                 when using RenderMan. Check your licensing configuration.\n\
                 RMANTREE: {}\nPIXAR_LICENSE_FILE: {}\n",
                &captures[0],
                env_or_unset("RMANTREE"),
                env_or_unset("PIXAR_LICENSE_FILE"),
            ));
        },
    ));

    let vray_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(
        vec![compile(VRAY_LICENSE_ERROR)],
        move |captures| {
            vray_monitor.record_fault(format!(
                "{}\nThis error is typically associated with a licensing error \
                 when using Vray renderer with MayaIO. Check your licensing configuration.\n",
                &captures[0],
            ));
        },
    ));

    let license_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(
        vec![compile(MAYA_LICENSE_ERROR)],
        move |captures| {
            license_monitor.record_fault(format!(
                "{}\nThis error is typically associated with a licensing error \
                 when using MayaIO. Check your licensing configuration.\n\
                 Free disc space: {}\nMAYA_APP_DIR: {}\nADSKFLEX_LICENSE_FILE: {}",
                &captures[0],
                free_disk_space(),
                env_or_unset("MAYA_APP_DIR"),
                env_or_unset("ADSKFLEX_LICENSE_FILE"),
            ));
        },
    ));

    let version_monitor = monitor.clone();
    callbacks.push(RegexCallback::new(version_regexes, move |captures| {
        version_monitor.record_version(&captures[1]);
    }));

    callbacks
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid classifier regex")
}

fn env_or_unset(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "<not set>".to_string())
}

/// Free space, in mebibytes, of the volume holding MAYA_APP_DIR (or the
/// working directory when it is unset).
fn free_disk_space() -> String {
    let probe = env::var("MAYA_APP_DIR")
        .map(std::path::PathBuf::from)
        .or_else(|_| env::current_dir());
    match probe.and_then(|path| fs2::available_space(&path)) {
        Ok(bytes) => format!("{}M", bytes / 1024 / 1024),
        Err(err) => {
            tracing::warn!("could not probe free disk space: {}", err);
            "unknown".to_string()
        }
    }
}
