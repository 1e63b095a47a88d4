//! maya-adaptor - render-farm adaptor for headless Maya
//!
//! CLI entry point used by the render-farm task runner. The `run` command
//! drives one full session: validate payloads, start the action-channel
//! server and the worker, render each requested frame, then clean up.
//! Ctrl-C cancels by killing the worker outright; cleanup still runs.
//!
//! Payload arguments accept either inline JSON or a path to a JSON file.

use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use maya_adaptor::models::parse_rules;
use maya_adaptor::{APP_NAME, AdaptorConfig, MayaAdaptor, PathMappingRule, VERSION};

#[derive(Parser)]
#[command(name = "maya-adaptor", version, about = "Drive a headless Maya worker through a render session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a render session: initialize the worker, render the given
    /// frames, then clean up
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Initialization payload (inline JSON or a file path)
    #[arg(long)]
    init_data: String,

    /// Per-frame payload, repeatable (inline JSON or a file path)
    #[arg(long = "run-data")]
    run_data: Vec<String>,

    /// Path-mapping rule document (inline JSON or a file path)
    #[arg(long)]
    path_mapping_rules: Option<String>,

    /// Adaptor configuration file (YAML)
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Directory for rotating log files
    #[arg(long, default_value = "logs")]
    log_dir: Utf8PathBuf,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command(args),
    }
}

fn run_command(args: RunArgs) -> Result<()> {
    let _guard = maya_adaptor::logging::setup_logging(&args.log_dir, APP_NAME, args.debug, true)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("maya-adaptor-worker")
        .build()
        .context("Failed to build the tokio runtime")?;

    let result = runtime.block_on(run(args));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Adaptor shutdown complete");
    result
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => AdaptorConfig::load(path)?,
        None => AdaptorConfig::default(),
    };
    let init_data = load_payload(&args.init_data).context("Invalid --init-data")?;
    let rules = load_rules(args.path_mapping_rules.as_deref())?;
    let frames: Vec<Value> = args
        .run_data
        .iter()
        .map(|arg| load_payload(arg).context("Invalid --run-data"))
        .collect::<Result<_>>()?;

    let mut adaptor = MayaAdaptor::new(init_data, rules, config);

    // Whatever happens while driving the session, cleanup must run.
    let result = drive(&mut adaptor, &frames).await;
    adaptor.on_cleanup().await;
    result
}

async fn drive(adaptor: &mut MayaAdaptor, frames: &[Value]) -> Result<()> {
    adaptor.on_start().await?;

    let cancel = adaptor.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    for frame in frames {
        adaptor.on_run(frame).await?;
    }
    adaptor.on_stop().await;

    ctrl_c.abort();
    Ok(())
}

fn load_rules(arg: Option<&str>) -> Result<Vec<PathMappingRule>> {
    match arg {
        Some(arg) => {
            let document = load_payload(arg).context("Invalid --path-mapping-rules")?;
            parse_rules(&document).context("Invalid path-mapping rule document")
        }
        None => Ok(Vec::new()),
    }
}

/// Parse an argument as inline JSON when it looks like JSON, otherwise as a
/// path to a JSON file.
fn load_payload(arg: &str) -> Result<Value> {
    let trimmed = arg.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(arg).context("Malformed inline JSON")
    } else {
        let contents = std::fs::read_to_string(arg)
            .with_context(|| format!("Failed to read payload file: {arg}"))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Malformed JSON in payload file: {arg}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_payload_inline_json() {
        let value = load_payload(r#"{"frame": 3}"#).unwrap();
        assert_eq!(value["frame"], 3);
    }

    #[test]
    fn test_load_payload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"renderer": "arnold"}}"#).unwrap();
        file.flush().unwrap();

        let value = load_payload(file.path().to_str().unwrap()).unwrap();
        assert_eq!(value["renderer"], "arnold");
    }

    #[test]
    fn test_load_payload_missing_file() {
        assert!(load_payload("/nonexistent/payload.json").is_err());
    }

    #[test]
    fn test_load_rules_defaults_to_empty() {
        assert!(load_rules(None).unwrap().is_empty());
    }
}
