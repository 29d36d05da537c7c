//! Traffic decision replay tool.
//!
//! Reads request contexts as JSON lines from stdin, runs each through the
//! decision core and prints one decision per line on stdout.
//!
//! ```text
//! stdin:  {"context": {"user_id": "alice", "headers": {"x-canary": "1"}}, "outcome": "failure"}
//! stdout: {"outcome":"allow","target":"v2","matched_rule_id":"canary-header"}
//! ```
//!
//! When a line carries an `outcome` and the request was allowed, the
//! outcome is reported back through the completion handle, so a recorded
//! traffic trace drives the circuit breakers the way live traffic would.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use traffic_control::admission::{Decision, Outcome, RequestOutcome, TrafficCoordinator};
use traffic_control::clock;
use traffic_control::config::loader::load_config;
use traffic_control::config::watcher::ConfigWatcher;
use traffic_control::config::TrafficConfig;
use traffic_control::lifecycle::{signals, startup, Shutdown};
use traffic_control::observability::logging;
use traffic_control::routing::{Predicate, RequestContext};

#[derive(Parser)]
#[command(name = "traffic-control")]
#[command(about = "Replay request contexts through the traffic decision core", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload gray rules when the configuration file changes
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(default)]
    context: RequestContext,
    outcome: Option<RequestOutcome>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    outcome: Outcome,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_rule_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ReplayError {
    error: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TrafficConfig::default(),
    };

    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {e}");
    }
    tracing::info!("traffic-control v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let cancel = CancellationToken::new();
    let predicates = Vec::<(String, Predicate)>::new();
    let services = startup::start(&config, clock::system(), predicates, &shutdown).await?;
    let coordinator = services.coordinator;

    let (watcher, mut updates) = match &cli.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher), rx)
        }
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };
    // Keep the notify handle alive for the whole run.
    let _watch_guard = match watcher {
        Some(watcher) if cli.watch => Some(watcher.run()?),
        _ => None,
    };

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        signal_cancel.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown requested, stopping replay");
                break;
            }
            Some(update) = updates.recv() => {
                apply_update(&coordinator, &update);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let out = replay_line(&coordinator, &line, &cancel).await;
                stdout.write_all(out.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
    }

    shutdown.trigger();
    if let Err(e) = services.sweeper.await {
        tracing::warn!(error = %e, "Idle sweeper task failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn replay_line(coordinator: &TrafficCoordinator, line: &str, cancel: &CancellationToken) -> String {
    let record: ReplayRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed input line");
            return to_json(&ReplayError { error: e.to_string() });
        }
    };

    let mut decision = coordinator.decide(&record.context, cancel).await;
    if let (Some(outcome), Some(handle)) = (record.outcome, decision.take_completion()) {
        handle.complete(outcome);
    }
    render(&decision)
}

fn render(decision: &Decision) -> String {
    to_json(&ReplayOutput {
        outcome: decision.outcome,
        target: &decision.target,
        matched_rule_id: decision.matched_rule_id.as_deref(),
    })
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

fn apply_update(coordinator: &Arc<TrafficCoordinator>, config: &TrafficConfig) {
    match coordinator.router().replace_config(&config.gray) {
        Ok(version) => tracing::info!(
            version,
            "Gray rules reloaded; other sections take effect on restart"
        ),
        Err(e) => tracing::error!(error = %e, "Reloaded gray rules rejected, keeping current rules"),
    }
}
