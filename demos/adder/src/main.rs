//! Adder Demo
//!
//! The parent forks itself as a worker and talks to it over the worker's
//! stdin/stdout:
//!
//! ```text
//! parent ── request "+" {a, b} ──▶ worker
//!        ◀── response a + b ─────
//!        ── task "sendInvalidMessage" ──▶
//!        ◀── "This is an invalid message!" (reported as invalidMessage)
//!        ── request "exit" ──▶
//!        ◀── response "ok", worker exits
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package adder -- parent --rounds 5
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ipcbus::prelude::*;
use ipcbus::runtime::config::LogOutput;
use ipcbus::transport::process;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Add numbers in a forked worker process.
#[derive(Parser)]
#[command(name = "adder", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Spawn a worker and send it additions.
    Parent {
        /// Number of additions to request.
        #[arg(long, default_value_t = 3)]
        rounds: i64,
    },

    /// Serve requests on stdin/stdout. Launched by `parent`.
    Worker,
}

/// Payload a worker sends to exercise the peer's invalid message handling.
const INVALID_MESSAGE: &str = "This is an invalid message!";

// ============================================================================
// Parent
// ============================================================================

async fn run_parent(config: IpcBusConfig, rounds: i64) -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut command = Command::new(exe);
    command.arg("worker");

    let (transport, mut child) = process::spawn(command)?;
    let bus = Bus::from_config(&config.bus, Arc::new(transport))?;

    let mut notifications = bus.subscribe();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                Notification::InvalidMessage(raw) => warn!(%raw, "Worker sent an invalid message"),
                Notification::Event(event) => info!(cmd = %event.cmd(), "Worker event"),
                other => debug!(kind = other.name(), "Notification"),
            }
        }
    });

    for a in 0..rounds {
        let b = a * 10;
        let sum = bus.request("+", json!({ "a": a, "b": b })).await?;
        info!("{a} + {b} = {sum}");
    }

    bus.task("sendInvalidMessage", json!({}))?;

    let reply = bus.request("exit", Value::Null).await?;
    info!(%reply, "Worker acknowledged exit");

    let status = child.wait().await?;
    bus.destroy();

    if !status.success() {
        bail!("worker exited with {status}");
    }
    Ok(())
}

// ============================================================================
// Worker
// ============================================================================

/// Adds `payload.a` and `payload.b`, keeping integers exact.
fn add(payload: &Value) -> Value {
    match (payload["a"].as_i64(), payload["b"].as_i64()) {
        (Some(a), Some(b)) => json!(a + b),
        _ => match (payload["a"].as_f64(), payload["b"].as_f64()) {
            (Some(a), Some(b)) => json!(a + b),
            _ => Value::Null,
        },
    }
}

async fn run_worker(config: IpcBusConfig) -> Result<()> {
    let transport = Arc::new(StreamTransport::stdio());
    let bus = Bus::from_config(&config.bus, transport.clone())?;
    let mut notifications = bus.subscribe();

    bus.event("ready", json!({ "pid": std::process::id() }))?;

    // Ends when the parent closes our stdin.
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Request(request) => match request.cmd() {
                "+" => {
                    let payload = request.payload.clone().unwrap_or_default();
                    bus.respond_to(&request, add(&payload))?;
                }
                "exit" => {
                    bus.respond_to(&request, "ok")?;
                    transport.flush().await?;
                    break;
                }
                other => warn!(cmd = other, "Unknown request"),
            },
            Notification::Task(task) if task.cmd() == "sendInvalidMessage" => {
                bus.send_raw(json!(INVALID_MESSAGE))?;
            }
            Notification::InvalidMessage(raw) => warn!(%raw, "Parent sent an invalid message"),
            other => debug!(kind = other.name(), "Ignoring notification"),
        }
    }

    bus.destroy();
    info!("Worker exiting");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load_validated()?;

    let mut logging = LoggingBuilder::from_config(&config.logging);
    if matches!(cli.command, Mode::Worker) && config.logging.output == LogOutput::Stdout {
        // stdout carries the protocol
        logging = logging.output(LogOutput::Stderr);
    }
    logging.init();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async move {
        match cli.command {
            Mode::Parent { rounds } => run_parent(config, rounds).await,
            Mode::Worker => run_worker(config).await,
        }
    });
    // The worker's blocking stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();
    result
}
