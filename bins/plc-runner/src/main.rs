use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use plc_api::error::CallError;
use plc_api::message::{CallRequest, CallResponse};
use plc_engine::config::PlcConfig;
use plc_engine::dispatcher::SessionDispatcher;

#[derive(Parser)]
#[command(name = "plc-runner", about = "Run procedural-language call requests through the bridge")]
struct Cli {
    /// Path to TOML configuration file. Defaults apply when absent.
    #[arg(long, env = "PLC_CONFIG")]
    config: Option<String>,

    /// JSON call request file. May be repeated.
    #[arg(long = "request", required = true)]
    requests: Vec<String>,

    /// Dispatch all requests at once instead of one after another.
    #[arg(long)]
    concurrent: bool,
}

fn outcome_line(path: &str, outcome: Result<CallResponse, CallError>) -> String {
    let line = match outcome {
        Ok(response) => serde_json::json!({ "request": path, "response": response }),
        Err(e) => serde_json::json!({
            "request": path,
            "status": e.kind.as_str(),
            "message": e.message,
        }),
    };
    line.to_string()
}

fn load_request(path: &str) -> Result<CallRequest, CallError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CallError::argument(format!("{path}: {e}")))?;
    serde_json::from_str(&text).map_err(|e| CallError::from(e).with_context(path))
}

async fn run_one(
    dispatcher: Arc<SessionDispatcher>,
    cancel: Arc<AtomicBool>,
    path: String,
) -> String {
    let request = match load_request(&path) {
        Ok(r) => r,
        Err(e) => return outcome_line(&path, Err(e)),
    };
    let task = tokio::task::spawn_blocking(move || dispatcher.dispatch(&request, &cancel));
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(CallError::fatal(format!("dispatch task failed: {e}"))),
    };
    outcome_line(&path, outcome)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            match PlcConfig::load(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load config");
                    std::process::exit(1);
                }
            }
        }
        None => PlcConfig::default(),
    };

    let dispatcher = match SessionDispatcher::new(config) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::error!(error = %e, "failed to start session dispatcher");
            std::process::exit(1);
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling in-flight calls");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    tracing::info!(
        requests = cli.requests.len(),
        concurrent = cli.concurrent,
        mode = ?dispatcher.mode(),
        "dispatching"
    );

    let mut failed = false;
    if cli.concurrent {
        let tasks: Vec<_> = cli
            .requests
            .iter()
            .map(|path| tokio::spawn(run_one(dispatcher.clone(), cancel.clone(), path.clone())))
            .collect();
        for task in tasks {
            match task.await {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    tracing::error!(error = %e, "request task failed");
                    failed = true;
                }
            }
        }
    } else {
        for path in &cli.requests {
            println!("{}", run_one(dispatcher.clone(), cancel.clone(), path.clone()).await);
        }
    }

    if failed {
        std::process::exit(1);
    }
}
