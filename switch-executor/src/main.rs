//! Run one switchable executor: items are JSON lines on stdin, outputs JSON lines on stdout,
//! algorithm change payloads are POSTed to `/signal`.
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use envconfig::Envconfig;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switch_common::metrics::{serve, setup_metrics_routes};
use switch_executor::algorithm::DataItem;
use switch_executor::builtin;
use switch_executor::config::Config;
use switch_executor::executor::Executor;
use switch_executor::listener::TracingListener;
use switch_executor::mechanism::{MechanismConfig, SwitchMechanism};
use switch_executor::profiling::Profiler;

pub async fn index() -> &'static str {
    "switch executor"
}

async fn submit_signal(
    State(signals): State<mpsc::Sender<Vec<u8>>>,
    body: Bytes,
) -> StatusCode {
    match signals.try_send(body.to_vec()) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(mpsc::error::TrySendError::Full(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(mpsc::error::TrySendError::Closed(_)) => StatusCode::GONE,
    }
}

fn start_server(config: &Config, signals: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| std::future::ready("ok")))
        .route("/signal", post(submit_signal))
        .with_state(signals);
    let router = setup_metrics_routes(router).context("failed to install metrics recorder")?;

    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            warn!(error = %e, bind = %bind, "http server stopped");
        }
    });
    Ok(())
}

async fn read_items(items: mpsc::Sender<Value>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(payload) => {
                if items.send(payload).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "skipping line that is not JSON"),
        }
    }
}

async fn write_outputs(mut outputs: mpsc::Receiver<DataItem>) {
    let mut stdout = tokio::io::stdout();
    while let Some(output) = outputs.recv().await {
        let line = json!({"sequence": output.sequence, "payload": output.payload});
        let mut bytes = line.to_string().into_bytes();
        bytes.push(b'\n');
        if let Err(e) = stdout.write_all(&bytes).await {
            warn!(error = %e, "failed to write output");
            break;
        }
    }
    if let Err(e) = stdout.flush().await {
        warn!(error = %e, "failed to flush stdout");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;
    info!("Configuration loaded: {:?}", config);

    let registry = builtin::registry();
    let mechanism = SwitchMechanism::new(
        MechanismConfig {
            pipeline: config.pipeline_name.0.clone(),
            executor: config.executor_name.0.clone(),
            initial_algorithm: config.initial_algorithm.0.clone(),
            track_capacity: config.item_queue_capacity,
            max_state_depth: config.max_state_depth,
        },
        registry,
        config.switch_strategy.build(),
        Arc::new(TracingListener),
    )
    .with_context(|| format!("failed to start on {}", config.initial_algorithm.as_str()))?;

    let (signal_tx, signal_rx) = mpsc::channel(config.signal_queue_capacity);
    let (item_tx, item_rx) = mpsc::channel(config.item_queue_capacity);
    let (output_tx, output_rx) = mpsc::channel(config.item_queue_capacity);

    start_server(&config, signal_tx)?;
    info!("Started http server on {}", config.bind());

    let mut executor = Executor::new(
        config.pipeline_name.as_str(),
        config.executor_name.as_str(),
        mechanism,
        signal_rx,
        item_rx,
        output_tx,
    )
    .with_poll_interval(config.poll_interval.0);
    if let Some(path) = &config.profile_path {
        executor = executor.with_profiler(Profiler::new(
            path.clone(),
            config.pipeline_name.as_str(),
            config.executor_name.as_str(),
            config.profile_sample_interval.0,
        ));
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    tokio::spawn(read_items(item_tx));
    let writer = tokio::spawn(write_outputs(output_rx));

    executor.run(cancel).await.context("executor failed")?;
    writer.await.context("output writer panicked")?;

    Ok(())
}
