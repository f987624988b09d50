//! toxstream Job
//!
//! The runnable streaming job: reads chat messages from the input topic,
//! scores every message with the gaming and movie toxicity models, publishes
//! toxic content to the alert topic, and appends the windowed join of both
//! prediction streams to the output table.
//!
//! In this single-process build the input topic is fed from stdin as
//! line-delimited JSON envelopes, alerts go to stdout, and table rows are
//! appended to a local JSONL file; the trait seams in toxstream-pipeline are
//! where real queue and warehouse bindings plug in.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use toxstream_models::{KeyedModelHandler, ModelConfig, SavedClassifierLoader};
use toxstream_pipeline::{
    JsonlTableWriter, LoggingPublisher, StdinSource, TableWriter, TopicPublisher,
    ToxicityPipeline, GAMING_STREAM, MOVIE_STREAM,
};
use tracing::{debug, info, warn};

mod config;

use config::JobConfig;

#[derive(Parser, Debug)]
#[command(name = "toxstream-job")]
#[command(about = "Streaming toxicity inference job", long_about = None)]
pub struct Cli {
    /// Project the topics and table live under
    #[arg(long = "project_id")]
    project_id: String,

    /// Location of the gaming model artifact (path or hf://repo/file)
    #[arg(long)]
    gaming: String,

    /// Location of the movie model artifact (path or hf://repo/file)
    #[arg(long)]
    movie: String,

    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override the join window size in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Remaining arguments are passed through to the runner configuration
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    runner_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting toxstream job");

    let config = JobConfig::load(&cli.config, &cli)?;
    if !cli.runner_args.is_empty() {
        debug!(args = ?cli.runner_args, "runner arguments (unused in single-process mode)");
    }

    let input_topic = format!("projects/{}/topics/tox-input", cli.project_id);
    let output_topic = format!("projects/{}/topics/tox-output", cli.project_id);
    let output_table = format!("{}:demo.tox", cli.project_id);

    info!("Input topic: {}", input_topic);
    info!("Output topic: {}", output_topic);
    info!("Output table: {}", output_table);
    info!("Join window: {}ms", config.window_ms);

    init_metrics(config.metrics_port)?;

    let gaming = Arc::new(KeyedModelHandler::new(SavedClassifierLoader::new(
        ModelConfig::from_location(GAMING_STREAM, &cli.gaming)?,
    )));
    let movie = Arc::new(KeyedModelHandler::new(SavedClassifierLoader::new(
        ModelConfig::from_location(MOVIE_STREAM, &cli.movie)?,
    )));

    let source = StdinSource::new(&input_topic);
    let publisher: Arc<dyn TopicPublisher> = Arc::new(LoggingPublisher::new(&output_topic));
    let table: Arc<dyn TableWriter> =
        Arc::new(JsonlTableWriter::open(&output_table, &config.table_path).await?);

    // Cancellation is pipeline-wide: a shutdown signal stops the whole job.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping job...");
        signal_cancel.cancel();
    });

    let pipeline = ToxicityPipeline::new(config.pipeline_config());
    pipeline
        .run(source, gaming, movie, publisher, table, cancel)
        .await?;

    info!("Job shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("toxstream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("toxstream=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus exporter and describe the job's metrics
fn init_metrics(port: u16) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    metrics::describe_counter!(
        "toxstream_messages_total",
        "Total number of messages read from the input topic"
    );
    metrics::describe_counter!(
        "toxstream_predictions_total",
        "Total number of predictions by model"
    );
    metrics::describe_counter!(
        "toxstream_toxic_total",
        "Total number of predictions flagged toxic"
    );
    metrics::describe_counter!(
        "toxstream_joins_total",
        "Total number of joined records finalized"
    );
    metrics::describe_counter!(
        "toxstream_rows_total",
        "Total number of rows appended to the output table"
    );
    metrics::describe_counter!(
        "toxstream_late_drops_total",
        "Predictions dropped for arriving after their window was finalized"
    );
    metrics::describe_counter!(
        "toxstream_element_errors_total",
        "Per-element errors by stage"
    );

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
