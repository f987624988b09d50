//! Pipeline wiring
//!
//! Builds the full stage graph over bounded channels and runs it to
//! completion. The keyed stream fans out to both inference stages; the
//! gaming branch is teed so its predictions reach the output router and the
//! join, while the movie branch feeds the join only. All mutation is local
//! to one element's processing; the only shared resources are the loaded
//! models, which are read-only after initialization.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toxstream_core::{Error, FixedWindows, KeyedRecord, Prediction, Result};
use toxstream_models::{KeyedModelHandler, ToxicityFlagger};
use tracing::{error, info, warn};

use crate::inference::InferenceStage;
use crate::join::JoinStage;
use crate::keying::{key_message, DEFAULT_KEY_ATTRIBUTE};
use crate::router::OutputRouter;
use crate::sink::{SinkStage, TableWriter};
use crate::source::{MessageSource, TopicPublisher};
use crate::{GAMING_STREAM, MOVIE_STREAM};

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fixed windowing scheme for the join stage
    pub windows: FixedWindows,

    /// Capacity of the inter-stage channels; this is the back-pressure knob
    pub channel_capacity: usize,

    /// Message attribute holding the partition key
    pub key_attribute: String,

    /// Toxicity threshold for the gaming model's score scale. Only the
    /// gaming branch feeds the router; the movie branch joins unflagged.
    pub gaming_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            windows: FixedWindows::new(Duration::from_millis(100)),
            channel_capacity: 1024,
            key_attribute: DEFAULT_KEY_ATTRIBUTE.to_string(),
            gaming_threshold: toxstream_models::DEFAULT_GAMING_THRESHOLD,
        }
    }
}

/// The assembled streaming job.
pub struct ToxicityPipeline {
    config: PipelineConfig,
}

impl ToxicityPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline until the source ends or the token is cancelled.
    ///
    /// On shutdown the stages drain in topological order: closing the keyed
    /// channels ends the inference stages, which ends the router and lets
    /// the join flush its open windows into the sink.
    pub async fn run(
        self,
        source: impl MessageSource + 'static,
        gaming: Arc<KeyedModelHandler>,
        movie: Arc<KeyedModelHandler>,
        publisher: Arc<dyn TopicPublisher>,
        table: Arc<dyn TableWriter>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let capacity = self.config.channel_capacity;

        let (gaming_in_tx, gaming_in_rx) = mpsc::channel(capacity);
        let (movie_in_tx, movie_in_rx) = mpsc::channel(capacity);
        let (gaming_pred_tx, gaming_pred_rx) = mpsc::channel(capacity);
        let (movie_pred_tx, movie_pred_rx) = mpsc::channel(capacity);
        let (router_tx, router_rx) = mpsc::channel(capacity);
        let (join_left_tx, join_left_rx) = mpsc::channel(capacity);
        let (joined_tx, joined_rx) = mpsc::channel(capacity);

        info!(
            topic = source.topic(),
            window_ms = self.config.windows.size_ms(),
            "starting toxicity pipeline"
        );

        let ingest = spawn_ingest(
            source,
            self.config.key_attribute.clone(),
            gaming_in_tx,
            movie_in_tx,
            cancel,
        );

        let gaming_stage = InferenceStage::new(gaming).spawn(gaming_in_rx, gaming_pred_tx);
        let movie_stage = InferenceStage::new(movie).spawn(movie_in_rx, movie_pred_tx);

        // Tee the gaming predictions: one copy to the router, one to the join.
        let tee = spawn_tee(gaming_pred_rx, router_tx, join_left_tx);

        let router = OutputRouter::new(
            ToxicityFlagger::new(self.config.gaming_threshold),
            publisher,
        )
        .spawn(router_rx);

        let join = JoinStage::new(self.config.windows, GAMING_STREAM, MOVIE_STREAM).spawn(
            join_left_rx,
            movie_pred_rx,
            joined_tx,
        );

        let sink = SinkStage::new(table).spawn(joined_rx);

        let results =
            join_all([ingest, gaming_stage, movie_stage, tee, router, join, sink]).await;
        for result in results {
            result.map_err(|e| Error::stream(format!("stage task failed: {e}")))?;
        }

        info!("toxicity pipeline finished");
        Ok(())
    }
}

/// Read messages from the source, key them, and fan out to both branches.
fn spawn_ingest(
    mut source: impl MessageSource + 'static,
    key_attribute: String,
    gaming_tx: mpsc::Sender<KeyedRecord>,
    movie_tx: mpsc::Sender<KeyedRecord>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cancellation requested, closing source");
                    break;
                }
                next = source.next() => next,
            };

            let message = match message {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!(topic = source.topic(), "source stream ended");
                    break;
                }
                Err(e) => {
                    error!(topic = source.topic(), error = %e, "source failed");
                    break;
                }
            };

            counter!("toxstream_messages_total").increment(1);

            let record = match key_message(&message, &key_attribute) {
                Ok(record) => record,
                Err(e) => {
                    counter!("toxstream_element_errors_total", "stage" => "keying").increment(1);
                    warn!(error = %e, "dropping unkeyable message");
                    continue;
                }
            };

            if gaming_tx.send(record.clone()).await.is_err()
                || movie_tx.send(record).await.is_err()
            {
                warn!("inference stages gone, stopping ingest");
                break;
            }
        }
    })
}

/// Forward one prediction stream into two downstream channels.
fn spawn_tee(
    mut input: mpsc::Receiver<Prediction>,
    first: mpsc::Sender<Prediction>,
    second: mpsc::Sender<Prediction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(prediction) = input.recv().await {
            if first.send(prediction.clone()).await.is_err()
                || second.send(prediction).await.is_err()
            {
                break;
            }
        }
    })
}
