//! Inference stage
//!
//! Applies a keyed model handler to every record of a keyed stream. One
//! prediction per input record, output order not guaranteed relative to
//! input. A failing element is logged, counted, and dropped; the stage only
//! ends when its input channel closes.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toxstream_core::{KeyedRecord, Prediction};
use toxstream_models::KeyedModelHandler;
use tracing::{debug, warn};

/// One inference branch of the pipeline.
pub struct InferenceStage {
    handler: Arc<KeyedModelHandler>,
}

impl InferenceStage {
    /// Create a stage around a shared model handler
    pub fn new(handler: Arc<KeyedModelHandler>) -> Self {
        Self { handler }
    }

    /// Spawn the stage task: read keyed records from `input`, send one
    /// prediction per record to `output`.
    pub fn spawn(
        self,
        mut input: mpsc::Receiver<KeyedRecord>,
        output: mpsc::Sender<Prediction>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let model = self.handler.name().to_string();

            while let Some(record) = input.recv().await {
                match self.handler.infer(&record).await {
                    Ok(prediction) => {
                        counter!("toxstream_predictions_total", "model" => model.clone())
                            .increment(1);
                        if output.send(prediction).await.is_err() {
                            debug!(model = %model, "downstream closed, stopping inference stage");
                            break;
                        }
                    }
                    Err(e) => {
                        counter!("toxstream_element_errors_total", "stage" => "inference")
                            .increment(1);
                        warn!(model = %model, key = %record.key, error = %e, "dropping record");
                    }
                }
            }

            debug!(model = %model, "inference stage finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toxstream_core::Result;
    use toxstream_models::{ModelLoader, ScoringModel};

    struct LengthModel;

    impl ScoringModel for LengthModel {
        fn raw_score(&self, text: &str) -> Result<f32> {
            if text.contains("bad-shape") {
                return Err(toxstream_core::Error::inference("shape mismatch"));
            }
            Ok(text.len() as f32)
        }
    }

    struct LengthLoader;

    impl ModelLoader for LengthLoader {
        fn load(&self) -> Result<Arc<dyn ScoringModel>> {
            Ok(Arc::new(LengthModel))
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    #[tokio::test]
    async fn test_one_prediction_per_record() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let stage = InferenceStage::new(Arc::new(KeyedModelHandler::new(LengthLoader)));
        let handle = stage.spawn(in_rx, out_tx);

        in_tx.send(KeyedRecord::new("u1", "abc")).await.unwrap();
        in_tx.send(KeyedRecord::new("u2", "abcdef")).await.unwrap();
        drop(in_tx);

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.key, "u1");
        assert_eq!(first.score, 3.0);
        assert_eq!(second.key, "u2");
        assert_eq!(second.score, 6.0);
        assert!(out_rx.recv().await.is_none());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_element_is_dropped() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let stage = InferenceStage::new(Arc::new(KeyedModelHandler::new(LengthLoader)));
        let handle = stage.spawn(in_rx, out_tx);

        in_tx.send(KeyedRecord::new("u1", "bad-shape")).await.unwrap();
        in_tx.send(KeyedRecord::new("u2", "ok")).await.unwrap();
        drop(in_tx);

        // Only the healthy record comes through.
        let prediction = out_rx.recv().await.unwrap();
        assert_eq!(prediction.key, "u2");
        assert!(out_rx.recv().await.is_none());

        handle.await.unwrap();
    }
}
