//! Output router
//!
//! Labels every gaming prediction, logs the outcome, and republishes the
//! toxic ones to the alert topic as JSON `ToxicAlert` payloads. Delivery is
//! at-least-once; duplicates are acceptable downstream.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toxstream_core::{Prediction, ToxicAlert};
use toxstream_models::ToxicityFlagger;
use tracing::{debug, info, warn};

use crate::source::TopicPublisher;

/// Filters labeled predictions and publishes the flagged ones.
pub struct OutputRouter {
    flagger: ToxicityFlagger,
    publisher: Arc<dyn TopicPublisher>,
}

impl OutputRouter {
    /// Create a router pairing a flagger with the alert-topic publisher.
    ///
    /// The flagger's threshold must match the model feeding this router.
    pub fn new(flagger: ToxicityFlagger, publisher: Arc<dyn TopicPublisher>) -> Self {
        Self { flagger, publisher }
    }

    /// Spawn the router task over a prediction stream.
    pub fn spawn(self, mut input: mpsc::Receiver<Prediction>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(prediction) = input.recv().await {
                let label = self.flagger.flag(&prediction);
                info!(
                    key = %prediction.key,
                    model = %prediction.model,
                    score = prediction.score,
                    label = %label,
                    "prediction labeled"
                );

                if !label.is_toxic() {
                    continue;
                }

                counter!("toxstream_toxic_total").increment(1);

                let alert = ToxicAlert::from_prediction(&prediction);
                let payload = match serde_json::to_vec(&alert) {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(e) => {
                        counter!("toxstream_element_errors_total", "stage" => "router")
                            .increment(1);
                        warn!(key = %prediction.key, error = %e, "failed to serialize alert");
                        continue;
                    }
                };

                if let Err(e) = self.publisher.publish(payload).await {
                    counter!("toxstream_element_errors_total", "stage" => "router").increment(1);
                    warn!(
                        key = %prediction.key,
                        topic = %self.publisher.topic(),
                        error = %e,
                        "failed to publish alert"
                    );
                }
            }

            debug!(topic = %self.publisher.topic(), "output router finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use toxstream_core::Result;
    use toxstream_models::DEFAULT_GAMING_THRESHOLD;

    struct CollectingPublisher {
        payloads: Mutex<Vec<Bytes>>,
    }

    impl CollectingPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                payloads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TopicPublisher for CollectingPublisher {
        async fn publish(&self, payload: Bytes) -> Result<()> {
            self.payloads.lock().push(payload);
            Ok(())
        }

        fn topic(&self) -> &str {
            "projects/p/topics/tox-output"
        }
    }

    fn prediction(key: &str, score: f32) -> Prediction {
        Prediction {
            key: key.to_string(),
            score,
            model: "gaming".to_string(),
            event_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_only_toxic_predictions_published() {
        let publisher = CollectingPublisher::new();
        let (tx, rx) = mpsc::channel(8);

        let router = OutputRouter::new(
            ToxicityFlagger::new(DEFAULT_GAMING_THRESHOLD),
            Arc::clone(&publisher) as Arc<dyn TopicPublisher>,
        );
        let handle = router.spawn(rx);

        tx.send(prediction("u1", -0.9)).await.unwrap();
        tx.send(prediction("u2", 0.3)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let payloads = publisher.payloads.lock();
        assert_eq!(payloads.len(), 1);

        let alert: ToxicAlert = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(alert.userid, "u1");
        assert_eq!(alert.score, -0.9);
    }
}
