//! Model handler abstraction
//!
//! A `KeyedModelHandler` wraps a loader and a scoring model behind the
//! contract the inference stages rely on: the model is loaded at most once
//! per process and kept resident, and every inference call returns the input
//! key unchanged alongside the raw score.

use std::sync::Arc;

use tokio::sync::OnceCell;
use toxstream_core::{KeyedRecord, Prediction, Result};
use tracing::info;

/// A loaded model that can score a single text.
///
/// Implementations are read-only after construction; the handler shares one
/// instance across all inference calls on a worker.
pub trait ScoringModel: Send + Sync {
    /// Compute the raw score for one input text.
    ///
    /// The score scale is model-specific. Fails with an inference error on
    /// shape/type mismatches.
    fn raw_score(&self, text: &str) -> Result<f32>;
}

/// Loads a scoring model from its artifact location.
pub trait ModelLoader: Send + Sync {
    /// Load the model. Called at most once per handler; an expensive,
    /// amortized resource acquisition.
    fn load(&self) -> Result<Arc<dyn ScoringModel>>;

    /// Name used to tag predictions and log lines
    fn name(&self) -> &str;
}

/// Key-preserving model handler.
///
/// The loaded model is process-local state initialized on first use and
/// treated as immutable afterwards; it is released when the handler is
/// dropped at worker shutdown.
pub struct KeyedModelHandler {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn ScoringModel>>,
}

impl KeyedModelHandler {
    /// Create a handler around a loader. Loading is deferred until the first
    /// inference call.
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    /// Name of the wrapped model
    pub fn name(&self) -> &str {
        self.loader.name()
    }

    /// Whether the model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Load the model if it has not been loaded yet.
    ///
    /// Idempotent; concurrent callers share a single load.
    pub async fn ensure_loaded(&self) -> Result<&Arc<dyn ScoringModel>> {
        self.model
            .get_or_try_init(|| async {
                info!(model = self.loader.name(), "loading model");
                self.loader.load()
            })
            .await
    }

    /// Score one keyed record, preserving its key in the prediction.
    pub async fn infer(&self, record: &KeyedRecord) -> Result<Prediction> {
        let model = self.ensure_loaded().await?;
        let score = model.raw_score(&record.text)?;

        Ok(Prediction {
            key: record.key.clone(),
            score,
            model: self.loader.name().to_string(),
            event_time: record.event_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use toxstream_core::Error;

    struct FixedModel {
        score: f32,
    }

    impl ScoringModel for FixedModel {
        fn raw_score(&self, _text: &str) -> Result<f32> {
            Ok(self.score)
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicU32>,
        score: f32,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> Result<Arc<dyn ScoringModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedModel { score: self.score }))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct BrokenLoader;

    impl ModelLoader for BrokenLoader {
        fn load(&self) -> Result<Arc<dyn ScoringModel>> {
            Err(Error::model_load("artifact missing"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_key_preserved() {
        let handler = KeyedModelHandler::new(CountingLoader {
            loads: Arc::new(AtomicU32::new(0)),
            score: -0.9,
        });

        let record = KeyedRecord::new("u1", "hello");
        let prediction = handler.infer(&record).await.unwrap();

        assert_eq!(prediction.key, "u1");
        assert_eq!(prediction.score, -0.9);
        assert_eq!(prediction.model, "counting");
        assert_eq!(prediction.event_time, record.event_time);
    }

    #[tokio::test]
    async fn test_model_loaded_once() {
        let loads = Arc::new(AtomicU32::new(0));
        let handler = KeyedModelHandler::new(CountingLoader {
            loads: Arc::clone(&loads),
            score: 0.3,
        });

        assert!(!handler.is_loaded());

        for i in 0..10 {
            let record = KeyedRecord::new(format!("u{i}"), "text");
            handler.infer(&record).await.unwrap();
        }

        assert!(handler.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let handler = KeyedModelHandler::new(BrokenLoader);
        let record = KeyedRecord::new("u1", "hello");

        let err = handler.infer(&record).await.unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        assert!(!handler.is_loaded());
    }
}
