//! toxstream Models
//!
//! Model handling for the inference stages: a uniform "score one text"
//! contract, lazy once-per-process artifact loading, and the threshold
//! transform that turns raw scores into toxicity labels.
//!
//! The two production models (gaming chat, movie reviews) share the same
//! artifact format but score on different scales; a threshold is calibrated
//! for one model's scale and never compared across models.

pub mod handler;
pub mod loader;
pub mod toxicity;

pub use handler::{KeyedModelHandler, ModelLoader, ScoringModel};
pub use loader::{ModelConfig, ModelSource, SavedClassifier, SavedClassifierLoader};
pub use toxicity::{ToxicityFlagger, DEFAULT_GAMING_THRESHOLD};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::handler::{KeyedModelHandler, ModelLoader, ScoringModel};
    pub use crate::loader::{ModelConfig, ModelSource, SavedClassifierLoader};
    pub use crate::toxicity::ToxicityFlagger;
}
