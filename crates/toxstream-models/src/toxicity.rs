//! Threshold-based toxicity flagging
//!
//! A raw score maps to a binary label by comparison against a threshold
//! calibrated for the model that produced the score. Only scores strictly
//! below the threshold are toxic; a score at or above it is clean. Model
//! scales differ, so a flagger is always paired with exactly one model
//! artifact; pairing it with the wrong one silently produces wrong labels
//! with no error signaled.

use toxstream_core::{Label, Prediction};

/// Placeholder threshold for the gaming-chat model. Needs calibration
/// against the deployed model's score distribution before real use.
pub const DEFAULT_GAMING_THRESHOLD: f32 = -0.5;

/// Pure score-to-label transform for one model's output scale.
#[derive(Debug, Clone, Copy)]
pub struct ToxicityFlagger {
    threshold: f32,
}

impl ToxicityFlagger {
    /// Create a flagger with the given threshold
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// The configured threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Map a raw score to a label
    pub fn label(&self, score: f32) -> Label {
        if score >= self.threshold {
            Label::NotToxic
        } else {
            Label::Toxic
        }
    }

    /// Label a prediction
    pub fn flag(&self, prediction: &Prediction) -> Label {
        self.label(prediction.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaming_scale_labels() {
        let flagger = ToxicityFlagger::new(DEFAULT_GAMING_THRESHOLD);

        assert_eq!(flagger.label(-0.9), Label::Toxic);
        assert_eq!(flagger.label(0.3), Label::NotToxic);
    }

    #[test]
    fn test_boundary_score_is_not_toxic() {
        // Only scores strictly below the threshold are flagged.
        let flagger = ToxicityFlagger::new(-0.5);

        assert_eq!(flagger.label(-0.5), Label::NotToxic);
        assert_eq!(flagger.label(-0.500_001), Label::Toxic);
    }

    #[test]
    fn test_scales_are_not_interchangeable() {
        // The same raw score labels differently under two model scales; a
        // model/threshold mismatch flips labels silently.
        let gaming = ToxicityFlagger::new(DEFAULT_GAMING_THRESHOLD);
        let sentiment = ToxicityFlagger::new(0.0);

        assert_eq!(gaming.label(-0.2), Label::NotToxic);
        assert_eq!(sentiment.label(-0.2), Label::Toxic);
    }

    #[test]
    fn test_flag_uses_prediction_score() {
        let flagger = ToxicityFlagger::new(-0.5);
        let prediction = Prediction {
            key: "u1".to_string(),
            score: -0.9,
            model: "gaming".to_string(),
            event_time: chrono::Utc::now(),
        };

        assert_eq!(flagger.flag(&prediction), Label::Toxic);
    }
}
