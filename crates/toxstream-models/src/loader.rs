//! Artifact loading for the saved toxicity classifiers
//!
//! Artifacts are safetensors files holding three inference tensors: an
//! `embeddings` table, a `classifier.weight` vector, and a `classifier.bias`
//! scalar, plus a `tokenizer.json` sidecar. Only the inference tensors are
//! read; optimizer or other training state present in an artifact is ignored,
//! since the serving path never needs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use toxstream_core::{Error, Result};
use tracing::debug;

use crate::handler::{ModelLoader, ScoringModel};

/// Source location for model weights
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Load from the local file system
    LocalPath(PathBuf),

    /// Download from the Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        filename: String,
    },
}

/// Configuration for loading a saved classifier
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Name used to tag predictions from this model
    pub name: String,

    /// Source of the model weights
    pub source: ModelSource,

    /// Explicit tokenizer path; defaults to a `tokenizer.json` sidecar
    pub tokenizer_path: Option<PathBuf>,
}

impl ModelConfig {
    /// Create a configuration from a local weights path
    pub fn from_local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: ModelSource::LocalPath(path.into()),
            tokenizer_path: None,
        }
    }

    /// Create a configuration from a Hugging Face repo and filename
    pub fn from_hf(
        name: impl Into<String>,
        repo_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: ModelSource::HuggingFace {
                repo_id: repo_id.into(),
                revision: None,
                filename: filename.into(),
            },
            tokenizer_path: None,
        }
    }

    /// Parse an artifact location string.
    ///
    /// `hf://<repo_id>/<filename>` selects the Hugging Face Hub; anything
    /// else is treated as a local path.
    pub fn from_location(name: impl Into<String>, location: &str) -> Result<Self> {
        if let Some(rest) = location.strip_prefix("hf://") {
            let (repo_id, filename) = rest
                .rsplit_once('/')
                .ok_or_else(|| Error::config(format!("bad hf:// location: {location}")))?;
            if repo_id.is_empty() || filename.is_empty() {
                return Err(Error::config(format!("bad hf:// location: {location}")));
            }
            Ok(Self::from_hf(name, repo_id, filename))
        } else {
            Ok(Self::from_local(name, location))
        }
    }

    /// Set an explicit tokenizer path
    pub fn with_tokenizer(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokenizer_path = Some(path.into());
        self
    }

    /// Set the Hugging Face revision
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        if let ModelSource::HuggingFace {
            repo_id, filename, ..
        } = self.source
        {
            self.source = ModelSource::HuggingFace {
                repo_id,
                revision: Some(revision.into()),
                filename,
            };
        }
        self
    }
}

/// A saved classifier: mean-pooled token embeddings through a linear head.
pub struct SavedClassifier {
    tokenizer: Tokenizer,
    embeddings: Tensor,
    weight: Tensor,
    bias: f32,
    device: Device,
}

impl SavedClassifier {
    /// Load a classifier from resolved weight and tokenizer paths
    pub fn load(weights_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let device = Device::Cpu;

        let tensors = candle_core::safetensors::load(weights_path, &device)
            .map_err(|e| Error::model_load(format!("{weights_path:?}: {e}")))?;

        let embeddings = tensors
            .get("embeddings")
            .cloned()
            .ok_or_else(|| Error::model_load(format!("{weights_path:?}: missing embeddings tensor")))?;

        let weight = tensors
            .get("classifier.weight")
            .cloned()
            .ok_or_else(|| Error::model_load(format!("{weights_path:?}: missing classifier.weight")))?
            .flatten_all()
            .map_err(|e| Error::model_load(format!("classifier.weight: {e}")))?;

        let bias_tensor = tensors
            .get("classifier.bias")
            .cloned()
            .ok_or_else(|| Error::model_load(format!("{weights_path:?}: missing classifier.bias")))?;
        let bias = bias_tensor
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::model_load(format!("classifier.bias: {e}")))?
            .first()
            .copied()
            .ok_or_else(|| Error::model_load("classifier.bias is empty"))?;

        let embedding_dim = embeddings
            .dims()
            .get(1)
            .copied()
            .ok_or_else(|| Error::model_load("embeddings tensor is not two-dimensional"))?;
        if weight.dims() != [embedding_dim] {
            return Err(Error::model_load(format!(
                "classifier.weight shape {:?} does not match embedding dim {embedding_dim}",
                weight.dims()
            )));
        }

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| Error::model_load(format!("{tokenizer_path:?}: {e}")))?;

        debug!(
            ?weights_path,
            vocab = embeddings.dims()[0],
            dim = embedding_dim,
            "classifier artifact loaded"
        );

        Ok(Self {
            tokenizer,
            embeddings,
            weight,
            bias,
            device,
        })
    }
}

impl ScoringModel for SavedClassifier {
    fn raw_score(&self, text: &str) -> Result<f32> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| Error::inference(format!("tokenization failed: {e}")))?;

        let ids = encoding.get_ids();
        if ids.is_empty() {
            // Nothing to pool over; score as neutral.
            return Ok(0.0);
        }

        let ids = Tensor::new(ids, &self.device)
            .map_err(|e| Error::inference(format!("token ids: {e}")))?;

        let pooled = self
            .embeddings
            .index_select(&ids, 0)
            .and_then(|embedded| embedded.mean(0))
            .map_err(|e| Error::inference(format!("embedding lookup: {e}")))?;

        let logit = (&pooled * &self.weight)
            .and_then(|t| t.sum_all())
            .and_then(|t| t.to_scalar::<f32>())
            .map_err(|e| Error::inference(format!("linear head: {e}")))?;

        Ok(logit + self.bias)
    }
}

/// Loader resolving a `ModelConfig` to a ready `SavedClassifier`.
pub struct SavedClassifierLoader {
    config: ModelConfig,
}

impl SavedClassifierLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    /// Resolve the weights path, downloading from the hub if needed
    fn resolve_weights(&self) -> Result<PathBuf> {
        match &self.config.source {
            ModelSource::LocalPath(path) => {
                if !path.exists() {
                    return Err(Error::model_load(format!("model file not found: {path:?}")));
                }
                Ok(path.clone())
            }
            ModelSource::HuggingFace {
                repo_id,
                revision,
                filename,
            } => {
                let api = Api::new()
                    .map_err(|e| Error::model_load(format!("hub api init failed: {e}")))?;

                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));

                repo.get(filename)
                    .map_err(|e| Error::model_load(format!("hub download of {filename}: {e}")))
            }
        }
    }

    /// Resolve the tokenizer path: explicit config, then a sidecar next to
    /// the weights, then `tokenizer.json` in the hub repo.
    fn resolve_tokenizer(&self, weights_path: &Path) -> Result<PathBuf> {
        if let Some(path) = &self.config.tokenizer_path {
            return Ok(path.clone());
        }

        let sidecar = weights_path.with_file_name("tokenizer.json");
        if sidecar.exists() {
            return Ok(sidecar);
        }

        if let ModelSource::HuggingFace {
            repo_id, revision, ..
        } = &self.config.source
        {
            let api = Api::new()
                .map_err(|e| Error::model_load(format!("hub api init failed: {e}")))?;
            let repo = api.repo(Repo::with_revision(
                repo_id.clone(),
                RepoType::Model,
                revision.clone().unwrap_or_else(|| "main".to_string()),
            ));
            if let Ok(path) = repo.get("tokenizer.json") {
                return Ok(path);
            }
        }

        Err(Error::model_load(format!(
            "no tokenizer found for model {:?}",
            self.config.name
        )))
    }
}

impl ModelLoader for SavedClassifierLoader {
    fn load(&self) -> Result<Arc<dyn ScoringModel>> {
        let weights_path = self.resolve_weights()?;
        let tokenizer_path = self.resolve_tokenizer(&weights_path)?;
        let classifier = SavedClassifier::load(&weights_path, &tokenizer_path)?;
        Ok(Arc::new(classifier))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse_local() {
        let config = ModelConfig::from_location("gaming", "/models/gaming.safetensors").unwrap();
        assert!(matches!(config.source, ModelSource::LocalPath(_)));
        assert_eq!(config.name, "gaming");
    }

    #[test]
    fn test_location_parse_hf() {
        let config =
            ModelConfig::from_location("movie", "hf://acme/movie-tox/model.safetensors").unwrap();

        match &config.source {
            ModelSource::HuggingFace {
                repo_id,
                revision,
                filename,
            } => {
                assert_eq!(repo_id, "acme/movie-tox");
                assert!(revision.is_none());
                assert_eq!(filename, "model.safetensors");
            }
            other => panic!("expected hub source, got {other:?}"),
        }
    }

    #[test]
    fn test_location_parse_bad_hf() {
        assert!(ModelConfig::from_location("m", "hf://no-filename").is_err());
    }

    #[test]
    fn test_revision_builder() {
        let config = ModelConfig::from_hf("movie", "acme/movie-tox", "model.safetensors")
            .with_revision("v2");

        match &config.source {
            ModelSource::HuggingFace { revision, .. } => {
                assert_eq!(revision.as_deref(), Some("v2"));
            }
            other => panic!("expected hub source, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_artifact_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig::from_local("gaming", dir.path().join("nope.safetensors"));
        let loader = SavedClassifierLoader::new(config);

        let err = loader.load().map(|_| ()).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }
}
