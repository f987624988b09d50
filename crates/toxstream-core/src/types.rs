//! Record types flowing through the toxstream pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A raw message as delivered by the input topic.
///
/// Attributes carry routing metadata (the user identifier lives there);
/// the payload is expected to be UTF-8 text but is kept as raw bytes until
/// the keying transform decodes it.
#[derive(Debug, Clone)]
pub struct Message {
    /// Key/value attributes attached at publish time
    pub attributes: HashMap<String, String>,

    /// Raw message payload
    pub data: Bytes,

    /// Ingestion timestamp; doubles as the event time for windowing
    pub publish_time: DateTime<Utc>,
}

impl Message {
    /// Create a new message with the given payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            attributes: HashMap::new(),
            data: data.into(),
            publish_time: Utc::now(),
        }
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the publish time (useful for replay and tests)
    pub fn with_publish_time(mut self, time: DateTime<Utc>) -> Self {
        self.publish_time = time;
        self
    }
}

/// A record tagged with its partition key.
///
/// The key is carried unchanged through every downstream stage so the two
/// inference streams can be correlated again at the join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRecord {
    /// Partition/grouping key (the user identifier)
    pub key: String,

    /// Decoded message text
    pub text: String,

    /// Event time inherited from the source message
    pub event_time: DateTime<Utc>,
}

impl KeyedRecord {
    /// Create a new keyed record with the current time as event time
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            event_time: Utc::now(),
        }
    }
}

/// A single model output for one keyed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Key of the record this prediction was computed for
    pub key: String,

    /// Raw model score; the scale is model-specific
    pub score: f32,

    /// Name of the model that produced the score
    pub model: String,

    /// Event time inherited from the keyed record
    pub event_time: DateTime<Utc>,
}

/// Binary toxicity label derived from a prediction via a per-model threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Toxic,
    NotToxic,
}

impl Label {
    /// String form used in logs and serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toxic => "toxic",
            Self::NotToxic => "not_toxic",
        }
    }

    /// Whether this label marks content for republication
    pub fn is_toxic(&self) -> bool {
        matches!(self, Self::Toxic)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload republished to the output topic for a toxic prediction.
///
/// Serialized as JSON so consumers can reconstruct the (key, score) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicAlert {
    /// User identifier the message was keyed by
    pub userid: String,

    /// Raw score that crossed the threshold
    pub score: f32,
}

impl ToxicAlert {
    /// Build an alert from a prediction
    pub fn from_prediction(prediction: &Prediction) -> Self {
        Self {
            userid: prediction.key.clone(),
            score: prediction.score,
        }
    }
}

/// Predictions from all inference streams sharing one key within one window.
///
/// Every configured stream name is present in `streams`, with an empty list
/// for a stream that produced nothing for the key before the window closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    /// The shared partition key
    pub key: String,

    /// Index of the window this group was finalized in
    pub window: i64,

    /// Stream name -> predictions for this key in this window
    pub streams: BTreeMap<String, Vec<Prediction>>,
}

impl JoinedRecord {
    /// Render the record to the single textual field stored in the table
    pub fn render(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
