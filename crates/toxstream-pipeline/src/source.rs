//! Source and publisher adapters
//!
//! The managed queue itself is an external collaborator; the pipeline only
//! sees the `MessageSource` and `TopicPublisher` seams. `InMemoryTopic`
//! provides both for tests and single-process runs, and `StdinSource` feeds
//! the job from line-delimited JSON.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;
use toxstream_core::{Error, Message, Result};
use tracing::{debug, warn};

/// An unbounded, ordered-within-partition sequence of messages.
///
/// Transient transport errors are the adapter's problem; `next` either
/// yields the next message, `None` at end of stream, or a fatal error.
#[async_trait]
pub trait MessageSource: Send {
    /// Pull the next message, or `None` when the stream has ended
    async fn next(&mut self) -> Result<Option<Message>>;

    /// Topic this source is subscribed to
    fn topic(&self) -> &str;
}

/// Publishes serialized payloads to an output topic.
///
/// At-least-once: duplicate publishes under retry are possible and expected
/// to be handled by idempotent consumers downstream.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publish one payload
    async fn publish(&self, payload: Bytes) -> Result<()>;

    /// Topic this publisher writes to
    fn topic(&self) -> &str;
}

/// A single-process topic with fan-out to its subscriptions.
pub struct InMemoryTopic {
    name: String,
    subscriptions: Mutex<Vec<mpsc::Sender<Message>>>,
    capacity: usize,
}

impl InMemoryTopic {
    /// Create a topic with the given per-subscription buffer capacity
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            subscriptions: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a subscription on this topic.
    ///
    /// Mirrors the managed-queue behavior of creating the subscription on
    /// first use: messages published before any subscription exists are not
    /// replayed.
    pub fn subscribe(&self) -> TopicSubscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscriptions.lock().push(tx);
        debug!(topic = %self.name, "subscription created");

        TopicSubscription {
            topic: self.name.clone(),
            rx,
        }
    }

    /// Publish a message to every live subscription
    pub async fn publish_message(&self, message: Message) -> Result<()> {
        let senders: Vec<_> = self.subscriptions.lock().iter().cloned().collect();
        let mut any_closed = false;
        for sender in senders {
            if sender.send(message.clone()).await.is_err() {
                any_closed = true;
                warn!(topic = %self.name, "dropping message for closed subscription");
            }
        }
        if any_closed {
            self.subscriptions.lock().retain(|sender| !sender.is_closed());
        }
        Ok(())
    }

    /// Number of live subscriptions on this topic
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

#[async_trait]
impl TopicPublisher for InMemoryTopic {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        self.publish_message(Message::new(payload)).await
    }

    fn topic(&self) -> &str {
        &self.name
    }
}

/// A subscription handle pulling messages from an `InMemoryTopic`.
pub struct TopicSubscription {
    topic: String,
    rx: mpsc::Receiver<Message>,
}

#[async_trait]
impl MessageSource for TopicSubscription {
    async fn next(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Publisher that prints payloads to stdout, standing in for the managed
/// output topic in single-process runs.
pub struct LoggingPublisher {
    topic: String,
}

impl LoggingPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

#[async_trait]
impl TopicPublisher for LoggingPublisher {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        let text = String::from_utf8_lossy(&payload);
        debug!(topic = %self.topic, "publishing alert");
        println!("{text}");
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Wire form of a message on the stdin feed
#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    attributes: HashMap<String, String>,
    data: String,
}

/// Reads messages as line-delimited JSON envelopes from stdin.
///
/// Malformed lines are skipped with a warning rather than ending the stream.
pub struct StdinSource {
    topic: String,
    lines: tokio::io::Lines<BufReader<Stdin>>,
}

impl StdinSource {
    /// Create a stdin source labeled with the logical input topic name
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    async fn next(&mut self) -> Result<Option<Message>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => return Err(Error::from(e)),
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<MessageEnvelope>(&line) {
                Ok(envelope) => {
                    let mut message = Message::new(envelope.data.into_bytes());
                    message.attributes = envelope.attributes;
                    return Ok(Some(message));
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "skipping malformed input line");
                }
            }
        }
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
