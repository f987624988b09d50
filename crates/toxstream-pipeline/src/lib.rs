//! toxstream Pipeline
//!
//! Streaming stages and the wiring that turns them into the running job:
//!
//! ```text
//! source -> keying -> fan-out -> gaming inference -> flag/route -> alert topic
//!                            \                    \
//!                             -> movie inference ---> windowed join -> table sink
//! ```
//!
//! Stages are tokio tasks connected by bounded mpsc channels; back-pressure
//! from a slow sink propagates upstream through the channel capacities.
//! Per-element failures are logged, counted, and dropped so one bad record
//! never takes the job down; cancellation is pipeline-wide via a
//! `CancellationToken`.

pub mod inference;
pub mod join;
pub mod keying;
pub mod pipeline;
pub mod router;
pub mod sink;
pub mod source;

pub use inference::InferenceStage;
pub use join::{JoinStage, Side, WindowedJoin};
pub use keying::{key_message, DEFAULT_KEY_ATTRIBUTE};
pub use pipeline::{PipelineConfig, ToxicityPipeline};
pub use router::OutputRouter;
pub use sink::{JsonlTableWriter, MemoryTableWriter, SinkStage, TableRow, TableWriter};
pub use source::{
    InMemoryTopic, LoggingPublisher, MessageSource, StdinSource, TopicPublisher, TopicSubscription,
};

/// Stream name of the gaming-chat inference branch
pub const GAMING_STREAM: &str = "gaming";

/// Stream name of the movie-review inference branch
pub const MOVIE_STREAM: &str = "movie";
