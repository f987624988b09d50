//! Windowed join stage
//!
//! Co-groups two prediction streams by key within fixed event-time windows.
//! The grouping is an outer join: a key seen on only one side by window close
//! still produces a joined record, with an empty list for the silent stream.
//! Predictions arriving for an already finalized window are dropped, not
//! retried.
//!
//! The state machine (`WindowedJoin`) is synchronous and clock-free; the
//! async driver (`JoinStage`) feeds it from the two input channels and
//! advances the watermark on an interval tick.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toxstream_core::{FixedWindows, JoinedRecord, Prediction};
use tracing::{debug, trace};

/// Which input stream a prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Per-key accumulation inside one window
#[derive(Debug, Default)]
struct KeyGroup {
    left: Vec<Prediction>,
    right: Vec<Prediction>,
}

/// Window/key grouping state for the two-stream join.
pub struct WindowedJoin {
    windows: FixedWindows,
    left_name: String,
    right_name: String,
    open: BTreeMap<i64, BTreeMap<String, KeyGroup>>,
    /// Highest window index that has been finalized
    closed_through: Option<i64>,
}

impl WindowedJoin {
    /// Create join state over the given windowing scheme. The stream names
    /// become the keys of the joined record's `streams` map.
    pub fn new(
        windows: FixedWindows,
        left_name: impl Into<String>,
        right_name: impl Into<String>,
    ) -> Self {
        Self {
            windows,
            left_name: left_name.into(),
            right_name: right_name.into(),
            open: BTreeMap::new(),
            closed_through: None,
        }
    }

    /// Number of windows currently open
    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    /// Insert a prediction from one side.
    ///
    /// Returns `false` if the prediction's window has already been finalized
    /// and the prediction was dropped.
    pub fn insert(&mut self, side: Side, prediction: Prediction) -> bool {
        let index = self.windows.index_of(prediction.event_time);

        if let Some(closed) = self.closed_through {
            if index <= closed {
                trace!(key = %prediction.key, window = index, "late prediction dropped");
                return false;
            }
        }

        let group = self
            .open
            .entry(index)
            .or_default()
            .entry(prediction.key.clone())
            .or_default();

        match side {
            Side::Left => group.left.push(prediction),
            Side::Right => group.right.push(prediction),
        }
        true
    }

    /// Finalize every window that has closed as of `now` and return the
    /// joined records, ordered by window then key.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Vec<JoinedRecord> {
        let cutoff = self.windows.index_of(now) - 1;
        if self
            .closed_through
            .is_some_and(|closed| cutoff <= closed)
        {
            return Vec::new();
        }

        let mut records = Vec::new();
        while let Some((&index, _)) = self.open.first_key_value() {
            if index > cutoff {
                break;
            }
            let (_, groups) = self.open.pop_first().expect("checked non-empty");
            self.emit_window(index, groups, &mut records);
        }

        self.closed_through = Some(match self.closed_through {
            Some(closed) => closed.max(cutoff),
            None => cutoff,
        });

        records
    }

    /// Finalize all remaining windows (end of stream).
    pub fn flush_all(&mut self) -> Vec<JoinedRecord> {
        let mut records = Vec::new();
        while let Some((index, groups)) = self.open.pop_first() {
            self.closed_through = Some(index);
            self.emit_window(index, groups, &mut records);
        }
        records
    }

    fn emit_window(
        &self,
        index: i64,
        groups: BTreeMap<String, KeyGroup>,
        out: &mut Vec<JoinedRecord>,
    ) {
        for (key, group) in groups {
            let mut streams = BTreeMap::new();
            streams.insert(self.left_name.clone(), group.left);
            streams.insert(self.right_name.clone(), group.right);

            out.push(JoinedRecord {
                key,
                window: index,
                streams,
            });
        }
    }
}

/// Async driver joining two prediction channels into a joined-record channel.
pub struct JoinStage {
    join: WindowedJoin,
    tick: std::time::Duration,
}

impl JoinStage {
    /// Create a stage; windows are finalized on a tick of the window size.
    pub fn new(windows: FixedWindows, left_name: &str, right_name: &str) -> Self {
        Self {
            tick: std::time::Duration::from_millis(windows.size_ms() as u64),
            join: WindowedJoin::new(windows, left_name, right_name),
        }
    }

    /// Spawn the join task.
    pub fn spawn(
        mut self,
        mut left: mpsc::Receiver<Prediction>,
        mut right: mpsc::Receiver<Prediction>,
        output: mpsc::Sender<JoinedRecord>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut left_open = true;
            let mut right_open = true;

            while left_open || right_open {
                tokio::select! {
                    prediction = left.recv(), if left_open => match prediction {
                        Some(p) => {
                            if !self.join.insert(Side::Left, p) {
                                counter!("toxstream_late_drops_total").increment(1);
                            }
                        }
                        None => left_open = false,
                    },
                    prediction = right.recv(), if right_open => match prediction {
                        Some(p) => {
                            if !self.join.insert(Side::Right, p) {
                                counter!("toxstream_late_drops_total").increment(1);
                            }
                        }
                        None => right_open = false,
                    },
                    _ = ticker.tick() => {
                        let records = self.join.advance_to(Utc::now());
                        if !Self::emit(&output, records).await {
                            return;
                        }
                    }
                }
            }

            // Both inputs ended; finalize whatever is still open.
            let records = self.join.flush_all();
            Self::emit(&output, records).await;
            debug!("join stage finished");
        })
    }

    async fn emit(output: &mpsc::Sender<JoinedRecord>, records: Vec<JoinedRecord>) -> bool {
        for record in records {
            counter!("toxstream_joins_total").increment(1);
            if output.send(record).await.is_err() {
                debug!("downstream closed, stopping join stage");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    fn prediction(key: &str, score: f32, model: &str, ms: i64) -> Prediction {
        Prediction {
            key: key.to_string(),
            score,
            model: model.to_string(),
            event_time: at_millis(ms),
        }
    }

    fn join() -> WindowedJoin {
        WindowedJoin::new(
            FixedWindows::new(Duration::from_millis(100)),
            "gaming",
            "movie",
        )
    }

    #[test]
    fn test_both_sides_join_within_window() {
        let mut join = join();

        assert!(join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10)));
        assert!(join.insert(Side::Right, prediction("u1", 0.3, "movie", 60)));

        let records = join.advance_to(at_millis(200));
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.key, "u1");
        assert_eq!(record.streams["gaming"].len(), 1);
        assert_eq!(record.streams["gaming"][0].score, -0.9);
        assert_eq!(record.streams["movie"].len(), 1);
        assert_eq!(record.streams["movie"][0].score, 0.3);
    }

    #[test]
    fn test_partial_join_emits_empty_side() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));

        let records = join.advance_to(at_millis(200));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].streams["gaming"].len(), 1);
        assert!(records[0].streams["movie"].is_empty());
    }

    #[test]
    fn test_keys_in_different_windows_do_not_join() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));
        join.insert(Side::Right, prediction("u1", 0.3, "movie", 150));

        let records = join.advance_to(at_millis(300));
        assert_eq!(records.len(), 2);
        assert!(records[0].streams["movie"].is_empty());
        assert!(records[1].streams["gaming"].is_empty());
    }

    #[test]
    fn test_window_not_finalized_early() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));

        // The window [0, 100) has not closed at t=99.
        assert!(join.advance_to(at_millis(99)).is_empty());
        assert_eq!(join.open_windows(), 1);

        assert_eq!(join.advance_to(at_millis(100)).len(), 1);
        assert_eq!(join.open_windows(), 0);
    }

    #[test]
    fn test_late_prediction_dropped() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));
        join.advance_to(at_millis(200));

        // Window 0 is finalized; a straggler for it is refused.
        assert!(!join.insert(Side::Right, prediction("u1", 0.3, "movie", 50)));
        assert_eq!(join.open_windows(), 0);
    }

    #[test]
    fn test_multiple_predictions_per_key_accumulate() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));
        join.insert(Side::Left, prediction("u1", -0.7, "gaming", 20));

        let records = join.advance_to(at_millis(200));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].streams["gaming"].len(), 2);
    }

    #[test]
    fn test_flush_all_finalizes_open_windows() {
        let mut join = join();
        join.insert(Side::Left, prediction("u1", -0.9, "gaming", 10));
        join.insert(Side::Right, prediction("u2", 0.5, "movie", 250));

        let records = join.flush_all();
        assert_eq!(records.len(), 2);
        assert_eq!(join.open_windows(), 0);

        // Flushed windows count as finalized for late-arrival purposes.
        assert!(!join.insert(Side::Left, prediction("u3", 0.1, "gaming", 20)));
    }

    #[tokio::test]
    async fn test_stage_flushes_on_stream_end() {
        let windows = FixedWindows::new(Duration::from_millis(50));
        let stage = JoinStage::new(windows, "gaming", "movie");

        let (left_tx, left_rx) = mpsc::channel(8);
        let (right_tx, right_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let handle = stage.spawn(left_rx, right_rx, out_tx);

        let now = Utc::now();
        left_tx
            .send(Prediction {
                key: "u1".to_string(),
                score: -0.9,
                model: "gaming".to_string(),
                event_time: now,
            })
            .await
            .unwrap();
        right_tx
            .send(Prediction {
                key: "u1".to_string(),
                score: 0.3,
                model: "movie".to_string(),
                event_time: now,
            })
            .await
            .unwrap();
        drop(left_tx);
        drop(right_tx);

        let record = out_rx.recv().await.unwrap();
        assert_eq!(record.key, "u1");
        assert_eq!(record.streams["gaming"].len(), 1);
        assert_eq!(record.streams["movie"].len(), 1);
        assert!(out_rx.recv().await.is_none());

        handle.await.unwrap();
    }
}
