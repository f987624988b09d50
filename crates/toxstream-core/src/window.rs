//! Fixed event-time windowing
//!
//! Windows are half-open time buckets `[index * size, (index + 1) * size)`.
//! The window index is the single ordering device in the pipeline: it bounds
//! how long the join stage waits for co-occurring predictions before a group
//! is finalized.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Assigns timestamps to fixed-size windows.
#[derive(Debug, Clone, Copy)]
pub struct FixedWindows {
    size_ms: i64,
}

impl FixedWindows {
    /// Create a windowing scheme with the given bucket size.
    ///
    /// Sub-millisecond sizes are clamped up to one millisecond.
    pub fn new(size: Duration) -> Self {
        Self {
            size_ms: (size.as_millis() as i64).max(1),
        }
    }

    /// Window size in milliseconds
    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Index of the window containing `timestamp`
    pub fn index_of(&self, timestamp: DateTime<Utc>) -> i64 {
        timestamp.timestamp_millis().div_euclid(self.size_ms)
    }

    /// Exclusive end of the window with the given index
    pub fn end_of(&self, index: i64) -> DateTime<Utc> {
        let end_ms = (index + 1) * self.size_ms;
        Utc.timestamp_millis_opt(end_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Whether the window with the given index has closed as of `now`
    pub fn is_closed(&self, index: i64, now: DateTime<Utc>) -> bool {
        self.end_of(index) <= now
    }
}

impl Default for FixedWindows {
    /// The demo window size: 100ms buckets
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn test_same_window_within_bucket() {
        let windows = FixedWindows::new(Duration::from_millis(100));

        assert_eq!(windows.index_of(at_millis(0)), windows.index_of(at_millis(99)));
        assert_ne!(windows.index_of(at_millis(99)), windows.index_of(at_millis(100)));
    }

    #[test]
    fn test_window_boundaries() {
        let windows = FixedWindows::new(Duration::from_millis(100));

        let idx = windows.index_of(at_millis(250));
        assert_eq!(idx, 2);
        assert_eq!(windows.end_of(idx), at_millis(300));
    }

    #[test]
    fn test_window_close() {
        let windows = FixedWindows::new(Duration::from_millis(100));
        let idx = windows.index_of(at_millis(250));

        assert!(!windows.is_closed(idx, at_millis(299)));
        assert!(windows.is_closed(idx, at_millis(300)));
    }

    #[test]
    fn test_negative_timestamps_bucket_consistently() {
        let windows = FixedWindows::new(Duration::from_millis(100));

        assert_eq!(windows.index_of(at_millis(-1)), -1);
        assert_eq!(windows.index_of(at_millis(-100)), -1);
        assert_eq!(windows.index_of(at_millis(-101)), -2);
    }
}
