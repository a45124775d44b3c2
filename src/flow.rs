//! Per-transfer flow window.
//!
//! Counts bytes handed to a job consumer but not yet taken out of its event
//! queue. When the count crosses the high mark the scheduler suspends the
//! slave; once the consumer drains below the low mark the [`JobHandle`]
//! reports it and the slave is resumed.
//!
//! [`JobHandle`]: crate::job::JobHandle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of buffered bytes before the slave is suspended.
pub const DEFAULT_HIGH_WATER: usize = 4 * 1024 * 1024;

/// Default number of buffered bytes below which a suspended slave resumes.
pub const DEFAULT_LOW_WATER: usize = 1024 * 1024;

/// Shared byte window between the scheduler and one job consumer.
#[derive(Debug, Clone)]
pub struct DataWindow {
    buffered: Arc<AtomicUsize>,
    throttled: Arc<AtomicBool>,
    high: usize,
    low: usize,
}

impl DataWindow {
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            buffered: Arc::new(AtomicUsize::new(0)),
            throttled: Arc::new(AtomicBool::new(false)),
            high,
            low: low.min(high),
        }
    }

    /// Record bytes delivered to the consumer.
    ///
    /// Returns `true` exactly once when the window fills up: the caller
    /// must suspend the producer.
    pub fn deliver(&self, bytes: usize) -> bool {
        let now = self.buffered.fetch_add(bytes, Ordering::AcqRel) + bytes;
        now >= self.high
            && self
                .throttled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Record bytes taken by the consumer.
    ///
    /// Returns `true` exactly once when a throttled window drains below the
    /// low mark: the producer may resume.
    pub fn consume(&self, bytes: usize) -> bool {
        let prev = self
            .buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(bytes))
            })
            .unwrap_or(0);
        let now = prev.saturating_sub(bytes);
        now < self.low
            && self
                .throttled
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Acquire)
    }
}

impl Default for DataWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_signals_once() {
        let window = DataWindow::new(100, 10);

        assert!(!window.deliver(60));
        assert!(window.deliver(60));
        assert!(!window.deliver(60));
        assert!(window.is_throttled());
        assert_eq!(window.buffered(), 180);
    }

    #[test]
    fn test_drain_below_low_mark_signals_once() {
        let window = DataWindow::new(100, 10);
        window.deliver(150);

        assert!(!window.consume(100));
        assert!(window.consume(45));
        assert!(!window.is_throttled());
        assert!(!window.consume(5));
    }

    #[test]
    fn test_consume_without_throttle_is_silent() {
        let window = DataWindow::new(100, 10);
        window.deliver(20);

        assert!(!window.consume(20));
        assert_eq!(window.buffered(), 0);
    }

    #[test]
    fn test_consume_saturates() {
        let window = DataWindow::new(100, 10);
        window.deliver(5);
        window.consume(50);
        assert_eq!(window.buffered(), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let a = DataWindow::new(10, 5);
        let b = a.clone();

        assert!(a.deliver(10));
        assert!(b.is_throttled());
        assert!(b.consume(10));
        assert!(!a.is_throttled());
    }
}
