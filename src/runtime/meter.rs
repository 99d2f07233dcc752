//! Cycle meter
//!
//! One meter per [`Runtime`](super::Runtime). The engine's interrupt hook
//! holds an `Arc` to it and calls [`CycleMeter::tick`]; the runtime resets it
//! at the start of every top-level call. The meter lives on the host side and
//! is never part of a snapshot.

use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const UNBOUNDED: u64 = u64::MAX;

#[derive(Debug)]
pub struct CycleMeter {
    count: AtomicU64,
    limit: AtomicU64,
    tripped: AtomicBool,
}

impl CycleMeter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            limit: AtomicU64::new(UNBOUNDED),
            tripped: AtomicBool::new(false),
        }
    }

    /// Start a new call with `limit` cycles (`None` is unbounded).
    pub fn reset(&self, limit: Option<u64>) {
        self.count.store(0, Ordering::Relaxed);
        self.limit.store(limit.unwrap_or(UNBOUNDED), Ordering::Relaxed);
        self.tripped.store(false, Ordering::Relaxed);
        trace!("cycle meter reset: limit={:?}", limit);
    }

    /// Count one hook invocation. Returns `true` once the count exceeds the limit.
    pub fn tick(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.limit.load(Ordering::Relaxed) {
            self.tripped.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn cycles(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Option<u64> {
        Some(self.limit.load(Ordering::Relaxed)).filter(|&l| l != UNBOUNDED)
    }

    /// Whether the current call ran out of cycles
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// Interrupt handler closure that feeds this meter.
    pub fn hook(self: &Arc<Self>) -> crate::engine::InterruptHandler {
        let meter = Arc::clone(self);
        Box::new(move || meter.tick())
    }
}

impl Default for CycleMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_trips() {
        let meter = CycleMeter::new();
        meter.reset(None);
        for _ in 0..1000 {
            assert!(!meter.tick());
        }
        assert_eq!(meter.cycles(), 1000);
        assert_eq!(meter.limit(), None);
        assert!(!meter.tripped());
    }

    #[test]
    fn test_trips_after_limit() {
        let meter = CycleMeter::new();
        meter.reset(Some(2));
        assert!(!meter.tick());
        assert!(!meter.tick());
        assert!(meter.tick());
        assert!(meter.tripped());
        assert_eq!(meter.cycles(), 3);
    }

    #[test]
    fn test_zero_limit_trips_on_first_tick() {
        let meter = CycleMeter::new();
        meter.reset(Some(0));
        assert!(meter.tick());
    }

    #[test]
    fn test_reset_clears_state() {
        let meter = Arc::new(CycleMeter::new());
        meter.reset(Some(0));
        let mut hook = meter.hook();
        assert!(hook());
        meter.reset(Some(5));
        assert_eq!(meter.cycles(), 0);
        assert!(!meter.tripped());
        assert!(!hook());
        assert_eq!(meter.limit(), Some(5));
    }
}
