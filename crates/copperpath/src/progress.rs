//! Progress reporting and cooperative cancellation shared between a running
//! generator and whoever observes it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A fraction in `[0, 1]` that only ever grows, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    bits: Arc<AtomicU64>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Raise the stored fraction to `value`; lower values are ignored.
    pub fn advance(&self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        // Non-negative floats order the same way as their bit patterns.
        self.bits.fetch_max(value.to_bits(), Ordering::Relaxed);
    }

    /// Start over at zero, for a new stage.
    pub fn reset(&self) {
        self.bits.store(0.0_f64.to_bits(), Ordering::Relaxed);
    }
}

/// Cooperative stop flag; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let progress = Progress::new();
        progress.advance(0.5);
        progress.advance(0.25);
        assert_eq!(progress.get(), 0.5);
        progress.advance(2.0);
        assert_eq!(progress.get(), 1.0);
        progress.reset();
        assert_eq!(progress.get(), 0.0);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
