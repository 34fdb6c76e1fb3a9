//! Shared transport position.
//!
//! Controls evaluate automation envelopes at "now", and "now" belongs to the
//! owning engine. [`Transport`] is the minimal shared handle: an atomic
//! sample counter the engine advances and every control reads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sample position on the session timeline.
pub type SamplePos = u64;

/// The engine's playhead, shared with every control via `Arc`.
#[derive(Debug, Default)]
pub struct Transport {
    position: AtomicU64,
}

impl Transport {
    /// Create a transport at position zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current playhead position in samples.
    #[inline]
    pub fn now(&self) -> SamplePos {
        self.position.load(Ordering::Relaxed)
    }

    /// Move the playhead. Called by the engine, never by controls.
    pub fn set_position(&self, pos: SamplePos) {
        self.position.store(pos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_updates_are_visible() {
        let t = Transport::new();
        assert_eq!(t.now(), 0);
        t.set_position(48_000);
        assert_eq!(t.now(), 48_000);
    }
}
