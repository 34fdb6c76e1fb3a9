//! Lock-free scalar cells for values shared between the control and render
//! threads.
//!
//! Control values are `f64`, but there is no `AtomicF64` in the standard
//! library. [`AtomicF64`] stores the bit pattern in an `AtomicU64`, which is
//! enough for the plain load/store traffic these cells see: the UI thread
//! stores, the audio thread loads, and torn reads are impossible because the
//! whole word moves atomically.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell readable and writable from any thread without locking.
///
/// Used for a control's raw value and for the snapshot ratios inside a
/// master record, both of which are refreshed while only a shared (read)
/// lock on the registry is held.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Create a cell holding `value`.
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Read the current value.
    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Replace the current value.
    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Replace the current value, returning the previous one.
    #[inline]
    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_exact_bit_patterns() {
        let cell = AtomicF64::new(0.1 + 0.2);
        assert_eq!(cell.load(), 0.1 + 0.2);
        cell.store(-0.0);
        assert_eq!(cell.load().to_bits(), (-0.0_f64).to_bits());
    }

    #[test]
    fn swap_returns_previous() {
        let cell = AtomicF64::new(1.5);
        assert_eq!(cell.swap(2.5), 1.5);
        assert_eq!(cell.load(), 2.5);
    }

    #[test]
    fn clone_copies_value_not_storage() {
        let a = AtomicF64::new(3.0);
        let b = a.clone();
        a.store(4.0);
        assert_eq!(b.load(), 3.0);
    }
}
