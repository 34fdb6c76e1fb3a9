//! Automation envelopes: time/value point lists with a realtime-safe read
//! path.
//!
//! The envelope is the storage side of automation playback. The control/UI
//! thread edits points under a mutex; the audio thread reads through
//! [`Envelope::rt_safe_eval`] and [`Envelope::curve_vector`], which use a
//! non-blocking try-lock and report "not valid" instead of waiting. Callers
//! on the render path treat an invalid read as "no active curve" and fall
//! back to the control's flat value.
//!
//! Interpolation is linear between points, clamped to the first and last
//! values outside the point range. Curve shapes beyond linear are the
//! business of the envelope editor, not this crate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transport::SamplePos;

/// One automation point: a value anchored at a timeline position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Timeline position in samples.
    pub when: f64,
    /// Control value at `when`.
    pub value: f64,
}

/// An earliest-event query result, used for split-block rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    /// Timeline position of the event in samples.
    pub when: f64,
    /// Control value at the event.
    pub value: f64,
}

/// A sorted list of automation points with a playback flag.
#[derive(Debug, Default)]
pub struct Envelope {
    points: Mutex<Vec<Point>>,
    playback: AtomicBool,
}

impl Envelope {
    /// Create an empty envelope with playback disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a point, keeping the list sorted by time.
    pub fn add_point(&self, when: f64, value: f64) {
        let mut points = self.points.lock();
        let idx = points.partition_point(|p| p.when <= when);
        points.insert(idx, Point { when, value });
    }

    /// Remove every point.
    pub fn clear(&self) {
        self.points.lock().clear();
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    /// True when the envelope has no points.
    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    /// Whether automation playback currently drives the owning control.
    #[inline]
    pub fn playback(&self) -> bool {
        self.playback.load(Ordering::Relaxed)
    }

    /// Enable or disable automation playback.
    pub fn set_playback(&self, on: bool) {
        self.playback.store(on, Ordering::Relaxed);
    }

    /// Interpolated value at `when`, or `None` for an empty envelope.
    ///
    /// Blocking variant for control-thread callers.
    pub fn eval(&self, when: f64) -> Option<f64> {
        let points = self.points.lock();
        Self::interpolate(&points, when)
    }

    /// Non-blocking variant of [`eval`](Self::eval) for the audio thread.
    ///
    /// Returns `None` when the point list is momentarily locked by an editor
    /// as well as when the envelope is empty; render-path callers treat both
    /// as "not valid right now" and fall back to the flat value.
    pub fn rt_safe_eval(&self, when: f64) -> Option<f64> {
        let points = self.points.try_lock()?;
        Self::interpolate(&points, when)
    }

    /// Fill `out` with interpolated values across `[start, end)`.
    ///
    /// Non-blocking. Returns `false` (leaving `out` untouched) when playback
    /// is off, the envelope is empty, or the point list is locked; `true`
    /// means `out` holds an active curve for the block.
    pub fn curve_vector(&self, start: SamplePos, end: SamplePos, out: &mut [f32]) -> bool {
        if !self.playback() || out.is_empty() {
            return false;
        }
        let Some(points) = self.points.try_lock() else {
            return false;
        };
        if points.is_empty() {
            return false;
        }
        let step = (end.saturating_sub(start)) as f64 / out.len() as f64;
        let start = start as f64;
        for (i, slot) in out.iter_mut().enumerate() {
            // interpolate() only returns None for an empty list, checked above
            let v = Self::interpolate(&points, start + i as f64 * step).unwrap_or(0.0);
            *slot = v as f32;
        }
        true
    }

    /// Earliest point strictly inside `(now, end)`, if any.
    pub fn next_event_after(&self, now: f64, end: f64) -> Option<ControlEvent> {
        let points = self.points.lock();
        points
            .iter()
            .find(|p| p.when > now && p.when < end)
            .map(|p| ControlEvent {
                when: p.when,
                value: p.value,
            })
    }

    fn interpolate(points: &[Point], when: f64) -> Option<f64> {
        let (first, last) = (points.first()?, points.last()?);
        if when <= first.when {
            return Some(first.value);
        }
        if when >= last.when {
            return Some(last.value);
        }
        // idx is the first point past `when`; idx >= 1 because when > first.when
        let idx = points.partition_point(|p| p.when <= when);
        let (a, b) = (&points[idx - 1], &points[idx]);
        let span = b.when - a.when;
        if span <= 0.0 {
            return Some(b.value);
        }
        let t = (when - a.when) / span;
        Some(a.value + (b.value - a.value) * t)
    }
}
