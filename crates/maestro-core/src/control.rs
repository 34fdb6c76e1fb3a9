//! Base scalar controls and the surface the mastering machinery consumes.
//!
//! [`AutomationControl`] is the plain control: a clamped raw value in an
//! atomic cell, an automation [`Envelope`](crate::Envelope), and change +
//! destroy signals. It knows nothing about masters; that layer lives in
//! [`SlavableControl`](crate::SlavableControl), which embeds one of these.
//!
//! [`ControlSource`] is the trait both implement. Anything attached as a
//! master is consumed through it: identity, descriptor, composite value,
//! signal access, envelope access, and the optional sub-mastering capability.
//! Dispatch on that capability goes through [`ControlSource::as_slavable`]
//! (interface presence), never through downcasting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::atomic::AtomicF64;
use crate::envelope::Envelope;
use crate::event::Signal;
use crate::slave::SlavableControl;
use crate::transport::Transport;

/// Session-unique control identity, stable across save/load.
///
/// Assigned by the owning session; persistence matches master links on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(u64);

impl ControlId {
    /// Wrap a raw id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ControlId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ControlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of a parameter: bounds, default, and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// Smallest legal raw value.
    pub lower: f64,
    /// Largest legal raw value; doubles as the "on" sentinel for toggles.
    pub upper: f64,
    /// Default raw value.
    pub normal: f64,
    /// Two-state (on/off) parameter rather than a continuous scalar.
    pub toggled: bool,
}

impl ParameterDescriptor {
    /// A continuous scalar parameter.
    pub fn continuous(lower: f64, upper: f64, normal: f64) -> Self {
        Self {
            lower,
            upper,
            normal,
            toggled: false,
        }
    }

    /// A two-state on/off parameter (0/1, default off).
    pub fn toggle() -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
            normal: 0.0,
            toggled: true,
        }
    }

    /// Clamp `value` into `[lower, upper]`.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

/// Whether a value change should propagate to the control's group.
///
/// Group semantics live outside this crate; the disposition rides along in
/// the change payload so group-aware layers can honor it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Let the control's group follow the change.
    #[default]
    UseGroup,
    /// Change this control alone.
    NoGroup,
}

/// Payload of a control's change signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    /// True when the change originated on this control rather than a master.
    pub from_self: bool,
    /// Group propagation requested by the setter.
    pub disposition: Disposition,
}

/// Payload of a control's destroy signal.
///
/// Carries the control's final composite value so slaves can apply the
/// permanence rule without reaching back into the dying control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestroyEvent {
    /// Identity of the control being destroyed.
    pub id: ControlId,
    /// Composite value at the instant of destruction.
    pub last_value: f64,
}

/// The surface the mastering machinery consumes from any control.
pub trait ControlSource: Send + Sync {
    /// Session-unique identity.
    fn id(&self) -> ControlId;

    /// Human-readable name, for diagnostics.
    fn name(&self) -> &str;

    /// Parameter bounds and kind.
    fn descriptor(&self) -> &ParameterDescriptor;

    /// Current effective value. For slavable controls this is the composite
    /// value, which is what makes master chains compose transitively.
    fn value(&self) -> f64;

    /// Change signal: emitted on value changes, with origin information.
    fn changed(&self) -> &Signal<ChangeEvent>;

    /// Destroy signal: emitted exactly once, while the control's state is
    /// still readable.
    fn destroyed(&self) -> &Signal<DestroyEvent>;

    /// The control's automation envelope.
    fn envelope(&self) -> &Envelope;

    /// Whether envelope playback currently drives this control.
    fn automation_playback(&self) -> bool {
        self.envelope().playback()
    }

    /// Store a clamped value without emitting the change signal.
    ///
    /// The boolean aggregator uses this to push a master's externally visible
    /// value during an aggregation pass, emitting the master's signal itself
    /// so the pass stays in control of notification ordering.
    fn set_value_unchecked(&self, value: f64);

    /// Sub-mastering capability: `Some` when this control can itself be
    /// slaved, letting value, curve, and boolean composition recurse through
    /// it.
    fn as_slavable(&self) -> Option<&SlavableControl> {
        None
    }
}

/// A plain scalar automation control: raw value, envelope, signals.
#[derive(Debug)]
pub struct AutomationControl {
    id: ControlId,
    name: String,
    descriptor: ParameterDescriptor,
    value: AtomicF64,
    envelope: Envelope,
    transport: Arc<Transport>,
    changed: Signal<ChangeEvent>,
    destroyed: Signal<DestroyEvent>,
    destroy_emitted: AtomicBool,
}

impl AutomationControl {
    /// Create a control at the descriptor's default value.
    pub fn new(
        id: ControlId,
        name: impl Into<String>,
        descriptor: ParameterDescriptor,
        transport: Arc<Transport>,
    ) -> Self {
        let initial = descriptor.clamp(descriptor.normal);
        Self {
            id,
            name: name.into(),
            descriptor,
            value: AtomicF64::new(initial),
            envelope: Envelope::new(),
            transport,
            changed: Signal::new(),
            destroyed: Signal::new(),
            destroy_emitted: AtomicBool::new(false),
        }
    }

    /// The control's own value, excluding any master contribution.
    #[inline]
    pub fn raw_value(&self) -> f64 {
        self.value.load()
    }

    /// Set the raw value (clamped) and emit the change signal.
    pub fn set_value(&self, value: f64, disposition: Disposition) {
        self.value.store(self.descriptor.clamp(value));
        self.changed.emit(&ChangeEvent {
            from_self: true,
            disposition,
        });
    }

    /// The shared transport used for "now" lookups.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Emit the destroy signal once, with `last_value` as the final value.
    ///
    /// Idempotent so the slavable wrapper can emit the composite value
    /// before this control's own `Drop` would emit the raw one.
    pub(crate) fn emit_destroyed(&self, last_value: f64) {
        if !self.destroy_emitted.swap(true, Ordering::Relaxed) {
            self.destroyed.emit(&DestroyEvent {
                id: self.id,
                last_value,
            });
        }
    }
}

impl ControlSource for AutomationControl {
    fn id(&self) -> ControlId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &ParameterDescriptor {
        &self.descriptor
    }

    fn value(&self) -> f64 {
        if self.automation_playback()
            && let Some(v) = self.envelope.rt_safe_eval(self.transport.now() as f64)
        {
            return self.descriptor.clamp(v);
        }
        self.raw_value()
    }

    fn changed(&self) -> &Signal<ChangeEvent> {
        &self.changed
    }

    fn destroyed(&self) -> &Signal<DestroyEvent> {
        &self.destroyed
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn set_value_unchecked(&self, value: f64) {
        self.value.store(self.descriptor.clamp(value));
    }
}

impl Drop for AutomationControl {
    fn drop(&mut self) {
        self.emit_destroyed(self.raw_value());
    }
}
