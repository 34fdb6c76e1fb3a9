//! Slavable controls: VCA-style master grouping over a base control.
//!
//! A [`SlavableControl`] embeds an [`AutomationControl`] and a registry of
//! master links. Its effective value combines the raw value with every
//! master's contribution: multiplicatively for continuous parameters, as a
//! boolean OR for toggled ones. Masters attach and detach at runtime from
//! the control/UI thread while the audio thread keeps reading composite
//! values and curves.
//!
//! Locking: one reader-writer lock per control guards the registry. Value
//! and membership queries, next-event lookup, and the outer boolean
//! aggregation take the shared side; attach, detach, and clear take the
//! exclusive side. The per-sample curve path and the master-change handler
//! use non-blocking acquisition and skip instead of waiting; the engine
//! guarantees topology stability for the duration of a render pass, so the
//! skip paths do not fire in practice.
//!
//! Ownership: slaves hold only weak handles to their masters. A master's
//! destroy signal severs every link synchronously, carrying the final value
//! so the detach-permanence rule applies even then.
//!
//! A master's contribution ratio is its current composite value relative to
//! the value snapshotted when it was attached. Attaching is therefore
//! value-neutral (the ratio starts at exactly 1), and moving the master
//! afterwards scales every slave. The snapshots are what persistence saves
//! and restores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::atomic::AtomicF64;
use crate::control::{
    AutomationControl, ChangeEvent, ControlId, ControlSource, DestroyEvent, Disposition,
    ParameterDescriptor,
};
use crate::envelope::ControlEvent;
use crate::event::{Signal, Subscription};
use crate::transport::{SamplePos, Transport};

/// Extension points for derived control kinds (grouped mute and friends).
///
/// All hooks are default-implemented; plain controls use [`NullHooks`].
pub trait MasterHooks: Send + Sync {
    /// Called after a master attach attempt, outside the registry lock.
    /// `loading` is true during deferred restore, so derived bookkeeping can
    /// skip value compensation.
    fn post_add_master(&self, _master: &dyn ControlSource, _loading: bool) {}

    /// Called before a master is detached (including destroy-driven detach).
    fn pre_remove_master(&self, _master: ControlId) {}

    /// Called before all masters are cleared at once.
    fn pre_clear_masters(&self) {}

    /// Decide whether a master-value change is meaningful for this control.
    /// Returning `false` suppresses the slave's own change notification.
    /// Called with the registry read lock held.
    fn handle_master_change(&self, _master: &dyn ControlSource) -> bool {
        true
    }
}

/// Hook set for controls with no derived bookkeeping.
#[derive(Debug, Default)]
pub struct NullHooks;

impl MasterHooks for NullHooks {}

/// Saved per-link state, as captured for and applied from persistence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterLinkState {
    /// Identity of the master this link points at.
    pub id: ControlId,
    /// Cached boolean (toggled controls).
    pub yn: bool,
    /// Slave composite value snapshotted at attach time.
    pub val_ctrl: f64,
    /// Master value snapshotted at attach time.
    pub val_master: f64,
}

/// Per-attached-master bookkeeping.
///
/// Snapshot ratios and the cached boolean are atomics because they are
/// refreshed while only the shared registry lock is held. The subscriptions
/// disconnect when the record drops, for any reason the record goes away.
struct MasterRecord {
    master: Weak<dyn ControlSource>,
    val_ctrl: AtomicF64,
    val_master: AtomicF64,
    yn: AtomicBool,
    _changed_sub: Subscription,
    _destroyed_sub: Subscription,
}

impl MasterRecord {
    fn master(&self) -> Option<Arc<dyn ControlSource>> {
        self.master.upgrade()
    }

    /// Current contribution factor relative to the attach-time snapshot.
    ///
    /// A gone master contributes 1.0; its destroy handler is the one that
    /// folds the final value into the raw value.
    fn ratio(&self) -> f64 {
        match self.master() {
            Some(master) => self.ratio_for(master.value()),
            None => 1.0,
        }
    }

    fn ratio_for(&self, master_value: f64) -> f64 {
        let snapshot = self.val_master.load();
        if snapshot == 0.0 {
            master_value
        } else {
            master_value / snapshot
        }
    }
}

type Registry = HashMap<ControlId, MasterRecord>;

/// A control whose effective value is scaled or overridden by masters.
pub struct SlavableControl {
    base: AutomationControl,
    masters: RwLock<Registry>,
    mastering_changed: Signal<()>,
    aggregation_active: AtomicBool,
    teardown: AtomicBool,
    hooks: Box<dyn MasterHooks>,
}

impl SlavableControl {
    /// Create a slavable control with no derived-kind hooks.
    pub fn new(
        id: ControlId,
        name: impl Into<String>,
        descriptor: ParameterDescriptor,
        transport: Arc<Transport>,
    ) -> Arc<Self> {
        Self::with_hooks(id, name, descriptor, transport, Box::new(NullHooks))
    }

    /// Create a slavable control with derived-kind hooks.
    pub fn with_hooks(
        id: ControlId,
        name: impl Into<String>,
        descriptor: ParameterDescriptor,
        transport: Arc<Transport>,
        hooks: Box<dyn MasterHooks>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: AutomationControl::new(id, name, descriptor, transport),
            masters: RwLock::new(HashMap::new()),
            mastering_changed: Signal::new(),
            aggregation_active: AtomicBool::new(false),
            teardown: AtomicBool::new(false),
            hooks,
        })
    }

    /// The control's own value, excluding master contributions.
    #[inline]
    pub fn raw_value(&self) -> f64 {
        self.base.raw_value()
    }

    /// Signal emitted once per attach/detach/clear.
    pub fn mastering_changed(&self) -> &Signal<()> {
        &self.mastering_changed
    }

    /// Suppress value adjustment and notification during teardown of the
    /// owning object graph.
    pub fn mark_for_teardown(&self) {
        self.teardown.store(true, Ordering::Relaxed);
    }

    // --- value engine -------------------------------------------------

    /// Current effective (composite) value.
    ///
    /// During envelope playback the envelope drives the result, scaled by
    /// the combined master contribution; otherwise the raw value does.
    pub fn value(&self) -> f64 {
        let masters = self.masters.read();
        if self.base.automation_playback()
            && let Some(v) = self
                .base
                .envelope()
                .rt_safe_eval(self.base.transport().now() as f64)
        {
            return self.base.descriptor().clamp(v) * self.masters_value(&masters);
        }
        self.value_with(&masters)
    }

    /// Composite value, registry access already granted.
    fn value_with(&self, masters: &Registry) -> f64 {
        let desc = self.base.descriptor();
        if masters.is_empty() {
            return self.base.raw_value();
        }
        if desc.toggled {
            // self-on wins outright; masters are not consulted
            if self.base.raw_value() != 0.0 {
                return desc.upper;
            }
            return self.masters_value(masters);
        }
        self.base.raw_value() * self.masters_value(masters)
    }

    /// Combined master contribution: OR sentinel for toggles, product of
    /// ratios for continuous parameters. Chains compose transitively because
    /// each master reports its own composite value.
    fn masters_value(&self, masters: &Registry) -> f64 {
        let desc = self.base.descriptor();
        if desc.toggled {
            for record in masters.values() {
                if record.master().is_some_and(|m| m.value() != 0.0) {
                    return desc.upper;
                }
            }
            desc.lower
        } else {
            masters.values().map(MasterRecord::ratio).product()
        }
    }

    /// Set the effective value.
    ///
    /// Continuous parameters with masters attached back-solve the raw value
    /// so that the composite lands on `requested`; a zero combined ratio
    /// forces raw to zero instead of scaling up without bound. Toggles store
    /// the request as-is.
    pub fn set_value(&self, requested: f64, disposition: Disposition) {
        let desc = self.base.descriptor();
        let mut value = requested;
        if !desc.toggled {
            let masters = self.masters.read();
            if !masters.is_empty() {
                let scale = self.masters_value(&masters);
                if scale == 0.0 {
                    value = 0.0;
                } else {
                    value = (requested / scale).clamp(desc.lower, desc.upper);
                }
            }
        }
        // base path clamps, stores, and emits the change signal
        self.base.set_value(value, disposition);
    }

    // --- registry & lifecycle -----------------------------------------

    /// Attach `master` as a scaling source. Idempotent per master identity:
    /// a second attach changes nothing and notifies nobody.
    ///
    /// `loading` marks deferred restore; it reaches the post-add hook so
    /// derived bookkeeping can tell restore from user assignment.
    pub fn add_master(self: &Arc<Self>, master: Arc<dyn ControlSource>, loading: bool) {
        let master_value = master.value();
        let added = {
            let mut masters = self.masters.write();
            if masters.contains_key(&master.id()) {
                false
            } else {
                let this = Arc::downgrade(self);
                let weak_master = Arc::downgrade(&master);
                let changed_sub = master.changed().connect(move |_| {
                    if let (Some(slave), Some(m)) = (this.upgrade(), weak_master.upgrade()) {
                        slave.master_changed(m.as_ref());
                    }
                });
                let this = Arc::downgrade(self);
                let destroyed_sub = master.destroyed().connect(move |ev| {
                    if let Some(slave) = this.upgrade() {
                        slave.master_destroyed(ev);
                    }
                });
                // snapshot both sides before the new record becomes visible
                let record = MasterRecord {
                    master: Arc::downgrade(&master),
                    val_ctrl: AtomicF64::new(self.value_with(&masters)),
                    val_master: AtomicF64::new(master_value),
                    yn: AtomicBool::new(false),
                    _changed_sub: changed_sub,
                    _destroyed_sub: destroyed_sub,
                };
                masters.insert(master.id(), record);
                true
            }
        };

        if added {
            tracing::debug!(slave = %self.id(), master = %master.id(), loading, "master attached");
            self.mastering_changed.emit(&());
        }
        self.hooks.post_add_master(master.as_ref(), loading);
        self.refresh_boolean_master(master.as_ref());
    }

    /// Detach `master`, folding its last contribution into the raw value so
    /// the composite is unchanged across the boundary. Unknown masters are a
    /// silent no-op.
    pub fn remove_master(&self, master: &dyn ControlSource) {
        if self.teardown.load(Ordering::Relaxed) {
            return;
        }
        self.hooks.pre_remove_master(master.id());

        let old_val = self.base.raw_value();
        let mut new_val = old_val;
        let removed = {
            let mut masters = self.masters.write();
            if let Some(record) = masters.get(&master.id()) {
                // un-assigning applies the master's contribution permanently
                new_val *= record.ratio();
                masters.remove(&master.id());
                true
            } else {
                false
            }
        };
        if !removed {
            return;
        }

        if old_val != new_val {
            self.base.set_value_unchecked(new_val);
        }
        tracing::debug!(slave = %self.id(), master = %master.id(), "master detached");
        self.mastering_changed.emit(&());
    }

    /// Detach every master at once, folding the product of their
    /// contributions into the raw value. No-op when none are attached.
    pub fn clear_masters(&self) {
        if self.teardown.load(Ordering::Relaxed) {
            return;
        }
        self.hooks.pre_clear_masters();

        let old_val = self.base.raw_value();
        let mut new_val = old_val;
        {
            let mut masters = self.masters.write();
            if masters.is_empty() {
                return;
            }
            new_val *= self.masters_value(&masters);
            masters.clear();
        }

        if old_val != new_val {
            self.base.set_value_unchecked(new_val);
        }
        tracing::debug!(slave = %self.id(), "masters cleared");
        self.mastering_changed.emit(&());
    }

    /// True when at least one master is attached.
    pub fn slaved(&self) -> bool {
        !self.masters.read().is_empty()
    }

    /// True when the control with `id` is attached as a master.
    pub fn slaved_to(&self, id: ControlId) -> bool {
        self.masters.read().contains_key(&id)
    }

    /// Number of attached masters.
    pub fn master_count(&self) -> usize {
        self.masters.read().len()
    }

    /// Count of masters whose cached boolean is on. Zero for continuous
    /// controls.
    pub fn get_boolean_masters(&self) -> u32 {
        if !self.base.descriptor().toggled {
            return 0;
        }
        let masters = self.masters.read();
        masters
            .values()
            .filter(|record| record.yn.load(Ordering::Relaxed))
            .count() as u32
    }

    // --- change propagation -------------------------------------------

    /// A master's change signal fired. Non-blocking: bail out when an
    /// aggregation pass on this control is mid-flight (the pass already
    /// accounts for the change) or the registry is exclusively held.
    fn master_changed(&self, master: &dyn ControlSource) {
        if self.aggregation_active.load(Ordering::Relaxed) {
            return;
        }
        let send = {
            let Some(_masters) = self.masters.try_read() else {
                return;
            };
            self.hooks.handle_master_change(master)
        };
        self.refresh_boolean_master(master);
        if send {
            self.base.changed().emit(&ChangeEvent {
                from_self: false,
                disposition: Disposition::NoGroup,
            });
        }
    }

    /// Refresh the cached boolean for `master`, if this control is toggled
    /// and the master is still attached.
    ///
    /// The cache exists because a master may emit change signals without its
    /// value actually flipping (composite controls report "changed" for
    /// several underlying reasons); derived kinds compare against the last
    /// known state.
    fn refresh_boolean_master(&self, master: &dyn ControlSource) {
        if !self.base.descriptor().toggled {
            return;
        }
        let masters = self.masters.read();
        if let Some(record) = masters.get(&master.id()) {
            record.yn.store(master.value() != 0.0, Ordering::Relaxed);
        }
    }

    /// A master is being destroyed: sever the link, applying its final value
    /// through the permanence rule. Suppressed during teardown.
    fn master_destroyed(&self, ev: &DestroyEvent) {
        if self.teardown.load(Ordering::Relaxed) {
            return;
        }
        self.hooks.pre_remove_master(ev.id);

        let old_val = self.base.raw_value();
        let mut new_val = old_val;
        let removed = {
            let mut masters = self.masters.write();
            if let Some(record) = masters.get(&ev.id) {
                new_val *= record.ratio_for(ev.last_value);
                masters.remove(&ev.id);
                true
            } else {
                false
            }
        };
        if !removed {
            return;
        }

        if old_val != new_val {
            self.base.set_value_unchecked(new_val);
        }
        tracing::debug!(slave = %self.id(), master = %ev.id, "master destroyed, link severed");
        self.mastering_changed.emit(&());
    }

    // --- realtime paths -----------------------------------------------

    /// Multiply `buf` by this control's contribution over `[start, end)`.
    ///
    /// The render-path compositor: never blocks or allocates. The control's
    /// own curve (evaluated into `scratch`, supplied by the engine) or flat
    /// raw value applies first; then each sub-mastering-capable master
    /// recurses depth-first, followed by that master's own scalar ratio.
    ///
    /// Returns whether any curve, own or nested, was active, so callers can
    /// choose curve-based over flat-value rendering upstream. Topology must
    /// be stable for the duration of a render pass (the engine's pass
    /// barrier); if the registry is exclusively held anyway, master
    /// contributions are skipped for this block rather than waiting.
    pub fn masters_curve_multiply(
        &self,
        start: SamplePos,
        end: SamplePos,
        buf: &mut [f32],
        scratch: &mut [f32],
    ) -> bool {
        let len = buf.len();
        debug_assert!(scratch.len() >= len);

        let mut active = self
            .base
            .envelope()
            .curve_vector(start, end, &mut scratch[..len]);
        if active {
            for (out, curve) in buf.iter_mut().zip(&scratch[..len]) {
                *out *= *curve;
            }
        } else {
            apply_gain(buf, self.base.raw_value() as f32);
        }

        let Some(masters) = self.masters.try_read() else {
            return active;
        };
        for record in masters.values() {
            let Some(master) = record.master() else {
                continue;
            };
            if let Some(sub) = master.as_slavable() {
                active |= sub.masters_curve_multiply(start, end, buf, scratch);
            }
            // the master's own sub-curve and its scalar ratio both apply
            apply_gain(buf, record.ratio() as f32);
        }
        active
    }

    /// Per-block boolean aggregation with a single coalesced notification.
    ///
    /// Detects edges in toggled masters' envelopes at `start` and emits this
    /// control's change signal at most once per pass, however many masters
    /// flipped.
    pub fn boolean_automation_run(&self, start: SamplePos, len: usize) -> bool {
        let changed = {
            let masters = self.masters.read();
            // the flag keeps master_changed() from re-entering while this
            // pass emits master signals below
            self.aggregation_active.store(true, Ordering::Relaxed);
            let changed = self.boolean_automation_run_with(&masters, start, len);
            self.aggregation_active.store(false, Ordering::Relaxed);
            changed
        };
        if changed {
            self.base.changed().emit(&ChangeEvent {
                from_self: false,
                disposition: Disposition::NoGroup,
            });
        }
        changed
    }

    fn boolean_automation_run_with(
        &self,
        masters: &Registry,
        start: SamplePos,
        len: usize,
    ) -> bool {
        if !self.base.descriptor().toggled {
            return false;
        }
        let mut changed = false;
        for record in masters.values() {
            let Some(master) = record.master() else {
                continue;
            };
            if !master.automation_playback() {
                continue;
            }
            if !master.descriptor().toggled {
                continue;
            }
            if let Some(sub) = master.as_slavable() {
                changed |= sub.boolean_automation_run(start, len);
            }
            let Some(v) = master.envelope().rt_safe_eval(start as f64) else {
                continue;
            };
            let yn = v >= 0.5;
            if record.yn.load(Ordering::Relaxed) != yn {
                changed |= self.hooks.handle_master_change(master.as_ref());
                record.yn.store(yn, Ordering::Relaxed);
                // push the master's visible state and announce it ourselves;
                // our own handler skips via the aggregation flag, other
                // slaves of this master hear the edge normally
                master.set_value_unchecked(if yn { 1.0 } else { 0.0 });
                master.changed().emit(&ChangeEvent {
                    from_self: false,
                    disposition: Disposition::NoGroup,
                });
            }
        }
        changed
    }

    /// Earliest master automation event strictly inside `(now, end)`,
    /// searching recursively through master chains.
    ///
    /// `next_event.when` must be primed (conventionally to `end`) before the
    /// call; it is tightened in place. Returns whether anything tightened it.
    pub fn find_next_event(&self, now: f64, end: f64, next_event: &mut ControlEvent) -> bool {
        let masters = self.masters.read();
        if masters.is_empty() {
            return false;
        }
        let mut found = false;
        for record in masters.values() {
            let Some(master) = record.master() else {
                continue;
            };
            if let Some(sub) = master.as_slavable()
                && sub.find_next_event(now, end, next_event)
            {
                found = true;
            }
            if let Some(ev) = master.envelope().next_event_after(now, end)
                && ev.when < next_event.when
            {
                next_event.when = ev.when;
                next_event.value = ev.value;
                found = true;
            }
        }
        found
    }

    // --- persistence support ------------------------------------------

    /// Snapshot every link's saved state, for persistence capture.
    pub fn master_link_states(&self) -> Vec<MasterLinkState> {
        let masters = self.masters.read();
        masters
            .iter()
            .map(|(id, record)| MasterLinkState {
                id: *id,
                yn: record.yn.load(Ordering::Relaxed),
                val_ctrl: record.val_ctrl.load(),
                val_master: record.val_master.load(),
            })
            .collect()
    }

    /// Apply a saved cached boolean onto the link for `id`.
    /// Returns false (and does nothing) when no such master is attached.
    pub fn apply_saved_boolean(&self, id: ControlId, yn: bool) -> bool {
        let masters = self.masters.read();
        let Some(record) = masters.get(&id) else {
            return false;
        };
        record.yn.store(yn, Ordering::Relaxed);
        true
    }

    /// Apply saved snapshot ratios onto the link for `id`.
    /// Returns false (and does nothing) when no such master is attached.
    pub fn apply_saved_ratios(&self, id: ControlId, val_ctrl: f64, val_master: f64) -> bool {
        let masters = self.masters.read();
        let Some(record) = masters.get(&id) else {
            return false;
        };
        record.val_ctrl.store(val_ctrl);
        record.val_master.store(val_master);
        true
    }
}

impl ControlSource for SlavableControl {
    fn id(&self) -> ControlId {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn descriptor(&self) -> &ParameterDescriptor {
        self.base.descriptor()
    }

    fn value(&self) -> f64 {
        SlavableControl::value(self)
    }

    fn changed(&self) -> &Signal<ChangeEvent> {
        self.base.changed()
    }

    fn destroyed(&self) -> &Signal<DestroyEvent> {
        self.base.destroyed()
    }

    fn envelope(&self) -> &crate::envelope::Envelope {
        self.base.envelope()
    }

    fn set_value_unchecked(&self, value: f64) {
        self.base.set_value_unchecked(value);
    }

    fn as_slavable(&self) -> Option<&SlavableControl> {
        Some(self)
    }
}

impl Drop for SlavableControl {
    fn drop(&mut self) {
        // Our own detach machinery must not fire while the registry drops.
        self.teardown.store(true, Ordering::Relaxed);
        let last_value = self.value();
        self.base.emit_destroyed(last_value);
    }
}

impl std::fmt::Debug for SlavableControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlavableControl")
            .field("base", &self.base)
            .field("masters", &self.master_count())
            .finish()
    }
}

/// Multiply every sample in `buf` by `gain`.
#[inline]
fn apply_gain(buf: &mut [f32], gain: f32) {
    for sample in buf {
        *sample *= gain;
    }
}
