//! Integration tests for master/slave composition.
//!
//! Exercises the composite value engine, attach/detach continuity, the
//! boolean aggregator's notification coalescing, the realtime curve
//! compositor, and destroy-driven detach, across control kinds and chained
//! master topologies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use maestro_core::{
    ControlEvent, ControlId, ControlSource, Disposition, ParameterDescriptor, SlavableControl,
    Subscription, Transport,
};

const EPS: f64 = 1e-12;

fn transport() -> Arc<Transport> {
    Arc::new(Transport::new())
}

fn gain(id: u64, transport: &Arc<Transport>) -> Arc<SlavableControl> {
    SlavableControl::new(
        ControlId::new(id),
        format!("gain-{id}"),
        ParameterDescriptor::continuous(0.0, 2.0, 1.0),
        transport.clone(),
    )
}

fn mute(id: u64, transport: &Arc<Transport>) -> Arc<SlavableControl> {
    SlavableControl::new(
        ControlId::new(id),
        format!("mute-{id}"),
        ParameterDescriptor::toggle(),
        transport.clone(),
    )
}

/// Count emissions of a control's change signal.
fn count_changes(control: &SlavableControl) -> (Arc<AtomicUsize>, Subscription) {
    let count = Arc::new(AtomicUsize::new(0));
    let n = count.clone();
    let sub = control.changed().connect(move |_| {
        n.fetch_add(1, Ordering::Relaxed);
    });
    (count, sub)
}

// ============================================================================
// Continuous composition
// ============================================================================

#[test]
fn composite_is_raw_times_ratio_product() {
    let t = transport();
    let slave = gain(1, &t);
    let m1 = gain(2, &t);
    let m2 = gain(3, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    slave.add_master(m1.clone(), false);
    slave.add_master(m2.clone(), false);

    m1.set_value(0.5, Disposition::NoGroup);
    m2.set_value(0.25, Disposition::NoGroup);

    assert!((slave.value() - 0.8 * 0.5 * 0.25).abs() < EPS);
}

#[test]
fn attach_is_value_neutral() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    master.set_value(0.5, Disposition::NoGroup);

    let before = slave.value();
    slave.add_master(master.clone(), false);
    assert!((slave.value() - before).abs() < EPS);
}

#[test]
fn detach_preserves_composite_and_rescales_raw() {
    // raw=0.8, master moved to ratio 0.5 -> composite 0.4;
    // after removal raw becomes 0.4 and the composite does not move.
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);
    assert!((slave.value() - 0.4).abs() < EPS);

    slave.remove_master(master.as_ref());
    assert!((slave.raw_value() - 0.4).abs() < EPS);
    assert!((slave.value() - 0.4).abs() < EPS);
    assert!(!slave.slaved());
}

#[test]
fn clear_masters_preserves_composite() {
    let t = transport();
    let slave = gain(1, &t);
    let m1 = gain(2, &t);
    let m2 = gain(3, &t);

    slave.set_value(1.6, Disposition::NoGroup);
    slave.add_master(m1.clone(), false);
    slave.add_master(m2.clone(), false);
    m1.set_value(0.5, Disposition::NoGroup);
    m2.set_value(0.5, Disposition::NoGroup);

    let before = slave.value();
    slave.clear_masters();
    assert!((slave.value() - before).abs() < EPS);
    assert_eq!(slave.master_count(), 0);
}

#[test]
fn clear_with_no_masters_is_silent() {
    let t = transport();
    let slave = gain(1, &t);
    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    let _sub = slave.mastering_changed().connect(move |()| {
        n.fetch_add(1, Ordering::Relaxed);
    });

    slave.clear_masters();
    assert_eq!(notified.load(Ordering::Relaxed), 0);
}

#[test]
fn attach_is_idempotent() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    let _sub = slave.mastering_changed().connect(move |()| {
        n.fetch_add(1, Ordering::Relaxed);
    });

    slave.add_master(master.clone(), false);
    slave.add_master(master.clone(), false);

    assert_eq!(slave.master_count(), 1);
    assert_eq!(notified.load(Ordering::Relaxed), 1);
}

#[test]
fn remove_of_unknown_master_is_silent() {
    let t = transport();
    let slave = gain(1, &t);
    let stranger = gain(9, &t);

    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    let _sub = slave.mastering_changed().connect(move |()| {
        n.fetch_add(1, Ordering::Relaxed);
    });

    slave.set_value(0.8, Disposition::NoGroup);
    slave.remove_master(stranger.as_ref());

    assert_eq!(notified.load(Ordering::Relaxed), 0);
    assert!((slave.raw_value() - 0.8).abs() < EPS);
}

#[test]
fn chained_masters_compose_transitively() {
    // grandmaster -> master -> slave: the master contributes its own
    // composite ratio, not merely its raw value.
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    let grandmaster = gain(3, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    slave.add_master(master.clone(), false);
    master.add_master(grandmaster.clone(), false);

    grandmaster.set_value(0.5, Disposition::NoGroup);
    assert!((master.value() - 0.5).abs() < EPS);
    assert!((slave.value() - 0.4).abs() < EPS);

    master.set_value(1.0, Disposition::NoGroup); // back-solves raw to 2.0, clamped
    grandmaster.set_value(0.25, Disposition::NoGroup);
    assert!((slave.value() - 0.8 * master.value()).abs() < EPS);
}

#[test]
fn set_value_back_solves_through_masters() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);

    slave.set_value(0.6, Disposition::NoGroup);
    assert!((slave.value() - 0.6).abs() < EPS);
    assert!((slave.raw_value() - 1.2).abs() < EPS);
}

#[test]
fn set_value_with_zero_ratio_forces_raw_to_zero() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.add_master(master.clone(), false);
    master.set_value(0.0, Disposition::NoGroup);

    slave.set_value(0.6, Disposition::NoGroup);
    assert_eq!(slave.raw_value(), 0.0);
    assert_eq!(slave.value(), 0.0);
}

#[test]
fn back_solve_clamps_to_bounds() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.add_master(master.clone(), false);
    master.set_value(0.1, Disposition::NoGroup);

    // raw would need to be 10 to reach 1.0; bound is 2.0
    slave.set_value(1.0, Disposition::NoGroup);
    assert!((slave.raw_value() - 2.0).abs() < EPS);
}

// ============================================================================
// Toggled composition
// ============================================================================

#[test]
fn toggled_or_across_masters() {
    // self=off, masters={on, off} -> on; removing the on master -> off
    let t = transport();
    let slave = mute(1, &t);
    let on_master = mute(2, &t);
    let off_master = mute(3, &t);

    slave.add_master(on_master.clone(), false);
    slave.add_master(off_master.clone(), false);
    on_master.set_value(1.0, Disposition::NoGroup);

    assert_eq!(slave.value(), 1.0);

    slave.remove_master(on_master.as_ref());
    assert_eq!(slave.value(), 0.0);
}

#[test]
fn toggled_self_on_wins() {
    let t = transport();
    let slave = mute(1, &t);
    let master = mute(2, &t);

    slave.add_master(master.clone(), false);
    slave.set_value(1.0, Disposition::NoGroup);

    assert_eq!(slave.value(), 1.0);
}

#[test]
fn self_on_short_circuit_skips_masters() {
    // While self is on, the composite never consults the masters, so a
    // master's cached boolean may lag until the next aggregation pass.
    let t = transport();
    let slave = mute(1, &t);
    let master = mute(2, &t);

    slave.add_master(master.clone(), false);
    master.set_value(1.0, Disposition::NoGroup);
    slave.set_value(1.0, Disposition::NoGroup);
    assert_eq!(slave.value(), 1.0);
    assert_eq!(slave.get_boolean_masters(), 1);

    // master turns off while self stays on: composite unchanged, and the
    // cached boolean still tracks the change signal
    master.set_value(0.0, Disposition::NoGroup);
    assert_eq!(slave.value(), 1.0);
    assert_eq!(slave.get_boolean_masters(), 0);

    slave.set_value(0.0, Disposition::NoGroup);
    assert_eq!(slave.value(), 0.0);
}

#[test]
fn boolean_masters_counts_cached_on_state() {
    let t = transport();
    let slave = mute(1, &t);
    let m1 = mute(2, &t);
    let m2 = mute(3, &t);

    m1.set_value(1.0, Disposition::NoGroup);
    slave.add_master(m1.clone(), false);
    slave.add_master(m2.clone(), false);

    assert_eq!(slave.get_boolean_masters(), 1);
    m2.set_value(1.0, Disposition::NoGroup);
    assert_eq!(slave.get_boolean_masters(), 2);
}

#[test]
fn continuous_control_reports_zero_boolean_masters() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    slave.add_master(master.clone(), false);
    assert_eq!(slave.get_boolean_masters(), 0);
}

// ============================================================================
// Master change propagation
// ============================================================================

#[test]
fn master_move_notifies_slave_once_not_from_self() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    slave.add_master(master.clone(), false);

    let count = Arc::new(AtomicUsize::new(0));
    let n = count.clone();
    let _sub = slave.changed().connect(move |ev| {
        assert!(!ev.from_self);
        n.fetch_add(1, Ordering::Relaxed);
    });

    master.set_value(0.5, Disposition::NoGroup);
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

#[test]
fn detached_master_no_longer_notifies() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    slave.add_master(master.clone(), false);
    slave.remove_master(master.as_ref());

    let (count, _sub) = count_changes(&slave);
    master.set_value(0.5, Disposition::NoGroup);
    assert_eq!(count.load(Ordering::Relaxed), 0);
}

// ============================================================================
// Boolean aggregation
// ============================================================================

#[test]
fn aggregation_coalesces_edges_into_one_notification() {
    // Two masters flip within the same pass; the slave notifies exactly once.
    let t = transport();
    let slave = mute(1, &t);
    let m1 = mute(2, &t);
    let m2 = mute(3, &t);

    slave.add_master(m1.clone(), false);
    slave.add_master(m2.clone(), false);

    for m in [&m1, &m2] {
        m.envelope().add_point(0.0, 0.0);
        m.envelope().add_point(100.0, 1.0);
        m.envelope().set_playback(true);
    }

    let (count, _sub) = count_changes(&slave);

    assert!(slave.boolean_automation_run(100, 64));
    assert_eq!(count.load(Ordering::Relaxed), 1);
    assert_eq!(slave.get_boolean_masters(), 2);

    // no edges on the next block: no notification
    assert!(!slave.boolean_automation_run(164, 64));
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

#[test]
fn aggregation_updates_master_visible_value() {
    let t = transport();
    let slave = mute(1, &t);
    let master = mute(2, &t);
    slave.add_master(master.clone(), false);

    master.envelope().add_point(0.0, 1.0);
    master.envelope().set_playback(true);

    let (master_count, _sub) = count_changes(&master);

    assert!(slave.boolean_automation_run(0, 64));
    assert_eq!(master.raw_value(), 1.0);
    // the pass announces the master's edge itself, exactly once
    assert_eq!(master_count.load(Ordering::Relaxed), 1);
}

#[test]
fn aggregation_ignores_continuous_and_idle_masters() {
    let t = transport();
    let slave = mute(1, &t);
    let idle = mute(2, &t);
    slave.add_master(idle.clone(), false);

    // toggled master with points but playback off: skipped
    idle.envelope().add_point(0.0, 1.0);

    assert!(!slave.boolean_automation_run(0, 64));
    assert_eq!(slave.get_boolean_masters(), 0);
}

#[test]
fn aggregation_on_continuous_slave_is_a_no_op() {
    let t = transport();
    let slave = gain(1, &t);
    let master = mute(2, &t);
    slave.add_master(master.clone(), false);
    master.envelope().add_point(0.0, 1.0);
    master.envelope().set_playback(true);

    assert!(!slave.boolean_automation_run(0, 64));
}

#[test]
fn aggregation_recurses_through_chained_mutes() {
    let t = transport();
    let slave = mute(1, &t);
    let master = mute(2, &t);
    let grandmaster = mute(3, &t);

    slave.add_master(master.clone(), false);
    master.add_master(grandmaster.clone(), false);

    grandmaster.envelope().add_point(0.0, 1.0);
    grandmaster.envelope().set_playback(true);
    // the middle master needs active playback to be scanned at all
    master.envelope().add_point(0.0, 0.0);
    master.envelope().set_playback(true);

    let (count, _sub) = count_changes(&slave);
    assert!(slave.boolean_automation_run(0, 64));
    assert_eq!(count.load(Ordering::Relaxed), 1);
    assert_eq!(master.get_boolean_masters(), 1);
}

// ============================================================================
// Curve compositor
// ============================================================================

#[test]
fn flat_values_multiply_without_curves() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(0.5, Disposition::NoGroup);
    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);

    let mut buf = [1.0_f32; 8];
    let mut scratch = [0.0_f32; 8];
    let active = slave.masters_curve_multiply(0, 8, &mut buf, &mut scratch);

    // slave flat 0.5, master's own flat 0.5 via recursion, then the
    // master's scalar ratio 0.5 on top: both contributions apply
    assert!(!active);
    for s in buf {
        assert!((s - 0.125).abs() < 1e-6);
    }
}

#[test]
fn own_curve_multiplies_per_sample() {
    let t = transport();
    let slave = gain(1, &t);
    slave.envelope().add_point(0.0, 0.0);
    slave.envelope().add_point(8.0, 1.0);
    slave.envelope().set_playback(true);

    let mut buf = [1.0_f32; 8];
    let mut scratch = [0.0_f32; 8];
    let active = slave.masters_curve_multiply(0, 8, &mut buf, &mut scratch);

    assert!(active);
    for (i, s) in buf.iter().enumerate() {
        assert!((s - i as f32 / 8.0).abs() < 1e-6, "sample {i} = {s}");
    }
}

#[test]
fn master_curve_and_scalar_both_apply() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(1.0, Disposition::NoGroup);
    slave.add_master(master.clone(), false);

    master.envelope().add_point(0.0, 0.5);
    master.envelope().set_playback(true);

    let mut buf = [1.0_f32; 4];
    let mut scratch = [0.0_f32; 4];
    let active = slave.masters_curve_multiply(0, 4, &mut buf, &mut scratch);

    // slave flat 1.0, master curve 0.5 via recursion, master scalar ratio
    // 0.5 (its playback value against the attach snapshot of 1.0)
    assert!(active);
    for s in buf {
        assert!((s - 0.25).abs() < 1e-6);
    }
}

#[test]
fn nested_master_curves_compose_depth_first() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    let grandmaster = gain(3, &t);

    slave.add_master(master.clone(), false);
    master.add_master(grandmaster.clone(), false);

    grandmaster.envelope().add_point(0.0, 0.5);
    grandmaster.envelope().set_playback(true);

    let mut buf = [1.0_f32; 4];
    let mut scratch = [0.0_f32; 4];
    let active = slave.masters_curve_multiply(0, 4, &mut buf, &mut scratch);

    // the grandmaster's curve reaches the slave's buffer through the chain
    // (0.5), then its scalar ratio applies inside the master's pass (0.5),
    // then the master's own composite ratio applies in the slave's pass
    // (0.5): depth-first, curve and scalar both count at every level
    assert!(active);
    for s in buf {
        assert!((s - 0.125).abs() < 1e-6);
    }
}

// ============================================================================
// Destruction & teardown
// ============================================================================

#[test]
fn master_destruction_detaches_and_bakes_last_value() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);
    assert!((slave.value() - 0.4).abs() < EPS);

    drop(master);

    assert!(!slave.slaved());
    assert!((slave.raw_value() - 0.4).abs() < EPS);
    assert!((slave.value() - 0.4).abs() < EPS);
}

#[test]
fn master_destruction_notifies_mastering_change() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    slave.add_master(master.clone(), false);

    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    let _sub = slave.mastering_changed().connect(move |()| {
        n.fetch_add(1, Ordering::Relaxed);
    });

    drop(master);
    assert_eq!(notified.load(Ordering::Relaxed), 1);
}

#[test]
fn teardown_suppresses_detach_side_effects() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.set_value(0.8, Disposition::NoGroup);
    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);

    let notified = Arc::new(AtomicUsize::new(0));
    let n = notified.clone();
    let _sub = slave.mastering_changed().connect(move |()| {
        n.fetch_add(1, Ordering::Relaxed);
    });

    slave.mark_for_teardown();
    slave.remove_master(master.as_ref());

    // no rescale, no notification; the record is simply left for teardown
    assert_eq!(notified.load(Ordering::Relaxed), 0);
    assert!((slave.raw_value() - 0.8).abs() < EPS);
}

// ============================================================================
// Next-event lookup
// ============================================================================

#[test]
fn next_event_scans_masters_and_chains() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);
    let grandmaster = gain(3, &t);

    slave.add_master(master.clone(), false);
    master.add_master(grandmaster.clone(), false);

    master.envelope().add_point(500.0, 0.7);
    grandmaster.envelope().add_point(300.0, 0.9);

    let mut next = ControlEvent {
        when: 1000.0,
        value: 0.0,
    };
    assert!(slave.find_next_event(0.0, 1000.0, &mut next));
    assert_eq!(next.when, 300.0);
    assert_eq!(next.value, 0.9);
}

#[test]
fn next_event_without_masters_finds_nothing() {
    let t = transport();
    let slave = gain(1, &t);
    slave.envelope().add_point(10.0, 0.5);

    let mut next = ControlEvent {
        when: 1000.0,
        value: 0.0,
    };
    assert!(!slave.find_next_event(0.0, 1000.0, &mut next));
    assert_eq!(next.when, 1000.0);
}

// ============================================================================
// Envelope playback path
// ============================================================================

#[test]
fn playback_value_is_scaled_by_masters() {
    let t = transport();
    let slave = gain(1, &t);
    let master = gain(2, &t);

    slave.envelope().add_point(0.0, 1.0);
    slave.envelope().set_playback(true);
    slave.add_master(master.clone(), false);
    master.set_value(0.5, Disposition::NoGroup);

    t.set_position(0);
    assert!((slave.value() - 0.5).abs() < EPS);
}
