//! Maestro Core - slavable automation controls for VCA-style grouping
//!
//! This crate computes the composite value of a scalar audio parameter that
//! can be scaled or overridden by zero or more "master" parameters, the
//! grouping mechanism behind VCA faders and grouped mutes.
//!
//! # Core Abstractions
//!
//! ## Controls
//!
//! - [`AutomationControl`] - base scalar control: clamped raw value,
//!   automation envelope, change + destroy signals
//! - [`SlavableControl`] - a control whose effective value combines its raw
//!   value with every attached master's contribution
//! - [`ControlSource`] - the trait surface the mastering machinery consumes;
//!   its [`as_slavable`](ControlSource::as_slavable) capability is what lets
//!   master chains nest
//!
//! ## Composition
//!
//! Continuous parameters compose multiplicatively: the composite is the raw
//! value times the product of each master's ratio, where a ratio is the
//! master's composite value relative to its attach-time snapshot. Attaching
//! a master never moves the composite; detaching folds the master's last
//! contribution into the raw value so the composite is continuous across the
//! boundary.
//!
//! Toggled parameters compose as a boolean OR: the slave is on when it is on
//! itself or any master is on.
//!
//! ## Realtime paths
//!
//! - [`SlavableControl::masters_curve_multiply`] - allocation-free,
//!   non-blocking per-sample curve composition for the render thread
//! - [`SlavableControl::boolean_automation_run`] - per-block edge detection
//!   over toggled master chains, coalescing to one notification per pass
//!
//! ## Support
//!
//! - [`Envelope`] - automation point list with a try-lock realtime read path
//! - [`Signal`] / [`Subscription`] - subscribable change & destroy events
//! - [`Transport`] - the engine's shared playhead
//! - [`AtomicF64`] - lock-free value cells
//!
//! # Threading Model
//!
//! One reader-writer lock per control guards the master registry. The
//! control/UI thread attaches and detaches; the audio thread reads values
//! and curves, using non-blocking acquisition on the render path. Slaves
//! hold only weak handles to masters; a master's destruction severs every
//! link through its destroy signal, so no link can dangle.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use maestro_core::{
//!     ControlId, Disposition, ParameterDescriptor, SlavableControl, Transport,
//! };
//!
//! let transport = Arc::new(Transport::new());
//! let desc = ParameterDescriptor::continuous(0.0, 2.0, 1.0);
//!
//! let fader = SlavableControl::new(ControlId::new(1), "fader", desc.clone(), transport.clone());
//! let vca = SlavableControl::new(ControlId::new(2), "vca", desc, transport);
//!
//! fader.set_value(0.8, Disposition::NoGroup);
//! fader.add_master(vca.clone(), false);
//!
//! // attaching is value-neutral; halving the master halves the slave
//! assert_eq!(fader.value(), 0.8);
//! vca.set_value(0.5, Disposition::NoGroup);
//! assert_eq!(fader.value(), 0.4);
//!
//! // detaching bakes the contribution in: the composite does not move
//! fader.remove_master(vca.as_ref());
//! assert_eq!(fader.value(), 0.4);
//! assert_eq!(fader.raw_value(), 0.4);
//! ```

pub mod atomic;
pub mod control;
pub mod envelope;
pub mod event;
pub mod slave;
pub mod transport;

// Re-export main types at crate root
pub use atomic::AtomicF64;
pub use control::{
    AutomationControl, ChangeEvent, ControlId, ControlSource, DestroyEvent, Disposition,
    ParameterDescriptor,
};
pub use envelope::{ControlEvent, Envelope, Point};
pub use event::{Signal, Subscription};
pub use slave::{MasterHooks, MasterLinkState, NullHooks, SlavableControl};
pub use transport::{SamplePos, Transport};
