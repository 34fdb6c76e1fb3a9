//! Maestro State - master-link persistence for slavable controls
//!
//! Serializes the master list of a
//! [`SlavableControl`](maestro_core::SlavableControl) to TOML and restores it
//! with the two-phase scheme the control graph requires: masters may not
//! exist yet when a control loads, so parsed documents are stashed as
//! [`PendingMasters`] and resolved against the live registry once the whole
//! graph is up.
//!
//! # Format
//!
//! One `masters` container per control, one entry per attached master.
//! Toggled controls persist the cached boolean (`yn`); continuous controls
//! persist both attach-time snapshots (`val-ctrl`, `val-master`):
//!
//! ```toml
//! [[masters]]
//! id = 7
//! yn = true
//!
//! [[masters]]
//! id = 9
//! val-ctrl = 0.8
//! val-master = 1.0
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use maestro_core::{ControlId, ParameterDescriptor, SlavableControl, Transport};
//! use maestro_state::{MastersDoc, PendingMasters};
//!
//! let transport = Arc::new(Transport::new());
//! let desc = ParameterDescriptor::continuous(0.0, 2.0, 1.0);
//! let fader = SlavableControl::new(ControlId::new(1), "fader", desc.clone(), transport.clone());
//! let vca = SlavableControl::new(ControlId::new(2), "vca", desc, transport);
//! fader.add_master(vca.clone(), false);
//!
//! // save
//! let doc = MastersDoc::capture(&fader);
//! let toml_str = doc.to_toml().unwrap();
//!
//! // load: stash first, resolve once the graph is rebuilt
//! let pending = PendingMasters::new(MastersDoc::from_toml(&toml_str).unwrap());
//! assert_eq!(pending.resolve(&fader), 1);
//! ```

pub mod error;
pub mod masters;

pub use error::StateError;
pub use masters::{MasterEntry, MastersDoc, PendingMasters};
