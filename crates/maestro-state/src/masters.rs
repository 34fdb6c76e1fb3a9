//! Master-link document format and deferred restore.
//!
//! A control's master links are persisted as one `masters` container with
//! one entry per attached master. Toggled controls save the cached boolean;
//! continuous controls save both attach-time snapshots, which is what keeps
//! ratios meaningful across a save/load cycle.
//!
//! Masters may not exist yet when a control loads, so restore is two-phase:
//! the parsed document is stashed verbatim in a [`PendingMasters`], and once
//! the full control graph exists (and the master links have been
//! re-attached), [`PendingMasters::resolve`] applies each entry onto the
//! live registry, skipping ids that never materialized, and discards the
//! stash.

use serde::{Deserialize, Serialize};
use std::path::Path;

use maestro_core::{ControlId, ControlSource, SlavableControl};

use crate::error::StateError;

/// One persisted master link.
///
/// # TOML Format
///
/// ```toml
/// # toggled controls
/// [[masters]]
/// id = 7
/// yn = true
///
/// # continuous controls
/// [[masters]]
/// id = 9
/// val-ctrl = 0.8
/// val-master = 1.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MasterEntry {
    /// A toggled control's link: the cached on/off state.
    Toggled {
        /// Identity of the master.
        id: u64,
        /// Cached boolean at save time.
        yn: bool,
    },
    /// A continuous control's link: both attach-time snapshots.
    Continuous {
        /// Identity of the master.
        id: u64,
        /// Slave composite value snapshotted at attach time.
        #[serde(rename = "val-ctrl")]
        val_ctrl: f64,
        /// Master value snapshotted at attach time.
        #[serde(rename = "val-master")]
        val_master: f64,
    },
}

impl MasterEntry {
    /// Identity of the master this entry points at.
    pub fn id(&self) -> ControlId {
        match self {
            MasterEntry::Toggled { id, .. } | MasterEntry::Continuous { id, .. } => {
                ControlId::new(*id)
            }
        }
    }
}

/// The persisted master list of one control.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MastersDoc {
    /// One entry per attached master.
    #[serde(default)]
    pub masters: Vec<MasterEntry>,
}

impl MastersDoc {
    /// Capture the master list of `control`.
    ///
    /// The entry kind follows the control's parameter kind: toggled controls
    /// persist cached booleans, continuous ones persist snapshot ratios.
    pub fn capture(control: &SlavableControl) -> Self {
        let toggled = control.descriptor().toggled;
        let masters = control
            .master_link_states()
            .into_iter()
            .map(|link| {
                if toggled {
                    MasterEntry::Toggled {
                        id: link.id.raw(),
                        yn: link.yn,
                    }
                } else {
                    MasterEntry::Continuous {
                        id: link.id.raw(),
                        val_ctrl: link.val_ctrl,
                        val_master: link.val_master,
                    }
                }
            })
            .collect();
        Self { masters }
    }

    /// Number of persisted links.
    pub fn len(&self) -> usize {
        self.masters.len()
    }

    /// True when no links are persisted.
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }

    /// Parse a document from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, StateError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Render the document as a TOML string.
    pub fn to_toml(&self) -> Result<String, StateError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a document from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| StateError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Save the document to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StateError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StateError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| StateError::write_file(path, e))?;
        Ok(())
    }
}

/// A stashed master list awaiting the rest of the control graph.
///
/// Phase one of restore parses and stashes; phase two, run once every
/// control exists and links are re-attached, resolves the stash against the
/// live registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMasters {
    entries: Vec<MasterEntry>,
}

impl PendingMasters {
    /// Stash the entries of a parsed document.
    pub fn new(doc: MastersDoc) -> Self {
        Self {
            entries: doc.masters,
        }
    }

    /// Number of stashed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stashed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every stashed entry onto `control`'s live registry.
    ///
    /// Entries whose id is not attached are skipped: a best-effort restore,
    /// not an error. Consumes the stash; returns how many entries applied.
    pub fn resolve(self, control: &SlavableControl) -> usize {
        let mut applied = 0;
        for entry in &self.entries {
            let ok = match entry {
                MasterEntry::Toggled { id, yn } => {
                    control.apply_saved_boolean(ControlId::new(*id), *yn)
                }
                MasterEntry::Continuous {
                    id,
                    val_ctrl,
                    val_master,
                } => control.apply_saved_ratios(ControlId::new(*id), *val_ctrl, *val_master),
            };
            if ok {
                applied += 1;
            } else {
                tracing::debug!(
                    master = entry.id().raw(),
                    "skipping saved master link, control not attached"
                );
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggled_entry_roundtrips_through_toml() {
        let doc = MastersDoc {
            masters: vec![MasterEntry::Toggled { id: 7, yn: true }],
        };
        let toml_str = doc.to_toml().unwrap();
        assert!(toml_str.contains("yn = true"));
        assert_eq!(MastersDoc::from_toml(&toml_str).unwrap(), doc);
    }

    #[test]
    fn continuous_entry_roundtrips_through_toml() {
        let doc = MastersDoc {
            masters: vec![MasterEntry::Continuous {
                id: 9,
                val_ctrl: 0.8,
                val_master: 1.0,
            }],
        };
        let toml_str = doc.to_toml().unwrap();
        assert!(toml_str.contains("val-ctrl = 0.8"));
        assert!(toml_str.contains("val-master = 1.0"));
        assert_eq!(MastersDoc::from_toml(&toml_str).unwrap(), doc);
    }

    #[test]
    fn wire_format_is_kebab_case() {
        let parsed = MastersDoc::from_toml(
            r#"
            [[masters]]
            id = 3
            val-ctrl = 0.5
            val-master = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.masters,
            vec![MasterEntry::Continuous {
                id: 3,
                val_ctrl: 0.5,
                val_master: 2.0,
            }]
        );
    }

    #[test]
    fn missing_masters_container_parses_empty() {
        let parsed = MastersDoc::from_toml("").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn entry_id_accessor_covers_both_kinds() {
        assert_eq!(
            MasterEntry::Toggled { id: 1, yn: false }.id(),
            ControlId::new(1)
        );
        assert_eq!(
            MasterEntry::Continuous {
                id: 2,
                val_ctrl: 0.0,
                val_master: 0.0
            }
            .id(),
            ControlId::new(2)
        );
    }
}
