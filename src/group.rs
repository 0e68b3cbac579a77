//! Layer 5: Groups
//!
//! A group is a named node in the tree. It owns ordered child lists (groups
//! and entries, by UUID) and carries the per-subtree merge policy.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::icon::Icon;
use crate::time::TimeInfo;

fn default_update_time_info() -> bool {
    true
}

/// Per-group conflict-resolution policy.
///
/// `Inherit` delegates to the parent; a root left on `Inherit` resolves to
/// `KeepNewer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMode {
    #[default]
    Inherit,
    KeepNewer,
    KeepExisting,
    KeepBoth,
    Synchronize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    uuid: Uuid,
    name: String,
    notes: String,
    icon: Icon,
    times: TimeInfo,
    merge_mode: MergeMode,
    parent: Option<Uuid>,
    groups: Vec<Uuid>,
    entries: Vec<Uuid>,
    #[serde(skip, default = "default_update_time_info")]
    update_time_info: bool,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            notes: String::new(),
            icon: Icon::default(),
            times: TimeInfo::now(),
            merge_mode: MergeMode::Inherit,
            parent: None,
            groups: Vec::new(),
            entries: Vec::new(),
            update_time_info: true,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    pub fn icon(&self) -> Icon {
        self.icon
    }

    pub fn set_icon(&mut self, icon: Icon) {
        self.icon = icon;
    }

    pub fn times(&self) -> &TimeInfo {
        &self.times
    }

    pub fn times_mut(&mut self) -> &mut TimeInfo {
        &mut self.times
    }

    pub fn set_times(&mut self, times: TimeInfo) {
        self.times = times;
    }

    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }

    pub fn set_merge_mode(&mut self, mode: MergeMode) {
        self.merge_mode = mode;
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Uuid>) {
        self.parent = parent;
    }

    /// Child groups, in order.
    pub fn groups(&self) -> &[Uuid] {
        &self.groups
    }

    /// Child entries, in order.
    pub fn entries(&self) -> &[Uuid] {
        &self.entries
    }

    pub(crate) fn groups_mut(&mut self) -> &mut Vec<Uuid> {
        &mut self.groups
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<Uuid> {
        &mut self.entries
    }

    pub fn can_update_time_info(&self) -> bool {
        self.update_time_info
    }

    pub fn set_update_time_info(&mut self, on: bool) {
        self.update_time_info = on;
    }

    /// Structural shell: same identity and content, no children, no parent.
    pub fn clone_shell(&self) -> Group {
        Group {
            uuid: self.uuid,
            name: self.name.clone(),
            notes: self.notes.clone(),
            icon: self.icon,
            times: self.times,
            merge_mode: self.merge_mode,
            parent: None,
            groups: Vec::new(),
            entries: Vec::new(),
            update_time_info: self.update_time_info,
        }
    }
}
