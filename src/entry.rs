//! Layer 4: Entries
//!
//! An entry is a leaf carrying credential fields as a string attribute map,
//! plus an ordered list of history items: archived prior revisions stored
//! oldest-first. A history item is itself entry-shaped, with no parent and
//! no nested history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::TimeInfo;

fn default_update_time_info() -> bool {
    true
}

/// Options for the relaxed entry comparison.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryCompare {
    pub ignore_milliseconds: bool,
    pub ignore_history: bool,
    pub ignore_location: bool,
}

impl EntryCompare {
    /// Tolerate sub-second drift only.
    pub const RELAXED: Self = Self {
        ignore_milliseconds: true,
        ignore_history: false,
        ignore_location: false,
    };

    /// Compare credential content alone: tolerate sub-second drift, ignore
    /// history and location.
    pub const CONTENT_ONLY: Self = Self {
        ignore_milliseconds: true,
        ignore_history: true,
        ignore_location: true,
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    uuid: Uuid,
    parent: Option<Uuid>,
    attributes: BTreeMap<String, String>,
    times: TimeInfo,
    history: Vec<Entry>,
    #[serde(skip, default = "default_update_time_info")]
    update_time_info: bool,
}

impl Entry {
    pub const TITLE: &'static str = "Title";
    pub const USERNAME: &'static str = "UserName";
    pub const PASSWORD: &'static str = "Password";
    pub const NOTES: &'static str = "Notes";

    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }

    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            parent: None,
            attributes: BTreeMap::new(),
            times: TimeInfo::now(),
            history: Vec::new(),
            update_time_info: true,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Uuid>) {
        self.parent = parent;
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn title(&self) -> &str {
        self.attribute(Self::TITLE).unwrap_or_default()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.set_attribute(Self::TITLE, title);
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

    pub fn can_update_time_info(&self) -> bool {
        self.update_time_info
    }

    pub fn set_update_time_info(&mut self, on: bool) {
        self.update_time_info = on;
    }

    /// Archived revisions, oldest first.
    pub fn history(&self) -> &[Entry] {
        &self.history
    }

    pub fn add_history_item(&mut self, item: Entry) {
        debug_assert!(item.parent.is_none(), "history items are parent-less");
        debug_assert!(item.history.is_empty(), "history items carry no history");
        self.history.push(item);
    }

    pub(crate) fn replace_history(&mut self, items: Vec<Entry>) {
        debug_assert!(
            items
                .iter()
                .all(|item| item.parent.is_none() && item.history.is_empty()),
            "history items are parent-less and carry no history"
        );
        self.history = items;
    }

    /// Drop the oldest items above the cap. `None` means unbounded.
    pub fn truncate_history(&mut self, max_items: Option<usize>) {
        if let Some(max) = max_items {
            if self.history.len() > max {
                let excess = self.history.len() - max;
                self.history.drain(..excess);
            }
        }
    }

    /// Snapshot without history or parent, preserving UUID and times.
    pub fn clone_shallow(&self) -> Entry {
        Entry {
            uuid: self.uuid,
            parent: None,
            attributes: self.attributes.clone(),
            times: self.times,
            history: Vec::new(),
            update_time_info: self.update_time_info,
        }
    }

    /// Deep clone including history, preserving UUID and times. Parent-less
    /// until attached.
    pub fn clone_with_history(&self) -> Entry {
        let mut cloned = self.clone_shallow();
        cloned.history = self.history.clone();
        cloned
    }

    /// Deep clone including history under a fresh UUID.
    pub fn clone_with_new_uuid(&self) -> Entry {
        let mut cloned = self.clone_with_history();
        cloned.uuid = Uuid::new_v4();
        cloned
    }

    /// Relaxed equivalence. Access statistics are never compared.
    pub fn equivalent(&self, other: &Entry, compare: EntryCompare) -> bool {
        if self.uuid != other.uuid || self.attributes != other.attributes {
            return false;
        }
        if !self.times.equivalent(
            &other.times,
            compare.ignore_milliseconds,
            compare.ignore_location,
        ) {
            return false;
        }
        if compare.ignore_history {
            return true;
        }
        self.history.len() == other.history.len()
            && self
                .history
                .iter()
                .zip(&other.history)
                .all(|(a, b)| a.equivalent(b, compare))
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}
