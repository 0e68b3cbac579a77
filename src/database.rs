//! Layer 6: Database
//!
//! UUID-keyed arenas for groups and entries plus the root, the tombstone
//! set, and metadata. Parent/child links are UUID pairs; the maps double as
//! the global UUID index.
//!
//! Structural operations perform the implicit timestamping the runtime
//! expects: attaching or moving an object stamps its `location_changed` and
//! the affected parents' `last_modification`, deleting records a tombstone.
//! Both behaviors honor the per-object `update_time_info` flag, which
//! [`Database::suspend_timestamping`] scopes off for callers that are
//! authoritative about time, the merge engine first among them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::Entry;
use crate::error::ModelError;
use crate::group::{Group, MergeMode};
use crate::meta::Metadata;
use crate::time::Clock;
use crate::tombstone::DeletedObject;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    root: Uuid,
    groups: BTreeMap<Uuid, Group>,
    entries: BTreeMap<Uuid, Entry>,
    deleted_objects: BTreeMap<Uuid, DeletedObject>,
    metadata: Metadata,
    #[serde(skip)]
    modified: bool,
}

impl Database {
    pub fn new() -> Self {
        let root = Group::new("Root");
        let root_uuid = root.uuid();
        let mut groups = BTreeMap::new();
        groups.insert(root_uuid, root);
        Self {
            root: root_uuid,
            groups,
            entries: BTreeMap::new(),
            deleted_objects: BTreeMap::new(),
            metadata: Metadata::default(),
            modified: false,
        }
    }

    pub fn root(&self) -> Uuid {
        self.root
    }

    pub fn root_group(&self) -> &Group {
        self.groups.get(&self.root).expect("root group exists")
    }

    pub fn group(&self, uuid: Uuid) -> Option<&Group> {
        self.groups.get(&uuid)
    }

    pub fn group_mut(&mut self, uuid: Uuid) -> Option<&mut Group> {
        self.groups.get_mut(&uuid)
    }

    pub fn entry(&self, uuid: Uuid) -> Option<&Entry> {
        self.entries.get(&uuid)
    }

    pub fn entry_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        self.entries.get_mut(&uuid)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// True if `ancestor` lies on `node`'s parent chain. A node is not its
    /// own ancestor.
    pub fn is_ancestor(&self, ancestor: Uuid, node: Uuid) -> bool {
        let mut current = node;
        while let Some(parent) = self.groups.get(&current).and_then(Group::parent) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Resolve `Inherit` against the parent chain. A root left on `Inherit`
    /// resolves to `KeepNewer`.
    pub fn effective_merge_mode(&self, group: Uuid) -> MergeMode {
        let mut current = group;
        loop {
            let Some(group) = self.groups.get(&current) else {
                return MergeMode::KeepNewer;
            };
            match group.merge_mode() {
                MergeMode::Inherit => match group.parent() {
                    Some(parent) => current = parent,
                    None => return MergeMode::KeepNewer,
                },
                mode => return mode,
            }
        }
    }

    pub fn add_group(&mut self, mut group: Group, parent: Uuid) -> Result<Uuid, ModelError> {
        let uuid = group.uuid();
        if self.groups.contains_key(&uuid) || self.entries.contains_key(&uuid) {
            return Err(ModelError::DuplicateUuid { uuid });
        }
        let now = Clock::now();
        let parent_group = self
            .groups
            .get_mut(&parent)
            .ok_or(ModelError::UnknownGroup { uuid: parent })?;
        parent_group.groups_mut().push(uuid);
        if parent_group.can_update_time_info() {
            parent_group.times_mut().last_modification = now;
        }
        group.set_parent(Some(parent));
        if group.can_update_time_info() {
            group.times_mut().location_changed = now;
        }
        self.groups.insert(uuid, group);
        Ok(uuid)
    }

    pub fn add_entry(&mut self, mut entry: Entry, parent: Uuid) -> Result<Uuid, ModelError> {
        let uuid = entry.uuid();
        if self.groups.contains_key(&uuid) || self.entries.contains_key(&uuid) {
            return Err(ModelError::DuplicateUuid { uuid });
        }
        let now = Clock::now();
        let parent_group = self
            .groups
            .get_mut(&parent)
            .ok_or(ModelError::UnknownGroup { uuid: parent })?;
        parent_group.entries_mut().push(uuid);
        if parent_group.can_update_time_info() {
            parent_group.times_mut().last_modification = now;
        }
        entry.set_parent(Some(parent));
        if entry.can_update_time_info() {
            entry.times_mut().location_changed = now;
        }
        self.entries.insert(uuid, entry);
        Ok(uuid)
    }

    pub fn move_entry(&mut self, uuid: Uuid, new_parent: Uuid) -> Result<(), ModelError> {
        if !self.entries.contains_key(&uuid) {
            return Err(ModelError::UnknownEntry { uuid });
        }
        if !self.groups.contains_key(&new_parent) {
            return Err(ModelError::UnknownGroup { uuid: new_parent });
        }
        let old_parent = self.entries[&uuid].parent();
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        let now = Clock::now();
        if let Some(old) = old_parent {
            if let Some(group) = self.groups.get_mut(&old) {
                group.entries_mut().retain(|child| *child != uuid);
                if group.can_update_time_info() {
                    group.times_mut().last_modification = now;
                }
            }
        }
        let parent_group = self.groups.get_mut(&new_parent).expect("checked above");
        parent_group.entries_mut().push(uuid);
        if parent_group.can_update_time_info() {
            parent_group.times_mut().last_modification = now;
        }
        let entry = self.entries.get_mut(&uuid).expect("checked above");
        entry.set_parent(Some(new_parent));
        if entry.can_update_time_info() {
            entry.times_mut().location_changed = now;
        }
        Ok(())
    }

    pub fn move_group(&mut self, uuid: Uuid, new_parent: Uuid) -> Result<(), ModelError> {
        if uuid == self.root {
            return Err(ModelError::RootGroup { uuid });
        }
        if !self.groups.contains_key(&uuid) {
            return Err(ModelError::UnknownGroup { uuid });
        }
        if !self.groups.contains_key(&new_parent) {
            return Err(ModelError::UnknownGroup { uuid: new_parent });
        }
        if uuid == new_parent || self.is_ancestor(uuid, new_parent) {
            return Err(ModelError::CyclicMove { uuid });
        }
        let old_parent = self.groups[&uuid].parent();
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        let now = Clock::now();
        if let Some(old) = old_parent {
            if let Some(group) = self.groups.get_mut(&old) {
                group.groups_mut().retain(|child| *child != uuid);
                if group.can_update_time_info() {
                    group.times_mut().last_modification = now;
                }
            }
        }
        let parent_group = self.groups.get_mut(&new_parent).expect("checked above");
        parent_group.groups_mut().push(uuid);
        if parent_group.can_update_time_info() {
            parent_group.times_mut().last_modification = now;
        }
        let group = self.groups.get_mut(&uuid).expect("checked above");
        group.set_parent(Some(new_parent));
        if group.can_update_time_info() {
            group.times_mut().location_changed = now;
        }
        Ok(())
    }

    /// Detach and take an entry without recording a tombstone.
    pub(crate) fn remove_entry(&mut self, uuid: Uuid) -> Result<Entry, ModelError> {
        let mut entry = self
            .entries
            .remove(&uuid)
            .ok_or(ModelError::UnknownEntry { uuid })?;
        if let Some(parent) = entry.parent() {
            if let Some(group) = self.groups.get_mut(&parent) {
                group.entries_mut().retain(|child| *child != uuid);
                if group.can_update_time_info() {
                    group.times_mut().last_modification = Clock::now();
                }
            }
        }
        entry.set_parent(None);
        Ok(entry)
    }

    /// Detach and drop a subtree without recording tombstones. Returns the
    /// removed UUIDs, entries before groups.
    pub(crate) fn remove_group(&mut self, uuid: Uuid) -> Result<Vec<Uuid>, ModelError> {
        if uuid == self.root {
            return Err(ModelError::RootGroup { uuid });
        }
        if !self.groups.contains_key(&uuid) {
            return Err(ModelError::UnknownGroup { uuid });
        }

        let mut subtree_groups = vec![uuid];
        let mut index = 0;
        while index < subtree_groups.len() {
            let current = subtree_groups[index];
            subtree_groups.extend(self.groups[&current].groups().iter().copied());
            index += 1;
        }

        let mut removed = Vec::new();
        for group_uuid in &subtree_groups {
            for entry_uuid in self.groups[group_uuid].entries().to_vec() {
                self.entries.remove(&entry_uuid);
                removed.push(entry_uuid);
            }
        }

        if let Some(parent) = self.groups[&uuid].parent() {
            if let Some(group) = self.groups.get_mut(&parent) {
                group.groups_mut().retain(|child| *child != uuid);
                if group.can_update_time_info() {
                    group.times_mut().last_modification = Clock::now();
                }
            }
        }
        for group_uuid in subtree_groups {
            self.groups.remove(&group_uuid);
            removed.push(group_uuid);
        }
        Ok(removed)
    }

    /// Remove an entry and record its tombstone.
    pub fn delete_entry(&mut self, uuid: Uuid) -> Result<(), ModelError> {
        self.remove_entry(uuid)?;
        self.deleted_objects
            .insert(uuid, DeletedObject::new(uuid, Clock::now()));
        Ok(())
    }

    /// Remove a subtree and record one tombstone per removed object.
    pub fn delete_group(&mut self, uuid: Uuid) -> Result<(), ModelError> {
        let removed = self.remove_group(uuid)?;
        let now = Clock::now();
        for removed_uuid in removed {
            self.deleted_objects
                .insert(removed_uuid, DeletedObject::new(removed_uuid, now));
        }
        Ok(())
    }

    /// Snapshot the entry into its history, apply the edit, and stamp the
    /// modification when implicit timestamping is enabled. A closure that
    /// changes nothing leaves the entry untouched.
    pub fn edit_entry<F>(&mut self, uuid: Uuid, edit: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut Entry),
    {
        let max_items = self.metadata.history_max_items;
        let entry = self
            .entries
            .get_mut(&uuid)
            .ok_or(ModelError::UnknownEntry { uuid })?;
        let before = entry.clone_shallow();
        edit(entry);
        if entry.attributes() == before.attributes() && entry.times() == before.times() {
            return Ok(());
        }
        entry.add_history_item(before);
        if entry.can_update_time_info() {
            let now = Clock::now();
            entry.times_mut().last_modification = now;
            entry.times_mut().last_access = now;
            entry.times_mut().usage_count += 1;
        }
        entry.truncate_history(max_items);
        Ok(())
    }

    /// Apply a group edit, stamping the modification when implicit
    /// timestamping is enabled.
    pub fn edit_group<F>(&mut self, uuid: Uuid, edit: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut Group),
    {
        let group = self
            .groups
            .get_mut(&uuid)
            .ok_or(ModelError::UnknownGroup { uuid })?;
        let before = group.clone();
        edit(group);
        if *group == before {
            return Ok(());
        }
        if group.can_update_time_info() {
            group.times_mut().last_modification = Clock::now();
        }
        Ok(())
    }

    pub fn deleted_objects(&self) -> &BTreeMap<Uuid, DeletedObject> {
        &self.deleted_objects
    }

    pub fn set_deleted_objects(&mut self, deleted_objects: BTreeMap<Uuid, DeletedObject>) {
        self.deleted_objects = deleted_objects;
    }

    pub fn add_deleted_object(&mut self, object: DeletedObject) {
        self.deleted_objects.insert(object.uuid, object);
    }

    pub fn contains_deleted(&self, uuid: Uuid) -> bool {
        self.deleted_objects.contains_key(&uuid)
    }

    pub fn can_update_time_info(&self, uuid: Uuid) -> Option<bool> {
        if let Some(entry) = self.entries.get(&uuid) {
            return Some(entry.can_update_time_info());
        }
        self.groups.get(&uuid).map(Group::can_update_time_info)
    }

    pub fn set_update_time_info(&mut self, uuid: Uuid, on: bool) {
        if let Some(entry) = self.entries.get_mut(&uuid) {
            entry.set_update_time_info(on);
        } else if let Some(group) = self.groups.get_mut(&uuid) {
            group.set_update_time_info(on);
        }
    }

    /// Run `scope` with implicit timestamping disabled on the given objects,
    /// restoring the saved flags afterwards. Unknown UUIDs are skipped.
    pub fn suspend_timestamping<R, F>(&mut self, uuids: &[Uuid], scope: F) -> R
    where
        F: FnOnce(&mut Database) -> R,
    {
        let mut saved = Vec::with_capacity(uuids.len());
        for &uuid in uuids {
            if let Some(prev) = self.can_update_time_info(uuid) {
                self.set_update_time_info(uuid, false);
                saved.push((uuid, prev));
            }
        }
        let result = scope(self);
        for (uuid, prev) in saved.into_iter().rev() {
            self.set_update_time_info(uuid, prev);
        }
        result
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
