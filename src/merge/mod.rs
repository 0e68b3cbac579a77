//! Layer 7: The merge engine
//!
//! Reconciles a source database into a target sharing common ancestry.
//! Identity is the UUID, never the path or name. Three passes run strictly
//! in order on the paired root scopes:
//!
//! 1. structural: create missing counterparts, relocate moved ones, resolve
//!    content conflicts under the effective [`MergeMode`];
//! 2. deletions: union the tombstone sets and reconcile deletes against
//!    later edits;
//! 3. metadata: import referenced custom icons the target lacks.
//!
//! The source is never mutated. The target is marked modified iff at least
//! one change was applied.

mod changes;
mod context;
mod history;

pub use changes::{ChangeKind, MergeChange};

use std::collections::{BTreeMap, VecDeque};

use uuid::Uuid;

use crate::database::Database;
use crate::entry::Entry;
use crate::error::MergeError;
use crate::group::{Group, MergeMode};
use crate::tombstone::DeletedObject;
use context::MergeContext;
use history::merge_history;

pub struct Merger<'a> {
    source: &'a Database,
    target: &'a mut Database,
    context: MergeContext,
    forced_mode: Option<MergeMode>,
    changes: Vec<MergeChange>,
}

impl<'a> Merger<'a> {
    /// Merge whole databases, rooted at their respective root groups.
    pub fn new(source: &'a Database, target: &'a mut Database) -> Merger<'a> {
        let context = MergeContext {
            source_root: source.root(),
            target_root: target.root(),
            source_group: source.root(),
            target_group: target.root(),
        };
        Merger {
            source,
            target,
            context,
            forced_mode: None,
            changes: Vec::new(),
        }
    }

    /// Merge two subtrees. Their databases supply metadata (custom icons,
    /// tombstones, the history cap) for the duration.
    pub fn for_groups(
        source: &'a Database,
        source_group: Uuid,
        target: &'a mut Database,
        target_group: Uuid,
    ) -> Result<Merger<'a>, MergeError> {
        if source.group(source_group).is_none() {
            return Err(MergeError::SourceGroupNotFound { uuid: source_group });
        }
        if target.group(target_group).is_none() {
            return Err(MergeError::TargetGroupNotFound { uuid: target_group });
        }
        let context = MergeContext {
            source_root: source.root(),
            target_root: target.root(),
            source_group,
            target_group,
        };
        Ok(Merger {
            source,
            target,
            context,
            forced_mode: None,
            changes: Vec::new(),
        })
    }

    /// Override the per-group merge-mode lookup for this run.
    pub fn set_forced_merge_mode(&mut self, mode: MergeMode) {
        self.forced_mode = Some(mode);
    }

    pub fn reset_forced_merge_mode(&mut self) {
        self.forced_mode = None;
    }

    /// Run the three passes. Returns true iff any change was applied; the
    /// target is then marked modified.
    pub fn merge(&mut self) -> bool {
        // Pass order is load-bearing: a create-on-one-side/delete-on-other
        // pair converges by examining timestamps, not traversal order, so
        // creation runs before deletion.
        let context = self.context;
        let mut changes = self.merge_group(&context);
        changes.extend(self.merge_deletions());
        changes.extend(self.merge_metadata());

        let changed = !changes.is_empty();
        if changed {
            self.target.mark_modified();
        }
        self.changes = changes;
        changed
    }

    /// Applied-edit descriptions from the last [`Merger::merge`] run.
    pub fn changes(&self) -> &[MergeChange] {
        &self.changes
    }

    // ------------------------------------------------------------------
    // Structural pass
    // ------------------------------------------------------------------

    fn merge_group(&mut self, context: &MergeContext) -> Vec<MergeChange> {
        let source = self.source;
        let mut changes = Vec::new();

        // Entries first: an entry moved across groups must be relocated by
        // the first pass that encounters it under the new parent.
        let source_entries = source
            .group(context.source_group)
            .map(|group| group.entries().to_vec())
            .unwrap_or_default();
        for uuid in source_entries {
            let Some(source_entry) = source.entry(uuid) else {
                continue;
            };
            match self.find_target_entry(context, uuid) {
                None => {
                    changes.push(MergeChange::new(
                        ChangeKind::CreateMissing,
                        uuid,
                        source_entry.title(),
                    ));
                    let cloned = source_entry.clone_with_history();
                    self.adopt_entry(cloned, context.target_group);
                }
                Some(existing) => {
                    let relocated = existing.times().location_changed
                        < source_entry.times().location_changed
                        && existing.parent() != Some(context.target_group);
                    if relocated {
                        changes.push(MergeChange::new(
                            ChangeKind::Relocate,
                            uuid,
                            source_entry.title(),
                        ));
                        self.relocate_entry(uuid, context.target_group);
                        if let Some(entry) = self.target.entry_mut(uuid) {
                            entry.times_mut().location_changed =
                                source_entry.times().location_changed;
                        }
                    }
                    changes.extend(self.resolve_entry_conflict(context, uuid));
                }
            }
        }

        let source_children = source
            .group(context.source_group)
            .map(|group| group.groups().to_vec())
            .unwrap_or_default();
        for uuid in source_children {
            let Some(source_child) = source.group(uuid) else {
                continue;
            };
            match self.find_target_group(context, uuid) {
                None => {
                    changes.push(MergeChange::new(
                        ChangeKind::CreateMissing,
                        uuid,
                        source_child.name(),
                    ));
                    let shell = source_child.clone_shell();
                    self.adopt_group(shell, context.target_group);
                    if let Some(group) = self.target.group_mut(uuid) {
                        group.times_mut().location_changed =
                            source_child.times().location_changed;
                    }
                }
                Some(existing) => {
                    let relocated = existing.times().location_changed
                        < source_child.times().location_changed
                        && existing.parent() != Some(context.target_group);
                    if relocated {
                        changes.push(MergeChange::new(
                            ChangeKind::Relocate,
                            uuid,
                            source_child.name(),
                        ));
                        self.relocate_group(uuid, context.target_group);
                        if let Some(group) = self.target.group_mut(uuid) {
                            group.times_mut().location_changed =
                                source_child.times().location_changed;
                        }
                    }
                    changes.extend(self.resolve_group_conflict(uuid));
                }
            }
            let subcontext = context.descend(uuid, uuid);
            changes.extend(self.merge_group(&subcontext));
        }
        changes
    }

    /// Groups resolve under an implicit newer-wins rule: a group's identity
    /// is its UUID, not its content. `location_changed` is handled by the
    /// structural pass.
    fn resolve_group_conflict(&mut self, uuid: Uuid) -> Vec<MergeChange> {
        let source = self.source;
        let mut changes = Vec::new();
        let Some(source_group) = source.group(uuid) else {
            return changes;
        };
        let Some(target_group) = self.target.group(uuid) else {
            return changes;
        };

        if target_group.times().last_modification < source_group.times().last_modification {
            changes.push(MergeChange::new(
                ChangeKind::Overwrite,
                uuid,
                source_group.name(),
            ));
            if let Some(group) = self.target.group_mut(uuid) {
                group.set_name(source_group.name());
                group.set_notes(source_group.notes());
                group.set_icon(source_group.icon());
                group.times_mut().expiry = source_group.times().expiry;
                // Adopting the source's stamp keeps the newer-wins rule
                // convergent: without it the copy would re-fire on every
                // subsequent merge.
                group.times_mut().last_modification =
                    source_group.times().last_modification;
            }
        }
        changes
    }

    fn resolve_entry_conflict(&mut self, context: &MergeContext, uuid: Uuid) -> Vec<MergeChange> {
        let source = self.source;
        let mut changes = Vec::new();
        let Some(source_entry) = source.entry(uuid) else {
            return changes;
        };
        let Some(target_entry) = self.target.entry(uuid) else {
            return changes;
        };

        // Serialized precision: the persistent format stores seconds, so
        // millisecond drift between runtimes must not register as a
        // conflict.
        let time_target = target_entry.times().last_modification.serialized();
        let time_source = source_entry.times().last_modification.serialized();
        let target_title = target_entry.title().to_string();
        let target_parent = target_entry.parent();

        let mode = self
            .forced_mode
            .unwrap_or_else(|| self.target.effective_merge_mode(context.target_group));

        match mode {
            MergeMode::KeepBoth => {
                if time_target > time_source {
                    let cloned = source_entry.clone_with_new_uuid();
                    let clone_uuid = cloned.uuid();
                    changes.push(MergeChange::new(
                        ChangeKind::BackupOlderSource,
                        uuid,
                        source_entry.title(),
                    ));
                    self.adopt_entry(cloned, context.target_group);
                    self.mark_older_entry(clone_uuid);
                } else if time_target < time_source {
                    let cloned = source_entry.clone_with_new_uuid();
                    changes.push(MergeChange::new(
                        ChangeKind::BackupOlderTarget,
                        uuid,
                        target_title,
                    ));
                    self.adopt_entry(cloned, context.target_group);
                    self.mark_older_entry(uuid);
                }
            }

            MergeMode::KeepNewer => {
                if time_target < time_source {
                    tracing::debug!(entry = %target_title, "updating entry from newer source");
                    let cloned = source_entry.clone_with_history();
                    self.erase_entry(uuid);
                    if let Some(parent) = target_parent {
                        self.adopt_entry(cloned, parent);
                    }
                    changes.push(MergeChange::new(
                        ChangeKind::Overwrite,
                        uuid,
                        source_entry.title(),
                    ));
                }
            }

            MergeMode::KeepExisting | MergeMode::Inherit => {}

            MergeMode::Synchronize => {
                let history_max_items = self.target.metadata().history_max_items;
                if time_target < time_source {
                    tracing::debug!(
                        entry = %target_title,
                        "synchronizing with newer source on top"
                    );
                    changes.push(MergeChange::new(
                        ChangeKind::SyncFromNewerSource,
                        uuid,
                        target_title,
                    ));
                    let folded = target_entry.clone_with_history();
                    let cloned = source_entry.clone_with_history();
                    self.erase_entry(uuid);
                    if let Some(parent) = target_parent {
                        self.adopt_entry(cloned, parent);
                    }
                    if let Some(live) = self.target.entry_mut(uuid) {
                        merge_history(&folded, live, history_max_items);
                    }
                } else {
                    tracing::debug!(
                        entry = %target_title,
                        "synchronizing with local entry on top"
                    );
                    let changed = match self.target.entry_mut(uuid) {
                        Some(live) => merge_history(source_entry, live, history_max_items),
                        None => false,
                    };
                    if changed {
                        changes.push(MergeChange::new(
                            ChangeKind::SyncFromOlderSource,
                            uuid,
                            target_title,
                        ));
                    }
                }
            }
        }
        changes
    }

    // ------------------------------------------------------------------
    // Deletion pass
    // ------------------------------------------------------------------

    fn merge_deletions(&mut self) -> Vec<MergeChange> {
        let source = self.source;
        let context = self.context;
        let mut changes = Vec::new();

        // Union both tombstone sets; the same UUID keeps the earlier stamp.
        let mut merged: BTreeMap<Uuid, DeletedObject> = self.target.deleted_objects().clone();
        for object in source.deleted_objects().values() {
            merged
                .entry(object.uuid)
                .and_modify(|existing| *existing = DeletedObject::join(existing, object))
                .or_insert(*object);
        }

        let mut surviving: BTreeMap<Uuid, DeletedObject> = BTreeMap::new();
        let mut entries: Vec<Uuid> = Vec::new();
        let mut groups: VecDeque<Uuid> = VecDeque::new();
        for (&uuid, &object) in &merged {
            if self.find_target_entry(&context, uuid).is_some() {
                entries.push(uuid);
            } else if self.find_target_group(&context, uuid).is_some() {
                groups.push_back(uuid);
            } else {
                surviving.insert(uuid, object);
            }
        }

        for uuid in entries {
            let object = merged[&uuid];
            let Some(entry) = self.target.entry(uuid) else {
                continue;
            };
            if entry.times().last_modification > object.deletion_time {
                // Edited after the tombstone: the entry lives, the
                // tombstone dies.
                continue;
            }
            let kind = if entry.parent().is_some() {
                ChangeKind::DeleteChild
            } else {
                ChangeKind::DeleteOrphan
            };
            changes.push(MergeChange::new(kind, uuid, entry.title()));
            surviving.insert(uuid, object);
            self.erase_entry(uuid);
        }

        // Deepest first: a group is only judged after every queued
        // descendant has been removed or confirmed surviving.
        while let Some(uuid) = groups.pop_front() {
            if groups
                .iter()
                .any(|&other| self.target.is_ancestor(uuid, other))
            {
                groups.push_back(uuid);
                continue;
            }
            if uuid == context.target_root {
                // The root scope itself is never purged.
                continue;
            }
            let object = merged[&uuid];
            let Some(group) = self.target.group(uuid) else {
                continue;
            };
            if group.times().last_modification > object.deletion_time {
                continue;
            }
            if !group.entries().is_empty() || !group.groups().is_empty() {
                // A descendant survived the edit-after-delete test.
                continue;
            }
            let kind = if group.parent().is_some() {
                ChangeKind::DeleteChild
            } else {
                ChangeKind::DeleteOrphan
            };
            changes.push(MergeChange::new(kind, uuid, group.name()));
            surviving.insert(uuid, object);
            self.erase_group(uuid);
        }

        if surviving != *self.target.deleted_objects() {
            changes.push(MergeChange::tombstones_updated());
        }
        self.target.set_deleted_objects(surviving);
        changes
    }

    // ------------------------------------------------------------------
    // Metadata pass
    // ------------------------------------------------------------------

    fn merge_metadata(&mut self) -> Vec<MergeChange> {
        let source = self.source;
        let mut changes = Vec::new();
        for (&uuid, icon) in source.metadata().custom_icons() {
            if !self.target.metadata().contains_custom_icon(uuid) {
                self.target.metadata_mut().add_custom_icon(uuid, icon.clone());
                changes.push(MergeChange::new(ChangeKind::ImportIcon, uuid, ""));
            }
        }
        changes
    }

    // ------------------------------------------------------------------
    // Scoped lookup and structural helpers
    // ------------------------------------------------------------------

    /// Counterpart lookup, bounded by the target root scope.
    fn find_target_entry(&self, context: &MergeContext, uuid: Uuid) -> Option<&Entry> {
        let entry = self.target.entry(uuid)?;
        let parent = entry.parent()?;
        (parent == context.target_root || self.target.is_ancestor(context.target_root, parent))
            .then_some(entry)
    }

    fn find_target_group(&self, context: &MergeContext, uuid: Uuid) -> Option<&Group> {
        let group = self.target.group(uuid)?;
        (uuid == context.target_root || self.target.is_ancestor(context.target_root, uuid))
            .then_some(group)
    }

    /// Attach a clone without letting the attach stamp any `TimeInfo`; the
    /// merger is authoritative about time.
    fn adopt_entry(&mut self, mut entry: Entry, parent: Uuid) {
        let flag = entry.can_update_time_info();
        entry.set_update_time_info(false);
        let uuid = entry.uuid();
        let result = self
            .target
            .suspend_timestamping(&[parent], |db| db.add_entry(entry, parent));
        debug_assert!(result.is_ok(), "adopting a cloned entry cannot collide");
        self.target.set_update_time_info(uuid, flag);
    }

    fn adopt_group(&mut self, mut group: Group, parent: Uuid) {
        let flag = group.can_update_time_info();
        group.set_update_time_info(false);
        let uuid = group.uuid();
        let result = self
            .target
            .suspend_timestamping(&[parent], |db| db.add_group(group, parent));
        debug_assert!(result.is_ok(), "adopting a cloned group cannot collide");
        self.target.set_update_time_info(uuid, flag);
    }

    fn relocate_entry(&mut self, uuid: Uuid, parent: Uuid) {
        let Some(entry) = self.target.entry(uuid) else {
            return;
        };
        let mut frozen = vec![uuid, parent];
        frozen.extend(entry.parent());
        let result = self
            .target
            .suspend_timestamping(&frozen, |db| db.move_entry(uuid, parent));
        debug_assert!(result.is_ok(), "relocation endpoints were just looked up");
    }

    fn relocate_group(&mut self, uuid: Uuid, parent: Uuid) {
        let Some(group) = self.target.group(uuid) else {
            return;
        };
        let mut frozen = vec![uuid, parent];
        frozen.extend(group.parent());
        let result = self
            .target
            .suspend_timestamping(&frozen, |db| db.move_group(uuid, parent));
        debug_assert!(result.is_ok(), "relocation endpoints were just looked up");
    }

    /// Remove an entry without recording a tombstone and without stamping
    /// the parent; the engine owns the tombstone set.
    fn erase_entry(&mut self, uuid: Uuid) {
        let frozen: Vec<Uuid> = self
            .target
            .entry(uuid)
            .and_then(Entry::parent)
            .into_iter()
            .collect();
        let result = self
            .target
            .suspend_timestamping(&frozen, |db| db.remove_entry(uuid));
        debug_assert!(result.is_ok(), "erased entry was just looked up");
    }

    fn erase_group(&mut self, uuid: Uuid) {
        let frozen: Vec<Uuid> = self
            .target
            .group(uuid)
            .and_then(Group::parent)
            .into_iter()
            .collect();
        let result = self
            .target
            .suspend_timestamping(&frozen, |db| db.remove_group(uuid));
        debug_assert!(result.is_ok(), "erased group was just looked up");
    }

    /// Label an entry as the losing side of a KeepBoth conflict.
    fn mark_older_entry(&mut self, uuid: Uuid) {
        let marker = format!(
            "older entry merged from database \"{}\"",
            self.target.metadata().name
        );
        if let Some(entry) = self.target.entry_mut(uuid) {
            entry.set_attribute("merged", marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{set_clock_source_for_tests, ClockSource, Timestamp};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use time::macros::datetime;

    struct SteppingClock {
        now: Mutex<Timestamp>,
    }

    impl SteppingClock {
        fn starting_at(start: Timestamp) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        fn advance_seconds(&self, secs: i64) {
            let mut now = self.now.lock().unwrap();
            *now = now.offset_by(time::Duration::seconds(secs));
        }
    }

    impl ClockSource for SteppingClock {
        fn now(&self) -> Timestamp {
            *self.now.lock().unwrap()
        }
    }

    fn t0() -> Timestamp {
        Timestamp::new(datetime!(2021-07-01 09:00:00 UTC))
    }

    /// Two groups under the root, two entries in the first.
    fn sample_database() -> (Database, Uuid, Uuid, Uuid, Uuid) {
        let mut db = Database::new();
        let root = db.root();
        let group1 = db.add_group(Group::new("group1"), root).unwrap();
        let group2 = db.add_group(Group::new("group2"), root).unwrap();
        let mut entry1 = Entry::new();
        entry1.set_title("entry1");
        let entry1 = db.add_entry(entry1, group1).unwrap();
        let mut entry2 = Entry::new();
        entry2.set_title("entry2");
        let entry2 = db.add_entry(entry2, group1).unwrap();
        (db, group1, group2, entry1, entry2)
    }

    fn clone_database(db: &Database) -> Database {
        let mut cloned = Database::new();
        cloned.metadata_mut().history_max_items = db.metadata().history_max_items;
        let target_root = cloned.root();
        graft_children(db, db.root(), &mut cloned, target_root);
        cloned
    }

    fn graft_children(source: &Database, from: Uuid, target: &mut Database, onto: Uuid) {
        let group = source.group(from).expect("graft source exists");
        for &entry_uuid in group.entries() {
            let mut entry = source.entry(entry_uuid).unwrap().clone_with_history();
            entry.set_update_time_info(false);
            target.suspend_timestamping(&[onto], |db| db.add_entry(entry, onto).unwrap());
            target.set_update_time_info(entry_uuid, true);
        }
        for &child_uuid in group.groups() {
            let mut shell = source.group(child_uuid).unwrap().clone_shell();
            shell.set_update_time_info(false);
            target.suspend_timestamping(&[onto], |db| db.add_group(shell, onto).unwrap());
            target.set_update_time_info(child_uuid, true);
            graft_children(source, child_uuid, target, child_uuid);
        }
    }

    #[test]
    fn subtree_merge_requires_known_groups() {
        let (source, group1, ..) = sample_database();
        let mut target = Database::new();
        let stray = Uuid::new_v4();

        assert_eq!(
            Merger::for_groups(&source, stray, &mut target, group1)
                .err()
                .unwrap(),
            MergeError::SourceGroupNotFound { uuid: stray }
        );
        let target_root = target.root();
        assert_eq!(
            Merger::for_groups(&source, group1, &mut target, stray)
                .err()
                .unwrap(),
            MergeError::TargetGroupNotFound { uuid: stray }
        );
        assert!(Merger::for_groups(&source, group1, &mut target, target_root).is_ok());
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let clock = SteppingClock::starting_at(t0());
        let _guard = set_clock_source_for_tests(clock.clone());

        let (source, ..) = sample_database();
        let mut target = Database::new();
        assert!(Merger::new(&source, &mut target).merge());

        clock.advance_seconds(30);
        assert!(!Merger::new(&source, &mut target).merge());
        assert_eq!(target.entry_count(), source.entry_count());
        assert!(target.deleted_objects().is_empty());
    }

    proptest! {
        // Divergent attribute edits under Synchronize converge: after one
        // merge in each direction both replicas agree, and further merges
        // are no-ops.
        #[test]
        fn prop_synchronize_converges(edits in prop::collection::vec((0u8..2, 0u8..2, 1u16..1000), 0..6)) {
            let clock = SteppingClock::starting_at(t0());
            let _guard = set_clock_source_for_tests(clock.clone());

            let (mut db_a, ..) = sample_database();
            db_a.group_mut(db_a.root()).unwrap().set_merge_mode(MergeMode::Synchronize);
            let mut db_b = clone_database(&db_a);
            db_b.group_mut(db_b.root()).unwrap().set_merge_mode(MergeMode::Synchronize);

            let entry_uuids: Vec<Uuid> = db_a.entries().map(|entry| entry.uuid()).collect();
            for (side, slot, value) in edits {
                clock.advance_seconds(1);
                let db = if side == 0 { &mut db_a } else { &mut db_b };
                let uuid = entry_uuids[slot as usize % entry_uuids.len()];
                db.edit_entry(uuid, |entry| {
                    entry.set_attribute(Entry::NOTES, format!("v{value}"))
                }).unwrap();
            }

            clock.advance_seconds(1);
            Merger::new(&db_a, &mut db_b).merge();
            clock.advance_seconds(1);
            Merger::new(&db_b, &mut db_a).merge();

            for &uuid in &entry_uuids {
                let a = db_a.entry(uuid).unwrap();
                let b = db_b.entry(uuid).unwrap();
                prop_assert_eq!(a.attributes(), b.attributes());
                prop_assert_eq!(a.history().len(), b.history().len());
            }

            clock.advance_seconds(1);
            prop_assert!(!Merger::new(&db_a, &mut db_b).merge());
            clock.advance_seconds(1);
            prop_assert!(!Merger::new(&db_b, &mut db_a).merge());
        }
    }
}
