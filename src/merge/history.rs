//! History merge: reconstruct one linear revision timeline from two
//! divergent histories of the same entry.
//!
//! Revisions are keyed by their serialized `last_modification`; two items
//! sharing that key are the same revision (the persistent format cannot
//! tell them apart). The older of the two live tops is materialized as a
//! revision of its own so the fold does not drop it.

use std::collections::BTreeMap;

use crate::entry::{Entry, EntryCompare};
use crate::time::Timestamp;

/// Fold `source_entry`'s history into `target_entry`. Returns true iff the
/// target's history changed. The target's own `TimeInfo` is never touched.
pub(crate) fn merge_history(
    source_entry: &Entry,
    target_entry: &mut Entry,
    history_max_items: Option<usize>,
) -> bool {
    let mut merged: BTreeMap<Timestamp, Entry> = BTreeMap::new();
    for item in target_entry.history() {
        let stamp = item.times().last_modification.serialized();
        debug_assert!(
            merged
                .get(&stamp)
                .map_or(true, |existing| existing.equivalent(item, EntryCompare::RELAXED)),
            "history items sharing a serialized timestamp must be equivalent"
        );
        merged.insert(stamp, item.clone_shallow());
    }
    for item in source_entry.history() {
        // Items with the same serialized modification time are the same
        // revision.
        let stamp = item.times().last_modification.serialized();
        debug_assert!(
            merged
                .get(&stamp)
                .map_or(true, |existing| existing.equivalent(item, EntryCompare::RELAXED)),
            "history items sharing a serialized timestamp must be equivalent"
        );
        merged
            .entry(stamp)
            .or_insert_with(|| item.clone_shallow());
    }

    let target_time = target_entry.times().last_modification.serialized();
    let source_time = source_entry.times().last_modification.serialized();
    debug_assert!(
        target_time != source_time
            || target_entry.equivalent(source_entry, EntryCompare::CONTENT_ONLY),
        "entries sharing a serialized modification time must be equivalent"
    );
    if target_time < source_time && !merged.contains_key(&target_time) {
        merged.insert(target_time, target_entry.clone_shallow());
    } else if target_time > source_time && !merged.contains_key(&source_time) {
        merged.insert(source_time, source_entry.clone_shallow());
    }

    if !history_changed(target_entry.history(), &merged, history_max_items) {
        return false;
    }

    // Every mutation below runs with the entry's times frozen: folding
    // history must not register as an edit.
    let saved_times = *target_entry.times();
    let saved_flag = target_entry.can_update_time_info();
    target_entry.set_update_time_info(false);
    target_entry.replace_history(merged.into_values().collect());
    target_entry.truncate_history(history_max_items);
    target_entry.set_update_time_info(saved_flag);
    debug_assert_eq!(
        saved_times,
        *target_entry.times(),
        "history merge must not touch the live entry's times"
    );
    tracing::debug!(
        entry = %target_entry.title(),
        items = target_entry.history().len(),
        "replaced entry history with merged timeline"
    );
    true
}

/// Tail-aligned comparison of the current history against the merged
/// timeline, newest first, up to the history cap.
fn history_changed(
    current: &[Entry],
    merged: &BTreeMap<Timestamp, Entry>,
    history_max_items: Option<usize>,
) -> bool {
    let updated: Vec<&Entry> = merged.values().collect();
    let limit = history_max_items.unwrap_or_else(|| current.len().max(updated.len()));
    for offset in 1..=limit {
        let old = current.len().checked_sub(offset).map(|i| &current[i]);
        let new = updated.len().checked_sub(offset).map(|i| updated[i]);
        match (old, new) {
            (None, None) => break,
            (Some(old), Some(new)) if old.equivalent(new, EntryCompare::RELAXED) => {}
            _ => return true,
        }
    }
    false
}
