//! The five-way pairing that drives recursion: the two databases are held by
//! the merger; the context tracks the root scopes (the lookup boundary for
//! counterparts) and the group pair currently being reconciled.

use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
pub(crate) struct MergeContext {
    pub source_root: Uuid,
    pub target_root: Uuid,
    pub source_group: Uuid,
    pub target_group: Uuid,
}

impl MergeContext {
    /// Child context: same root pair, new current pair.
    pub fn descend(&self, source_group: Uuid, target_group: Uuid) -> Self {
        Self {
            source_group,
            target_group,
            ..*self
        }
    }
}
