//! Applied-edit descriptions.
//!
//! The merger emits one change per applied edit. The list is advisory (UI
//! presentation); nothing in the engine consumes it. Structured kind + uuid
//! + display name, with a human rendering via `Display`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Object existed only in the source and was cloned in.
    CreateMissing,
    /// Counterpart moved under a new parent.
    Relocate,
    /// Counterpart content replaced by the newer source.
    Overwrite,
    /// KeepBoth: the source side was older, a backup copy was added.
    BackupOlderSource,
    /// KeepBoth: the target side was older, a backup copy was added.
    BackupOlderTarget,
    /// Synchronize: source was newer, target history folded into its clone.
    SyncFromNewerSource,
    /// Synchronize: source was older, its history folded into the target.
    SyncFromOlderSource,
    /// Deleted while still attached to a parent.
    DeleteChild,
    /// Deleted while detached.
    DeleteOrphan,
    /// The tombstone set changed.
    DeletedObjectsUpdated,
    /// Custom icon copied from the source.
    ImportIcon,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeChange {
    pub kind: ChangeKind,
    pub uuid: Option<Uuid>,
    pub name: String,
}

impl MergeChange {
    pub fn new(kind: ChangeKind, uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind,
            uuid: Some(uuid),
            name: name.into(),
        }
    }

    pub fn tombstones_updated() -> Self {
        Self {
            kind: ChangeKind::DeletedObjectsUpdated,
            uuid: None,
            name: String::new(),
        }
    }
}

impl fmt::Display for MergeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.uuid.map(|uuid| uuid.simple().to_string());
        let hex = hex.as_deref().unwrap_or("");
        match self.kind {
            ChangeKind::CreateMissing => write!(f, "Creating missing {} [{}]", self.name, hex),
            ChangeKind::Relocate => write!(f, "Relocating {} [{}]", self.name, hex),
            ChangeKind::Overwrite => write!(f, "Overwriting {} [{}]", self.name, hex),
            ChangeKind::BackupOlderSource => {
                write!(f, "Adding backup for older source {} [{}]", self.name, hex)
            }
            ChangeKind::BackupOlderTarget => {
                write!(f, "Adding backup for older target {} [{}]", self.name, hex)
            }
            ChangeKind::SyncFromNewerSource => {
                write!(f, "Synchronizing from newer source {} [{}]", self.name, hex)
            }
            ChangeKind::SyncFromOlderSource => {
                write!(f, "Synchronizing from older source {} [{}]", self.name, hex)
            }
            ChangeKind::DeleteChild => write!(f, "Deleting child {} [{}]", self.name, hex),
            ChangeKind::DeleteOrphan => write!(f, "Deleting orphan {} [{}]", self.name, hex),
            ChangeKind::DeletedObjectsUpdated => write!(f, "Changed deleted objects"),
            ChangeKind::ImportIcon => write!(f, "Adding missing icon {}", hex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_name_and_uuid() {
        let uuid = Uuid::from_bytes([0xab; 16]);
        let change = MergeChange::new(ChangeKind::CreateMissing, uuid, "entry1");
        assert_eq!(
            change.to_string(),
            format!("Creating missing entry1 [{}]", uuid.simple())
        );
        assert_eq!(
            MergeChange::tombstones_updated().to_string(),
            "Changed deleted objects"
        );
    }
}
