//! Layer 2: Database metadata
//!
//! The slice of metadata the merge engine reads: the database name (used to
//! label backup copies), the history cap, and the custom icon table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::icon::CustomIcon;

pub const DEFAULT_HISTORY_MAX_ITEMS: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    /// Cap on archived revisions per entry. `None` means unbounded.
    pub history_max_items: Option<usize>,
    custom_icons: BTreeMap<Uuid, CustomIcon>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history_max_items: Some(DEFAULT_HISTORY_MAX_ITEMS),
            custom_icons: BTreeMap::new(),
        }
    }

    pub fn custom_icon(&self, uuid: Uuid) -> Option<&CustomIcon> {
        self.custom_icons.get(&uuid)
    }

    pub fn contains_custom_icon(&self, uuid: Uuid) -> bool {
        self.custom_icons.contains_key(&uuid)
    }

    pub fn add_custom_icon(&mut self, uuid: Uuid, icon: CustomIcon) {
        self.custom_icons.insert(uuid, icon);
    }

    pub fn custom_icons(&self) -> impl Iterator<Item = (&Uuid, &CustomIcon)> {
        self.custom_icons.iter()
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new("")
    }
}
