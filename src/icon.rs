//! Layer 2: Icons
//!
//! A group points either at a builtin icon index or at a custom icon in the
//! database icon table; the two are mutually exclusive.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Icon {
    /// Index into the builtin icon set.
    Builtin(u32),
    /// Reference into the database-scoped custom icon table.
    Custom(Uuid),
}

impl Default for Icon {
    fn default() -> Self {
        Icon::Builtin(0)
    }
}

/// Custom icon payload, keyed by UUID at database scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomIcon {
    pub data: Vec<u8>,
}

impl CustomIcon {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}
