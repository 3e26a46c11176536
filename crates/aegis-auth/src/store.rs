//! Per-uid permission persistence.
//!
//! # Architecture
//!
//! ```text
//! PermissionStore trait (THIS MODULE)   ← abstract definition
//!          │
//!          ├── MemoryPermissionStore (THIS MODULE)  ← tests, ephemeral brokers
//!          └── FilePermissionStore (file_store)     ← JSON on disk
//! ```
//!
//! # Update Semantics
//!
//! [`PermissionStore::update`] replaces only the bits selected by `mask`.
//! An update that leaves the stored flags unchanged is a no-op and never
//! touches the backing medium. Entries whose flags become empty are kept,
//! so a cleared uid still shows up in [`PermissionStore::entries`].

use crate::{PermissionFlags, StoreError};
use aegis_types::Uid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One persisted uid entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Application uid.
    pub uid: Uid,
    /// Recorded decision bits.
    pub flags: PermissionFlags,
}

/// Persistent per-uid permission flags.
pub trait PermissionStore: Send + Sync {
    /// Returns the entry for `uid`, if one was ever written.
    fn find(&self, uid: Uid) -> Option<PackageEntry>;

    /// Replaces the `mask` bits of `uid`'s flags with those of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the change cannot be persisted. The
    /// in-memory view is left unchanged in that case.
    fn update(&self, uid: Uid, mask: PermissionFlags, value: PermissionFlags)
        -> Result<(), StoreError>;

    /// Returns every stored entry, ordered by uid.
    fn entries(&self) -> Vec<PackageEntry>;

    /// Returns the flags of `uid`, empty if nothing is stored.
    fn flags(&self, uid: Uid) -> PermissionFlags {
        self.find(uid)
            .map_or(PermissionFlags::empty(), |entry| entry.flags)
    }
}

/// Computes the result of an update, or `None` if nothing changes.
pub(crate) fn apply_update(
    entries: &BTreeMap<Uid, PermissionFlags>,
    uid: Uid,
    mask: PermissionFlags,
    value: PermissionFlags,
) -> Option<PermissionFlags> {
    let current = entries.get(&uid).copied();
    let next = current
        .unwrap_or(PermissionFlags::empty())
        .apply(mask, value);
    match current {
        Some(existing) if existing == next => None,
        None if next.is_empty() => None,
        _ => Some(next),
    }
}

/// Thread-safe, in-memory permission store.
///
/// # Example
///
/// ```
/// use aegis_auth::{MemoryPermissionStore, PermissionFlags, PermissionStore};
/// use aegis_types::Uid;
///
/// let store = MemoryPermissionStore::new();
/// let uid = Uid::new(10123);
///
/// store
///     .update(uid, PermissionFlags::PERMISSION_MASK, PermissionFlags::ALLOWED)
///     .expect("memory store never fails");
///
/// assert!(store.flags(uid).is_allowed());
/// assert_eq!(store.write_count(), 1);
///
/// // Same value again: no effective change, no write.
/// store
///     .update(uid, PermissionFlags::PERMISSION_MASK, PermissionFlags::ALLOWED)
///     .expect("memory store never fails");
/// assert_eq!(store.write_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    entries: RwLock<BTreeMap<Uid, PermissionFlags>>,
    writes: RwLock<usize>,
}

impl MemoryPermissionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = PackageEntry>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.write();
            for entry in entries {
                map.insert(entry.uid, entry.flags);
            }
        }
        store
    }

    /// Number of updates that actually changed something.
    #[must_use]
    pub fn write_count(&self) -> usize {
        *self.writes.read()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn find(&self, uid: Uid) -> Option<PackageEntry> {
        self.entries
            .read()
            .get(&uid)
            .map(|flags| PackageEntry { uid, flags: *flags })
    }

    fn update(
        &self,
        uid: Uid,
        mask: PermissionFlags,
        value: PermissionFlags,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        if let Some(next) = apply_update(&entries, uid, mask, value) {
            entries.insert(uid, next);
            *self.writes.write() += 1;
            tracing::debug!(%uid, flags = %next, "permission flags updated");
        }
        Ok(())
    }

    fn entries(&self) -> Vec<PackageEntry> {
        self.entries
            .read()
            .iter()
            .map(|(uid, flags)| PackageEntry {
                uid: *uid,
                flags: *flags,
            })
            .collect()
    }
}
