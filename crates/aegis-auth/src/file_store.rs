//! JSON-file permission store.
//!
//! The whole table lives in one small document:
//!
//! ```text
//! <state_dir>/permissions.json
//! {
//!   "version": 1,
//!   "packages": [
//!     { "uid": 10123, "flags": 2 },
//!     { "uid": 10200, "flags": 4 }
//!   ]
//! }
//! ```
//!
//! Writes are atomic: the document is written to `.permissions.json.tmp`
//! next to the target and renamed over it.

use crate::store::apply_update;
use crate::{PackageEntry, PermissionFlags, PermissionStore, StoreError};
use aegis_types::Uid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Document format version written by this store.
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    packages: Vec<PackageEntry>,
}

/// File-backed [`PermissionStore`].
///
/// The file is read once at [`open`](Self::open); afterwards the in-memory
/// table is authoritative and every effective change is written through.
///
/// # Example
///
/// ```no_run
/// use aegis_auth::{FilePermissionStore, PermissionFlags, PermissionStore};
/// use aegis_types::Uid;
///
/// # fn example() -> Result<(), aegis_auth::StoreError> {
/// let store = FilePermissionStore::open("/data/local/tmp/aegis/permissions.json")?;
/// store.update(Uid::new(10123), PermissionFlags::PERMISSION_MASK, PermissionFlags::ALLOWED)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FilePermissionStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<Uid, PermissionFlags>>,
}

impl FilePermissionStore {
    /// Opens the store at `path`, loading existing entries.
    ///
    /// The parent directory is created if needed. A missing file is an
    /// empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created, the file
    /// cannot be read or parsed, or it was written by a newer format.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| StoreError::directory_creation(parent, e))?;
            }
        }

        let entries = if path.exists() {
            load(&path)?
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "permission store opened");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "permissions.json".into(), |n| n.to_string_lossy());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn persist(&self, entries: &BTreeMap<Uid, PermissionFlags>) -> Result<(), StoreError> {
        let document = StoreDocument {
            version: STORE_FORMAT_VERSION,
            packages: entries
                .iter()
                .map(|(uid, flags)| PackageEntry {
                    uid: *uid,
                    flags: *flags,
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let temp_path = self.temp_path();

        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<BTreeMap<Uid, PermissionFlags>, StoreError> {
    let json = fs::read_to_string(path)?;
    let document: StoreDocument = serde_json::from_str(&json)?;
    if document.version > STORE_FORMAT_VERSION {
        return Err(StoreError::VersionIncompatible {
            file_version: document.version,
            supported_version: STORE_FORMAT_VERSION,
        });
    }
    Ok(document
        .packages
        .into_iter()
        .map(|entry| (entry.uid, entry.flags))
        .collect())
}

impl PermissionStore for FilePermissionStore {
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
        let Some(next) = apply_update(&entries, uid, mask, value) else {
            return Ok(());
        };

        let mut staged = entries.clone();
        staged.insert(uid, next);
        if let Err(e) = self.persist(&staged) {
            tracing::error!(%uid, path = %self.path.display(), "failed to persist permission flags: {e}");
            return Err(e);
        }
        *entries = staged;
        tracing::debug!(%uid, flags = %next, "permission flags persisted");
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FilePermissionStore {
        FilePermissionStore::open(dir.path().join("state").join("permissions.json"))
            .expect("open store")
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        assert!(store.path().parent().expect("parent").exists());
        assert!(!store.path().exists());
        assert!(store.entries().is_empty());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = TempDir::new().expect("tempdir");
        let uid = Uid::new(10123);
        {
            let store = store_in(&dir);
            store
                .update(uid, PermissionFlags::PERMISSION_MASK, PermissionFlags::ALLOWED)
                .expect("update");
        }

        let reopened = store_in(&dir);
        assert_eq!(reopened.flags(uid), PermissionFlags::ALLOWED);
    }

    #[test]
    fn document_layout() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store
            .update(
                Uid::new(10200),
                PermissionFlags::PERMISSION_MASK,
                PermissionFlags::DENIED,
            )
            .expect("update");

        let raw = fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["version"], 1);
        assert_eq!(value["packages"][0]["uid"], 10200);
        assert_eq!(value["packages"][0]["flags"], 4);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store
            .update(
                Uid::new(10123),
                PermissionFlags::PERMISSION_MASK,
                PermissionFlags::ALLOWED,
            )
            .expect("update");

        let parent = store.path().parent().expect("parent");
        let names: Vec<String> = fs::read_dir(parent)
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["permissions.json".to_string()]);
    }

    #[test]
    fn unchanged_update_does_not_create_file() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store
            .update(
                Uid::new(10123),
                PermissionFlags::PERMISSION_MASK,
                PermissionFlags::empty(),
            )
            .expect("update");
        assert!(!store.path().exists());
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("permissions.json");
        fs::write(&path, r#"{"version":99,"packages":[]}"#).expect("write");

        let err = FilePermissionStore::open(&path).expect_err("should reject");
        assert!(matches!(
            err,
            StoreError::VersionIncompatible {
                file_version: 99,
                ..
            }
        ));
    }

    #[test]
    fn corrupt_file_is_serialization_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("permissions.json");
        fs::write(&path, "not json").expect("write");

        let err = FilePermissionStore::open(&path).expect_err("should reject");
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
