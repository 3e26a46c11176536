//! Keyed table of user service records.
//!
//! The table itself is not synchronized; the broker keeps it behind its
//! coarse lock next to the client table. Records taken out of the table
//! (replaced or removed) are returned to the caller, which destroys them
//! after releasing that lock.

use super::{RecordRef, ServiceRequest, Staleness, UserServiceRecord};
use aegis_types::ServiceToken;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of [`ServiceRegistry::get_or_create`].
#[derive(Debug)]
pub struct Lookup {
    /// The record now registered under the key.
    pub record: RecordRef,
    /// `true` if `record` was created by this call.
    pub created: bool,
    /// The stale record that was taken out, to be destroyed by the caller.
    pub replaced: Option<(RecordRef, Staleness)>,
}

/// Table of user service records, at most one per key.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    records: HashMap<String, RecordRef>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record registered under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RecordRef> {
        self.records.get(key)
    }

    /// Record carrying `token`.
    #[must_use]
    pub fn find_by_token(&self, token: &ServiceToken) -> Option<&RecordRef> {
        self.records.values().find(|r| r.token() == token)
    }

    /// Returns the record able to serve `request`, creating it if needed.
    ///
    /// A stale record under the same key is taken out and returned in
    /// [`Lookup::replaced`]; the new record gets a fresh token.
    pub fn get_or_create(
        &mut self,
        request: &ServiceRequest,
        artifact_path: impl Into<PathBuf>,
    ) -> Lookup {
        let key = request.key();
        let standalone = request.is_standalone();

        let mut replaced = None;
        let existing = self
            .records
            .get(&key)
            .map(|r| (Arc::clone(r), r.staleness(request.version_code, standalone)));
        match existing {
            Some((record, None)) => {
                return Lookup {
                    record,
                    created: false,
                    replaced: None,
                };
            }
            Some((stale, Some(reason))) => {
                self.records.remove(&key);
                tracing::info!(%key, token = %stale.token(), ?reason, "replacing stale service record");
                replaced = Some((stale, reason));
            }
            None => {}
        }

        let record = Arc::new(UserServiceRecord::new(
            key.clone(),
            request.version_code,
            standalone,
            artifact_path,
        ));
        tracing::info!(%key, token = %record.token(), standalone, "service record created");
        self.records.insert(key, Arc::clone(&record));
        Lookup {
            record,
            created: true,
            replaced,
        }
    }

    /// Takes the record registered under `key` out of the table.
    pub fn remove(&mut self, key: &str) -> Option<RecordRef> {
        self.records.remove(key)
    }

    /// Takes `record` out of the table if it is still the one registered
    /// under its key.
    pub fn remove_record(&mut self, record: &RecordRef) -> bool {
        match self.records.get(record.key()) {
            Some(current) if Arc::ptr_eq(current, record) => {
                self.records.remove(record.key());
                true
            }
            _ => false,
        }
    }

    /// Number of registered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RecordState;
    use crate::testing::FakeHandle;

    const APK: &str = "/data/app/com.example/base.apk";

    fn request() -> ServiceRequest {
        ServiceRequest::new("com.example", "com.example.Svc")
    }

    #[test]
    fn second_lookup_reuses_pending_record() {
        let mut registry = ServiceRegistry::new();
        let first = registry.get_or_create(&request(), APK);
        let second = registry.get_or_create(&request(), APK);

        assert!(first.created);
        assert!(!second.created);
        assert!(Arc::ptr_eq(&first.record, &second.record));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn version_mismatch_replaces_with_new_token() {
        let mut registry = ServiceRegistry::new();
        let old = registry.get_or_create(&request(), APK).record;
        let new = registry.get_or_create(&request().with_version(2), APK);

        assert!(new.created);
        let (stale, reason) = new.replaced.expect("replaced");
        assert!(Arc::ptr_eq(&stale, &old));
        assert_eq!(reason, Staleness::VersionMismatch { old: 1, new: 2 });
        assert_ne!(new.record.token(), old.token());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dead_bound_record_is_replaced() {
        let mut registry = ServiceRegistry::new();
        let old = registry.get_or_create(&request(), APK).record;
        let handle = FakeHandle::new(1);
        assert!(old.bind(handle.clone()));
        handle.kill();

        let lookup = registry.get_or_create(&request(), APK);
        assert!(lookup.created);
        assert!(matches!(lookup.replaced, Some((_, Staleness::DeadService))));
        assert_eq!(lookup.record.state(), RecordState::Created);
    }

    #[test]
    fn find_by_token() {
        let mut registry = ServiceRegistry::new();
        let record = registry.get_or_create(&request(), APK).record;
        let found = registry.find_by_token(record.token()).expect("found");
        assert!(Arc::ptr_eq(found, &record));
        assert!(registry.find_by_token(&ServiceToken::from("nope")).is_none());
    }

    #[test]
    fn remove_record_ignores_replaced_instance() {
        let mut registry = ServiceRegistry::new();
        let old = registry.get_or_create(&request(), APK).record;
        let new = registry.get_or_create(&request().with_version(2), APK).record;

        assert!(!registry.remove_record(&old));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_record(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_by_key() {
        let mut registry = ServiceRegistry::new();
        registry.get_or_create(&request().with_tag("t"), APK);
        assert!(registry.remove("com.example:t").is_some());
        assert!(registry.remove("com.example:t").is_none());
    }
}
