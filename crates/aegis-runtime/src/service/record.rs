//! One managed user service and its lifecycle.
//!
//! # State Machine
//!
//! ```text
//!             bind(handle)
//!  Created ───────────────► Bound
//!     │                       │
//!     │ destroy()             │ destroy()
//!     ▼                       ▼
//!  Destroyed ◄────────────────┘
//! ```
//!
//! `Destroyed` is terminal. Replacing a record means destroying it and
//! inserting a new one with a fresh token; records are never revived.
//!
//! The record's own lock only guards its state and handle. It is never
//! held while calling out to subscribers or to the service.

use super::CallbackList;
use super::ServiceConnection;
use crate::platform::{ArtifactWatcher, WatchId};
use aegis_types::{CallMode, DeathLink, Handle, Payload, ServiceToken};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transaction code asking a user service to shut itself down.
pub const USER_SERVICE_TRANSACTION_DESTROY: u32 = 16_777_115;

/// Lifecycle state of a [`UserServiceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Registered, waiting for the service handle.
    Created,
    /// Handle attached, subscribers notified.
    Bound,
    /// Removed from the registry.
    Destroyed,
}

/// Why an existing record cannot serve a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Requested version differs.
    VersionMismatch { old: u32, new: u32 },
    /// Requested process mode differs.
    StandaloneMismatch { old: bool, new: bool },
    /// The bound service no longer answers.
    DeadService,
}

#[derive(Debug)]
struct RecordInner {
    state: RecordState,
    service: Option<Handle>,
    death_link: Option<DeathLink>,
    artifact_watch: Option<WatchId>,
}

/// A managed user service.
#[derive(Debug)]
pub struct UserServiceRecord {
    key: String,
    token: ServiceToken,
    version_code: u32,
    standalone: bool,
    artifact_path: PathBuf,
    callbacks: CallbackList,
    inner: Mutex<RecordInner>,
}

impl UserServiceRecord {
    /// Creates a record in [`RecordState::Created`] with a fresh token.
    pub fn new(
        key: impl Into<String>,
        version_code: u32,
        standalone: bool,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            token: ServiceToken::generate(),
            version_code,
            standalone,
            artifact_path: artifact_path.into(),
            callbacks: CallbackList::new(),
            inner: Mutex::new(RecordInner {
                state: RecordState::Created,
                service: None,
                death_link: None,
                artifact_watch: None,
            }),
        }
    }

    /// Registry key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rendezvous token.
    #[must_use]
    pub fn token(&self) -> &ServiceToken {
        &self.token
    }

    /// Service version.
    #[must_use]
    pub fn version_code(&self) -> u32 {
        self.version_code
    }

    /// Whether the service runs in its own process.
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    /// Code artifact of the owning package.
    #[must_use]
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RecordState {
        self.inner.lock().state
    }

    /// Bound service handle, if any.
    #[must_use]
    pub fn service(&self) -> Option<Handle> {
        self.inner.lock().service.clone()
    }

    /// Subscribers of this record.
    #[must_use]
    pub fn callbacks(&self) -> &CallbackList {
        &self.callbacks
    }

    /// Checks whether this record can serve a request.
    ///
    /// A record still waiting for its handle is reusable: its spawn is
    /// already scheduled. A bound record must still be alive.
    #[must_use]
    pub fn staleness(&self, version_code: u32, standalone: bool) -> Option<Staleness> {
        if self.version_code != version_code {
            return Some(Staleness::VersionMismatch {
                old: self.version_code,
                new: version_code,
            });
        }
        if self.standalone != standalone {
            return Some(Staleness::StandaloneMismatch {
                old: self.standalone,
                new: standalone,
            });
        }
        let service = {
            let inner = self.inner.lock();
            match inner.state {
                RecordState::Created => return None,
                RecordState::Destroyed => return Some(Staleness::DeadService),
                RecordState::Bound => inner.service.clone(),
            }
        };
        match service {
            Some(service) if service.is_alive() => None,
            _ => Some(Staleness::DeadService),
        }
    }

    /// Stores the artifact watch. Returns `false` if the record was
    /// destroyed meanwhile; the caller must then release the watch.
    pub(crate) fn set_artifact_watch(&self, id: WatchId) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == RecordState::Destroyed {
            return false;
        }
        inner.artifact_watch = Some(id);
        true
    }

    /// Attaches the service handle.
    ///
    /// Returns `false` if the record is not waiting for one.
    pub(crate) fn bind(&self, service: Handle) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RecordState::Created {
            return false;
        }
        inner.state = RecordState::Bound;
        inner.service = Some(service);
        true
    }

    /// Stores the death link. Returns `false` if the record is no longer
    /// bound; the caller must then unlink.
    pub(crate) fn set_death_link(&self, link: DeathLink) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RecordState::Bound {
            return false;
        }
        inner.death_link = Some(link);
        true
    }

    /// Sends `connected` to `subscribers`, a snapshot taken when the
    /// handle was bound.
    pub fn deliver_connected(&self, subscribers: &[Arc<dyn ServiceConnection>]) -> usize {
        let Some(service) = self.service() else {
            return 0;
        };
        tracing::debug!(key = %self.key, token = %self.token, subscribers = subscribers.len(), "delivering connected");
        self.callbacks
            .deliver_to(subscribers, "connected", |s| s.connected(&service))
    }

    /// Sends `died` to every subscriber.
    pub fn broadcast_dead(&self) -> usize {
        tracing::debug!(key = %self.key, token = %self.token, "broadcasting dead");
        self.callbacks.broadcast("died", |s| s.died())
    }

    /// Sends `connected` to one subscriber if the service is bound.
    pub fn notify_connected(&self, subscriber: &dyn ServiceConnection) {
        if let Some(service) = self.service() {
            if let Err(e) = subscriber.connected(&service) {
                tracing::warn!(key = %self.key, subscriber = %subscriber.id(), "failed to notify subscriber: {e}");
            }
        }
    }

    /// Tears the record down. Idempotent.
    ///
    /// Must be called after the record left the registry and without the
    /// broker lock held.
    pub(crate) fn destroy(&self, artifacts: &dyn ArtifactWatcher) {
        let (service, death_link, artifact_watch, was_bound) = {
            let mut inner = self.inner.lock();
            if inner.state == RecordState::Destroyed {
                return;
            }
            let was_bound = inner.state == RecordState::Bound;
            inner.state = RecordState::Destroyed;
            (
                inner.service.take(),
                inner.death_link.take(),
                inner.artifact_watch.take(),
                was_bound,
            )
        };
        tracing::info!(key = %self.key, token = %self.token, "destroying service record");

        if let (Some(service), Some(link)) = (&service, death_link) {
            service.unlink_to_death(link);
        }
        // Standalone subscribers learn about death from the transport, but
        // only once a handle reached them.
        if !self.standalone || !was_bound {
            self.broadcast_dead();
        }

        if let Some(id) = artifact_watch {
            artifacts.unwatch(id);
        }

        if let Some(service) = service {
            send_destroy(&service);
        }

        self.callbacks.kill();
    }
}

/// Best-effort one-way teardown request. Failures are swallowed.
pub(crate) fn send_destroy(service: &Handle) {
    if !service.is_alive() {
        return;
    }
    let result = service.descriptor().and_then(|descriptor| {
        service.transact(
            USER_SERVICE_TRANSACTION_DESTROY,
            Payload::with_interface_token(&descriptor),
            CallMode::OneWay,
        )
    });
    if let Err(e) = result {
        tracing::debug!(service = %service.id(), "failed to send destroy: {e}");
    }
}

/// Shared record reference.
pub type RecordRef = Arc<UserServiceRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeArtifacts, FakeHandle, RecordingConnection};
    use aegis_types::RemoteHandle;

    fn record(standalone: bool) -> UserServiceRecord {
        UserServiceRecord::new("com.example:svc", 1, standalone, "/data/app/base.apk")
    }

    #[test]
    fn new_record_is_created_with_token() {
        let a = record(false);
        let b = record(false);
        assert_eq!(a.state(), RecordState::Created);
        assert!(a.service().is_none());
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn pending_record_is_reusable() {
        assert_eq!(record(false).staleness(1, false), None);
    }

    #[test]
    fn mismatches_are_stale() {
        let r = record(false);
        assert_eq!(
            r.staleness(2, false),
            Some(Staleness::VersionMismatch { old: 1, new: 2 })
        );
        assert_eq!(
            r.staleness(1, true),
            Some(Staleness::StandaloneMismatch {
                old: false,
                new: true
            })
        );
    }

    #[test]
    fn dead_bound_service_is_stale() {
        let r = record(false);
        let handle = FakeHandle::new(7);
        assert!(r.bind(handle.clone()));
        assert_eq!(r.staleness(1, false), None);

        handle.kill();
        assert_eq!(r.staleness(1, false), Some(Staleness::DeadService));
    }

    #[test]
    fn bind_only_once() {
        let r = record(false);
        assert!(r.bind(FakeHandle::new(1)));
        assert!(!r.bind(FakeHandle::new(2)));
        assert_eq!(r.service().map(|s| s.id().raw()), Some(1));
    }

    #[test]
    fn connected_reaches_snapshot() {
        let r = record(false);
        let subscriber = RecordingConnection::new(10);
        r.callbacks().register(subscriber.clone());
        assert!(r.bind(FakeHandle::new(7)));

        assert_eq!(r.deliver_connected(&r.callbacks().snapshot()), 1);
        assert_eq!(subscriber.last_connected().map(|id| id.raw()), Some(7));

        let late = RecordingConnection::new(11);
        r.notify_connected(late.as_ref());
        assert_eq!(late.connected_count(), 1);
    }

    #[test]
    fn destroy_in_process_record() {
        let artifacts = FakeArtifacts::new();
        let r = record(false);
        assert!(r.set_artifact_watch(WatchId::new(3)));
        let subscriber = RecordingConnection::new(10);
        r.callbacks().register(subscriber.clone());
        let handle = FakeHandle::new(7);
        r.bind(handle.clone());

        r.destroy(artifacts.as_ref());
        r.destroy(artifacts.as_ref());

        assert_eq!(r.state(), RecordState::Destroyed);
        assert_eq!(subscriber.died_count(), 1);
        assert_eq!(artifacts.unwatched(), vec![WatchId::new(3)]);
        assert_eq!(handle.destroy_requests(), 1);
        assert!(r.callbacks().is_killed());
    }

    #[test]
    fn destroy_bound_standalone_record_unlinks_without_dead_broadcast() {
        let artifacts = FakeArtifacts::new();
        let r = record(true);
        let subscriber = RecordingConnection::new(10);
        r.callbacks().register(subscriber.clone());
        let handle = FakeHandle::new(7);
        r.bind(handle.clone());
        let link = handle
            .link_to_death(Box::new(|| {}))
            .expect("link");
        assert!(r.set_death_link(link));

        r.destroy(artifacts.as_ref());

        assert_eq!(subscriber.died_count(), 0);
        assert_eq!(handle.death_links(), 0);
        assert_eq!(handle.destroy_requests(), 1);
    }

    #[test]
    fn destroy_unbound_standalone_record_broadcasts_dead() {
        let artifacts = FakeArtifacts::new();
        let r = record(true);
        let subscriber = RecordingConnection::new(10);
        r.callbacks().register(subscriber.clone());

        r.destroy(artifacts.as_ref());
        assert_eq!(subscriber.died_count(), 1);
        assert!(!r.set_artifact_watch(WatchId::new(4)));
    }

    #[test]
    fn teardown_skipped_for_dead_service() {
        let handle = FakeHandle::new(7);
        handle.kill();
        let service: Handle = handle.clone();
        send_destroy(&service);
        assert_eq!(handle.destroy_requests(), 0);
    }
}
