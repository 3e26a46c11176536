//! Attached client bookkeeping.
//!
//! Every non-manager application that calls `attach` gets one
//! [`ClientRecord`], keyed by its `(uid, pid)`. The record carries the
//! client's callback endpoint and the current `allowed` decision, which the
//! [`AuthorizationGuard`](crate::AuthorizationGuard) reads on every call.
//!
//! # Locking
//!
//! [`ClientRegistry`] is a plain table with no synchronization of its own.
//! The broker keeps it behind the same coarse lock as the service table.
//! Callbacks must never be invoked while that lock is held: clone the
//! records out first (they are cheap, the callback is an `Arc`).

use crate::NotAttached;
use aegis_types::{CallerIdentity, HandleId, Pid, TransportError, Uid};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Broker metadata sent back to a client when it attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachReply {
    /// Uid the broker runs as.
    pub server_uid: Uid,
    /// Broker API version.
    pub server_version: u32,
    /// Security context (SELinux label) of the broker process, if known.
    pub server_security_context: Option<String>,
    /// Permission state. Absent for the manager, which is always trusted.
    pub client: Option<ClientStatus>,
}

/// Permission state reported to a non-manager client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientStatus {
    /// Whether the client may call privileged operations.
    pub allowed: bool,
    /// Whether the client should explain itself before asking again.
    pub should_show_rationale: bool,
}

/// Client-side callback endpoint.
pub trait ClientCallback: Send + Sync + fmt::Debug {
    /// Transport identity of the endpoint.
    fn id(&self) -> HandleId;

    /// Delivers the attach reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the client cannot be reached.
    fn bind_application(&self, reply: &AttachReply) -> Result<(), TransportError>;

    /// Delivers the outcome of a permission request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the client cannot be reached.
    fn dispatch_request_permission_result(
        &self,
        request_code: i32,
        allowed: bool,
    ) -> Result<(), TransportError>;
}

/// One attached client process.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Client uid.
    pub uid: Uid,
    /// Client pid.
    pub pid: Pid,
    /// Package the client attached as (verified against its uid).
    pub package_name: String,
    /// Whether privileged calls are allowed.
    pub allowed: bool,
    callback: Arc<dyn ClientCallback>,
}

impl ClientRecord {
    /// Creates a record.
    pub fn new(
        identity: CallerIdentity,
        package_name: impl Into<String>,
        callback: Arc<dyn ClientCallback>,
        allowed: bool,
    ) -> Self {
        Self {
            uid: identity.uid,
            pid: identity.pid,
            package_name: package_name.into(),
            allowed,
            callback,
        }
    }

    /// Returns the record's key.
    #[must_use]
    pub fn identity(&self) -> CallerIdentity {
        CallerIdentity::new(self.uid, self.pid)
    }

    /// Returns the client's callback endpoint.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn ClientCallback> {
        &self.callback
    }

    /// Sends a permission result to the client, logging failures.
    ///
    /// # Errors
    ///
    /// Returns the transport failure so the caller can prune dead clients.
    pub fn dispatch_request_permission_result(
        &self,
        request_code: i32,
        allowed: bool,
    ) -> Result<(), TransportError> {
        self.callback
            .dispatch_request_permission_result(request_code, allowed)
            .inspect_err(|e| {
                tracing::warn!(
                    uid = %self.uid,
                    pid = %self.pid,
                    "failed to dispatch permission result: {e}"
                );
            })
    }
}

/// In-memory table of attached clients keyed by `(uid, pid)`.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use aegis_auth::{AttachReply, ClientCallback, ClientRegistry};
/// # use aegis_types::{CallerIdentity, HandleId, Pid, TransportError, Uid};
/// # #[derive(Debug)]
/// # struct Nop;
/// # impl ClientCallback for Nop {
/// #     fn id(&self) -> HandleId { HandleId::new(1) }
/// #     fn bind_application(&self, _: &AttachReply) -> Result<(), TransportError> { Ok(()) }
/// #     fn dispatch_request_permission_result(&self, _: i32, _: bool) -> Result<(), TransportError> { Ok(()) }
/// # }
/// let mut clients = ClientRegistry::new();
/// let caller = CallerIdentity::new(Uid::new(10123), Pid::new(4242));
///
/// clients.attach(caller, "com.example.app", Arc::new(Nop), false);
/// clients.attach(caller, "com.example.app", Arc::new(Nop), false);
/// assert_eq!(clients.len(), 1);
///
/// assert_eq!(clients.set_allowed_for_uid(caller.uid, true).len(), 1);
/// assert!(clients.require(caller).expect("attached").allowed);
/// ```
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<CallerIdentity, ClientRecord>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client, or refreshes the record of an already attached one.
    ///
    /// A repeated attach from the same `(uid, pid)` replaces the callback
    /// endpoint and package but keeps the current `allowed` decision.
    pub fn attach(
        &mut self,
        identity: CallerIdentity,
        package_name: &str,
        callback: Arc<dyn ClientCallback>,
        allowed: bool,
    ) -> &ClientRecord {
        self.clients
            .entry(identity)
            .and_modify(|existing| {
                tracing::debug!(%identity, "client re-attached");
                existing.package_name = package_name.to_string();
                existing.callback = Arc::clone(&callback);
            })
            .or_insert_with(|| {
                tracing::info!(%identity, package = package_name, allowed, "client attached");
                ClientRecord::new(identity, package_name, Arc::clone(&callback), allowed)
            })
    }

    /// Returns the record for `identity`, if attached.
    #[must_use]
    pub fn find(&self, identity: CallerIdentity) -> Option<&ClientRecord> {
        self.clients.get(&identity)
    }

    /// Returns the record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`NotAttached`] if the caller never attached.
    pub fn require(&self, identity: CallerIdentity) -> Result<&ClientRecord, NotAttached> {
        self.find(identity).ok_or(NotAttached(identity))
    }

    /// Returns every record belonging to `uid`.
    pub fn records_for_uid(&self, uid: Uid) -> impl Iterator<Item = &ClientRecord> + '_ {
        self.clients.values().filter(move |r| r.uid == uid)
    }

    /// Sets `allowed` on every record of `uid` and returns clones of them.
    pub fn set_allowed_for_uid(&mut self, uid: Uid, allowed: bool) -> Vec<ClientRecord> {
        self.clients
            .values_mut()
            .filter(|r| r.uid == uid)
            .map(|r| {
                r.allowed = allowed;
                r.clone()
            })
            .collect()
    }

    /// Removes the record for `identity`.
    pub fn remove(&mut self, identity: CallerIdentity) -> Option<ClientRecord> {
        let removed = self.clients.remove(&identity);
        if removed.is_some() {
            tracing::debug!(%identity, "client removed");
        }
        removed
    }

    /// Removes the record for `identity` only if it still uses `callback`.
    ///
    /// Used when pruning after a failed callback: a client that re-attached
    /// in the meantime must not lose its fresh record.
    pub fn remove_if_callback(
        &mut self,
        identity: CallerIdentity,
        callback: HandleId,
    ) -> Option<ClientRecord> {
        match self.clients.get(&identity) {
            Some(record) if record.callback.id() == callback => self.remove(identity),
            _ => None,
        }
    }

    /// Number of attached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Probe {
        id: HandleId,
        results: Mutex<Vec<(i32, bool)>>,
        dead: bool,
    }

    impl Probe {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: HandleId::new(id),
                results: Mutex::new(Vec::new()),
                dead: false,
            })
        }

        fn dead(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: HandleId::new(id),
                results: Mutex::new(Vec::new()),
                dead: true,
            })
        }
    }

    impl ClientCallback for Probe {
        fn id(&self) -> HandleId {
            self.id
        }

        fn bind_application(&self, _reply: &AttachReply) -> Result<(), TransportError> {
            Ok(())
        }

        fn dispatch_request_permission_result(
            &self,
            request_code: i32,
            allowed: bool,
        ) -> Result<(), TransportError> {
            if self.dead {
                return Err(TransportError::DeadObject);
            }
            self.results.lock().push((request_code, allowed));
            Ok(())
        }
    }

    fn caller(uid: u32, pid: u32) -> CallerIdentity {
        CallerIdentity::new(Uid::new(uid), Pid::new(pid))
    }

    #[test]
    fn attach_twice_keeps_one_record() {
        let mut clients = ClientRegistry::new();
        let id = caller(10123, 1);
        clients.attach(id, "com.example", Probe::new(1), true);
        clients.attach(id, "com.example", Probe::new(2), false);

        assert_eq!(clients.len(), 1);
        let record = clients.find(id).expect("attached");
        assert!(record.allowed, "re-attach must keep the decision");
        assert_eq!(record.callback().id(), HandleId::new(2));
    }

    #[test]
    fn require_unknown_caller_fails() {
        let clients = ClientRegistry::new();
        let err = clients.require(caller(10123, 1)).expect_err("not attached");
        assert_eq!(err, NotAttached(caller(10123, 1)));
    }

    #[test]
    fn set_allowed_touches_every_pid_of_uid() {
        let mut clients = ClientRegistry::new();
        clients.attach(caller(10123, 1), "a", Probe::new(1), false);
        clients.attach(caller(10123, 2), "a", Probe::new(2), false);
        clients.attach(caller(10200, 3), "b", Probe::new(3), false);

        let touched = clients.set_allowed_for_uid(Uid::new(10123), true);
        assert_eq!(touched.len(), 2);
        assert!(clients.records_for_uid(Uid::new(10123)).all(|r| r.allowed));
        assert!(!clients.find(caller(10200, 3)).expect("other").allowed);
    }

    #[test]
    fn remove_if_callback_spares_reattached_client() {
        let mut clients = ClientRegistry::new();
        let id = caller(10123, 1);
        clients.attach(id, "a", Probe::new(1), false);
        clients.attach(id, "a", Probe::new(2), false);

        assert!(clients.remove_if_callback(id, HandleId::new(1)).is_none());
        assert_eq!(clients.len(), 1);
        assert!(clients.remove_if_callback(id, HandleId::new(2)).is_some());
        assert!(clients.is_empty());
    }

    #[test]
    fn dispatch_reports_dead_client() {
        let record = ClientRecord::new(caller(10123, 1), "a", Probe::dead(1), false);
        let err = record
            .dispatch_request_permission_result(7, true)
            .expect_err("dead");
        assert!(err.is_dead_object());
    }

    #[test]
    fn dispatch_reaches_client() {
        let probe = Probe::new(1);
        let record = ClientRecord::new(caller(10123, 1), "a", probe.clone(), false);
        record
            .dispatch_request_permission_result(7, true)
            .expect("delivered");
        assert_eq!(*probe.results.lock(), vec![(7, true)]);
    }
}
