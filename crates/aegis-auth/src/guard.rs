//! The authorization decision applied to every privileged call.
//!
//! # Decision Table
//!
//! | Caller | Client record | Decision |
//! |--------|---------------|----------|
//! | broker itself (uid or pid) | any | granted |
//! | manager application | any | granted |
//! | other | present, `allowed` | granted |
//! | other | present, not `allowed` | denied |
//! | other | absent | platform permission check |
//!
//! The last row covers clients that call before attaching. A record, once
//! present, always wins over the platform: a user's explicit "deny" is not
//! overridden by a stale platform grant.
//!
//! Every denial is logged at `warn` and returned as [`AccessDenied`].

use crate::{AccessDenied, ClientRegistry, PermissionAuthority, PermissionStore};
use aegis_types::{AppId, CallerIdentity, Pid, Uid};
use std::sync::Arc;

/// Applies the broker's authorization rules.
pub struct AuthorizationGuard {
    broker: CallerIdentity,
    manager_app_id: AppId,
    permission: String,
    authority: Arc<dyn PermissionAuthority>,
}

impl std::fmt::Debug for AuthorizationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGuard")
            .field("broker", &self.broker)
            .field("manager_app_id", &self.manager_app_id)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

impl AuthorizationGuard {
    /// Creates a guard.
    ///
    /// `broker` is the broker's own identity, `manager_app_id` the app id of
    /// the trusted manager application and `permission` the platform
    /// permission name that grants API access.
    pub fn new(
        broker: CallerIdentity,
        manager_app_id: AppId,
        permission: impl Into<String>,
        authority: Arc<dyn PermissionAuthority>,
    ) -> Self {
        Self {
            broker,
            manager_app_id,
            permission: permission.into(),
            authority,
        }
    }

    /// The broker's own identity.
    #[must_use]
    pub fn broker(&self) -> CallerIdentity {
        self.broker
    }

    /// The platform permission guarding the API.
    #[must_use]
    pub fn permission(&self) -> &str {
        &self.permission
    }

    /// The platform authority this guard consults.
    #[must_use]
    pub fn authority(&self) -> &Arc<dyn PermissionAuthority> {
        &self.authority
    }

    /// Returns `true` if the call comes from the broker's uid or process.
    #[must_use]
    pub fn is_broker(&self, identity: CallerIdentity) -> bool {
        identity.uid == self.broker.uid || identity.pid == self.broker.pid
    }

    /// Returns `true` if the call comes from the manager, in any user.
    #[must_use]
    pub fn is_manager(&self, identity: CallerIdentity) -> bool {
        identity.app_id() == self.manager_app_id
    }

    /// Grants or denies a privileged operation.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotPermitted`] per the decision table above.
    pub fn authorize(
        &self,
        clients: &ClientRegistry,
        identity: CallerIdentity,
        operation: &str,
    ) -> Result<(), AccessDenied> {
        self.authorize_with(identity, clients.find(identity).map(|r| r.allowed), operation)
    }

    /// Same as [`authorize`](Self::authorize), given the caller's record
    /// state instead of the registry.
    ///
    /// `record_allowed` is `None` if the caller has no client record. Lets
    /// the caller drop its registry lock before the platform is consulted.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotPermitted`] per the decision table above.
    pub fn authorize_with(
        &self,
        identity: CallerIdentity,
        record_allowed: Option<bool>,
        operation: &str,
    ) -> Result<(), AccessDenied> {
        if self.is_broker(identity) || self.is_manager(identity) {
            return Ok(());
        }

        let granted = match record_allowed {
            Some(allowed) => allowed,
            None => self.platform_grants(identity.uid, Some(identity.pid)),
        };
        if granted {
            tracing::trace!(%identity, operation, "authorized");
            return Ok(());
        }

        tracing::warn!(%identity, operation, "permission denied");
        Err(AccessDenied::not_permitted(operation, identity))
    }

    /// Admits only the manager application.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for any other caller.
    pub fn require_manager(
        &self,
        identity: CallerIdentity,
        operation: &str,
    ) -> Result<(), AccessDenied> {
        if self.is_manager(identity) {
            return Ok(());
        }
        tracing::warn!(%identity, operation, "manager-only operation refused");
        Err(AccessDenied::not_manager(operation, identity))
    }

    /// Admits the manager application or code running inside the broker process.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for any other caller.
    pub fn require_manager_or_self(
        &self,
        identity: CallerIdentity,
        operation: &str,
    ) -> Result<(), AccessDenied> {
        if identity.pid == self.broker.pid {
            return Ok(());
        }
        self.require_manager(identity, operation)
    }

    /// Asks the platform whether `uid` holds the API permission.
    ///
    /// A platform failure counts as "not granted".
    #[must_use]
    pub fn platform_grants(&self, uid: Uid, pid: Option<Pid>) -> bool {
        match self.authority.check_permission(&self.permission, uid, pid) {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(%uid, "platform permission check failed: {e}");
                false
            }
        }
    }

    /// Computes the initial `allowed` value for a newly attaching client.
    ///
    /// A stored decision wins; with none, the platform decides.
    #[must_use]
    pub fn initial_allowed(&self, store: &dyn PermissionStore, identity: CallerIdentity) -> bool {
        let flags = store.flags(identity.uid);
        if flags.is_allowed() {
            return true;
        }
        if flags.is_denied() {
            return false;
        }
        self.platform_grants(identity.uid, Some(identity.pid))
    }
}
