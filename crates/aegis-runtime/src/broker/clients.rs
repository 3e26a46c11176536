//! Client attachment and the permission request protocol.
//!
//! ```text
//! request_permission(code)
//!   ├─ allowed            → result(code, true)
//!   ├─ stored DENIED      → result(code, false)
//!   └─ otherwise          → manager confirmation screen
//!                              │
//!                              ▼
//! dispatch_permission_confirmation_result(uid, pid, code, allowed, one_time)
//!   ├─ every record of uid takes `allowed`
//!   ├─ only the record at pid gets result(code, allowed)
//!   └─ unless one-time: persist flags, grant / revoke platform permission
//! ```

use super::Broker;
use crate::error::BrokerError;
use crate::platform::ConfirmationRequest;
use aegis_auth::{AccessDenied, AttachReply, ClientCallback, ClientRecord, ClientStatus, PermissionFlags};
use aegis_types::{CallerIdentity, Pid, Uid};
use std::sync::Arc;

/// Outcome of the manager's confirmation screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDecision {
    /// Uid of the requesting client.
    pub uid: Uid,
    /// Pid of the requesting client; only this process gets the result.
    pub pid: Pid,
    /// Correlation code of the original request.
    pub request_code: i32,
    /// The user's answer.
    pub allowed: bool,
    /// Applies to the running processes only; nothing is persisted.
    pub one_time: bool,
}

impl Broker {
    /// Registers the calling application.
    ///
    /// `package` must be one of the packages running as the caller's uid.
    /// The manager application gets broker metadata only; any other
    /// application also gets a client record and its permission state.
    /// The reply is delivered through `callback` and returned.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::PackageNotOwned`] if the caller does not own
    /// `package`.
    pub fn attach(
        &self,
        identity: CallerIdentity,
        callback: Arc<dyn ClientCallback>,
        package: &str,
    ) -> Result<AttachReply, BrokerError> {
        let owned = self.platform.packages.packages_for_uid(identity.uid);
        if !owned.iter().any(|p| p == package) {
            tracing::warn!(%identity, package, "attach with a package the caller does not own");
            return Err(AccessDenied::package_not_owned(package, identity).into());
        }

        let is_manager = package == self.config.manager_package;
        let client = if is_manager {
            None
        } else {
            let seed = self.guard.initial_allowed(self.store.as_ref(), identity);
            let allowed = self
                .state
                .lock()
                .clients
                .attach(identity, package, Arc::clone(&callback), seed)
                .allowed;
            Some(ClientStatus {
                allowed,
                should_show_rationale: self.store.flags(identity.uid).is_denied(),
            })
        };

        let reply = AttachReply {
            server_uid: self.identity().uid,
            server_version: self.config.server_version,
            server_security_context: self
                .platform
                .system
                .security_context()
                .inspect_err(|e| tracing::debug!("security context unavailable: {e}"))
                .ok(),
            client,
        };
        tracing::debug!(%identity, package, is_manager, "attach");

        if let Err(e) = callback.bind_application(&reply) {
            tracing::warn!(%identity, "failed to deliver attach reply: {e}");
            if e.is_dead_object() {
                self.state.lock().clients.remove_if_callback(identity, callback.id());
            }
        }
        Ok(reply)
    }

    /// Asks for API access.
    ///
    /// The answer arrives later through the client's callback, tagged with
    /// `request_code`. Calls from the broker itself are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotAttached`] if the caller never attached,
    /// [`BrokerError::PackageNotFound`] if its package is gone, and
    /// [`BrokerError::Platform`] if the confirmation screen cannot start.
    pub fn request_permission(&self, identity: CallerIdentity, request_code: i32) -> Result<(), BrokerError> {
        if self.guard.is_broker(identity) {
            return Ok(());
        }
        let record = self.state.lock().clients.require(identity)?.clone();

        if record.allowed {
            self.deliver_permission_result(&record, request_code, true);
            return Ok(());
        }
        if self.store.flags(identity.uid).is_denied() {
            self.deliver_permission_result(&record, request_code, false);
            return Ok(());
        }

        let package = self
            .platform
            .packages
            .package_info(&record.package_name, identity.user_id())
            .ok_or_else(|| BrokerError::package_not_found(&record.package_name, identity.user_id()))?;
        let request = ConfirmationRequest {
            identity,
            request_code,
            package,
            manager_package: self.manager.name.clone(),
        };
        self.platform
            .activities
            .start_confirmation(&request)
            .map_err(|e| BrokerError::platform("start_confirmation", e))?;
        tracing::info!(%identity, request_code, package = %record.package_name, "permission confirmation requested");
        Ok(())
    }

    /// Whether the caller may use the API right now.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotAttached`] if the caller never attached.
    pub fn check_self_permission(&self, identity: CallerIdentity) -> Result<bool, BrokerError> {
        if self.guard.is_broker(identity) {
            return Ok(true);
        }
        Ok(self.state.lock().clients.require(identity)?.allowed)
    }

    /// Whether the caller should explain itself before asking again,
    /// i.e. the user already denied it permanently.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotAttached`] if the caller never attached.
    pub fn should_show_request_permission_rationale(&self, identity: CallerIdentity) -> Result<bool, BrokerError> {
        if self.guard.is_broker(identity) {
            return Ok(true);
        }
        self.state.lock().clients.require(identity)?;
        Ok(self.store.flags(identity.uid).is_denied())
    }

    /// Applies the user's answer to a permission request. Manager only.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for other callers and
    /// [`BrokerError::Storage`] if the decision cannot be persisted, in
    /// which case no client hears of it.
    pub fn dispatch_permission_confirmation_result(
        &self,
        caller: CallerIdentity,
        decision: PermissionDecision,
    ) -> Result<(), BrokerError> {
        self.guard
            .require_manager(caller, "dispatch_permission_confirmation_result")?;
        tracing::info!(
            uid = %decision.uid,
            pid = %decision.pid,
            request_code = decision.request_code,
            allowed = decision.allowed,
            one_time = decision.one_time,
            "permission decision received"
        );

        // Persist first: a failed write leaves no trace in memory or on the platform.
        if !decision.one_time {
            self.store.update(
                decision.uid,
                PermissionFlags::PERMISSION_MASK,
                PermissionFlags::for_decision(decision.allowed),
            )?;
        }

        let records = self
            .state
            .lock()
            .clients
            .set_allowed_for_uid(decision.uid, decision.allowed);
        if records.is_empty() {
            tracing::warn!(uid = %decision.uid, "no attached client for permission decision");
        }
        for record in records.iter().filter(|r| r.pid == decision.pid) {
            self.deliver_permission_result(record, decision.request_code, decision.allowed);
        }

        if !decision.one_time {
            self.sync_platform_permission(decision.uid, decision.allowed);
        }
        Ok(())
    }

    /// Stored flags of `uid` restricted to `mask`. Manager only.
    ///
    /// With nothing stored, reports `ALLOWED` if a package of `uid`
    /// declares the API permission and the platform grants it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for other callers.
    pub fn flags_for_uid(
        &self,
        caller: CallerIdentity,
        uid: Uid,
        mask: PermissionFlags,
    ) -> Result<PermissionFlags, BrokerError> {
        self.guard.require_manager(caller, "flags_for_uid")?;
        if let Some(entry) = self.store.find(uid) {
            return Ok(entry.flags.intersection(mask));
        }
        let granted = !self.declaring_packages(uid).is_empty() && self.guard.platform_grants(uid, None);
        Ok(if granted {
            PermissionFlags::ALLOWED
        } else {
            PermissionFlags::empty()
        })
    }

    /// Overwrites the `mask` bits of `uid`'s flags. Manager only.
    ///
    /// Touching the permission bits also updates every attached process
    /// of `uid`, force-stops the ones losing access and mirrors the
    /// decision into the platform permission.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for other callers and
    /// [`BrokerError::Storage`] if the flags cannot be persisted, before
    /// anything else changes.
    pub fn update_flags_for_uid(
        &self,
        caller: CallerIdentity,
        uid: Uid,
        mask: PermissionFlags,
        value: PermissionFlags,
    ) -> Result<(), BrokerError> {
        self.guard.require_manager(caller, "update_flags_for_uid")?;
        self.store.update(uid, mask, value)?;

        if mask.intersects(PermissionFlags::PERMISSION_MASK) {
            let allowed = value.contains(PermissionFlags::ALLOWED);
            let records = self.state.lock().clients.set_allowed_for_uid(uid, allowed);
            if !allowed {
                for record in &records {
                    if let Err(e) = self
                        .platform
                        .activities
                        .force_stop_package(&record.package_name, record.uid.user_id())
                    {
                        tracing::warn!(package = %record.package_name, "failed to force-stop client: {e}");
                    }
                }
            }
            self.sync_platform_permission(uid, allowed);
        }
        tracing::info!(%uid, %mask, %value, "flags updated");
        Ok(())
    }

    /// Forgets a client whose process died, along with the processes it
    /// started. Returns `true` if it was attached.
    pub fn client_died(&self, identity: CallerIdentity) -> bool {
        let (removed, orphans) = {
            let mut state = self.state.lock();
            let removed = state.clients.remove(identity).is_some();
            let mut orphans = Vec::new();
            state.processes.retain(|weak| match weak.upgrade() {
                Some(process) if process.caller() == identity => {
                    orphans.push(process);
                    false
                }
                Some(_) => true,
                None => false,
            });
            (removed, orphans)
        };

        for process in &orphans {
            tracing::debug!(%identity, pid = %process.pid(), "destroying process of dead client");
            process.destroy();
        }
        if removed {
            tracing::info!(%identity, processes = orphans.len(), "client died");
        }
        removed
    }

    fn deliver_permission_result(&self, record: &ClientRecord, request_code: i32, allowed: bool) {
        if let Err(e) = record.dispatch_request_permission_result(request_code, allowed) {
            if e.is_dead_object() {
                self.state
                    .lock()
                    .clients
                    .remove_if_callback(record.identity(), record.callback().id());
            }
        }
    }

    /// Packages of `uid` declaring the API permission.
    fn declaring_packages(&self, uid: Uid) -> Vec<String> {
        let permission = self.guard.permission();
        self.platform
            .packages
            .packages_for_uid(uid)
            .into_iter()
            .filter(|name| {
                self.platform
                    .packages
                    .package_info(name, uid.user_id())
                    .is_some_and(|info| info.requests(permission))
            })
            .collect()
    }

    fn sync_platform_permission(&self, uid: Uid, granted: bool) {
        let permission = self.guard.permission();
        let authority = self.guard.authority();
        for package in self.declaring_packages(uid) {
            let result = if granted {
                authority.grant_runtime_permission(&package, permission, uid.user_id())
            } else {
                authority.revoke_runtime_permission(&package, permission, uid.user_id())
            };
            if let Err(e) = result {
                tracing::warn!(%package, granted, "failed to update platform permission: {e}");
            }
        }
    }
}
