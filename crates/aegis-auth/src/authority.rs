//! Platform permission authority.
//!
//! The host OS keeps its own record of which application holds the broker
//! permission. The broker consults it when a client attaches without a
//! stored decision, and mirrors user decisions back into it.

use aegis_types::{Pid, TransportError, Uid, UserId};

/// Access to the platform's runtime-permission service.
pub trait PermissionAuthority: Send + Sync {
    /// Returns whether `uid` (and `pid`, when known) holds `permission`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the platform cannot be queried.
    fn check_permission(
        &self,
        permission: &str,
        uid: Uid,
        pid: Option<Pid>,
    ) -> Result<bool, TransportError>;

    /// Grants `permission` to `package` for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the platform refuses or is unreachable.
    fn grant_runtime_permission(
        &self,
        package: &str,
        permission: &str,
        user: UserId,
    ) -> Result<(), TransportError>;

    /// Revokes `permission` from `package` for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the platform refuses or is unreachable.
    fn revoke_runtime_permission(
        &self,
        package: &str,
        permission: &str,
        user: UserId,
    ) -> Result<(), TransportError>;
}
