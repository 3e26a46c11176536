//! Caller identity types.
//!
//! The transport stamps every inbound call with the caller's uid and pid.
//! These values are trusted: they come from the kernel, never from the
//! call payload.
//!
//! A uid encodes both the OS user and the application:
//!
//! ```text
//! uid = user_id * PER_USER_RANGE + app_id
//!
//! 1010123  →  user 10, app 10123
//!   10123  →  user 0,  app 10123
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of uids reserved for each OS user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Kernel-assigned user id of a calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(u32);

impl Uid {
    /// Wraps a raw uid.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds the uid of `app_id` running as `user_id`.
    ///
    /// ```
    /// use aegis_types::{AppId, Uid, UserId};
    ///
    /// let uid = Uid::of(UserId::new(10), AppId::new(10123));
    /// assert_eq!(uid.raw(), 1_010_123);
    /// ```
    #[must_use]
    pub const fn of(user_id: UserId, app_id: AppId) -> Self {
        Self(user_id.0 * PER_USER_RANGE + app_id.0 % PER_USER_RANGE)
    }

    /// Returns the raw numeric uid.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the OS user this uid belongs to.
    #[must_use]
    pub const fn user_id(self) -> UserId {
        UserId(self.0 / PER_USER_RANGE)
    }

    /// Returns the per-user application id.
    #[must_use]
    pub const fn app_id(self) -> AppId {
        AppId(self.0 % PER_USER_RANGE)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel-assigned process id of a calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(u32);

impl Pid {
    /// Wraps a raw pid.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric pid.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS user (profile) number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// The primary user.
    pub const SYSTEM: Self = Self(0);

    /// Wraps a raw user id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric user id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application id, identical for an application across all users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(u32);

impl AppId {
    /// Wraps a raw application id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric application id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trusted identity of the process behind an inbound call.
///
/// # Example
///
/// ```
/// use aegis_types::{CallerIdentity, Pid, Uid};
///
/// let caller = CallerIdentity::new(Uid::new(1_010_123), Pid::new(4242));
/// assert_eq!(caller.user_id().raw(), 10);
/// assert_eq!(caller.app_id().raw(), 10123);
/// assert_eq!(caller.to_string(), "uid=1010123 pid=4242");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Calling uid.
    pub uid: Uid,
    /// Calling pid.
    pub pid: Pid,
}

impl CallerIdentity {
    /// Creates an identity from the transport-provided uid and pid.
    #[must_use]
    pub const fn new(uid: Uid, pid: Pid) -> Self {
        Self { uid, pid }
    }

    /// Returns the caller's OS user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.uid.user_id()
    }

    /// Returns the caller's application id.
    #[must_use]
    pub const fn app_id(&self) -> AppId {
        self.uid.app_id()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid={} pid={}", self.uid, self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_splits_into_user_and_app() {
        let uid = Uid::new(1_010_123);
        assert_eq!(uid.user_id(), UserId::new(10));
        assert_eq!(uid.app_id(), AppId::new(10123));
    }

    #[test]
    fn primary_user_uid() {
        let uid = Uid::new(10123);
        assert_eq!(uid.user_id(), UserId::SYSTEM);
        assert_eq!(uid.app_id().raw(), 10123);
    }

    #[test]
    fn of_roundtrips_components() {
        let uid = Uid::of(UserId::new(3), AppId::new(10050));
        assert_eq!(uid.user_id().raw(), 3);
        assert_eq!(uid.app_id().raw(), 10050);
    }

    #[test]
    fn same_app_different_users_share_app_id() {
        let a = Uid::of(UserId::new(0), AppId::new(10200));
        let b = Uid::of(UserId::new(11), AppId::new(10200));
        assert_ne!(a, b);
        assert_eq!(a.app_id(), b.app_id());
    }

    #[test]
    fn identity_serializes_transparently() {
        let caller = CallerIdentity::new(Uid::new(2000), Pid::new(77));
        let json = serde_json::to_string(&caller).expect("serialize");
        assert_eq!(json, r#"{"uid":2000,"pid":77}"#);
    }
}
