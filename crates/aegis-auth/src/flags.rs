//! Persisted per-uid permission flags.
//!
//! The broker remembers the user's answer to a permission prompt as a small
//! bitmask keyed by uid:
//!
//! | Flag | Meaning |
//! |------|---------|
//! | [`ALLOWED`](PermissionFlags::ALLOWED) | The user granted access permanently |
//! | [`DENIED`](PermissionFlags::DENIED) | The user refused permanently; requests short-circuit to failure |
//!
//! The two are mutually exclusive in steady state. Both can be cleared,
//! which returns the uid to the "ask again" state.
//!
//! # Example
//!
//! ```
//! use aegis_auth::PermissionFlags;
//!
//! let stored = PermissionFlags::DENIED;
//! let updated = stored.apply(PermissionFlags::PERMISSION_MASK, PermissionFlags::ALLOWED);
//! assert_eq!(updated, PermissionFlags::ALLOWED);
//! assert!(updated.is_allowed());
//! assert!(!updated.is_denied());
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-uid decision bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PermissionFlags: u32 {
        /// Permanently allowed.
        const ALLOWED = 1 << 1;
        /// Permanently denied.
        const DENIED  = 1 << 2;
    }
}

impl PermissionFlags {
    /// Mask covering every permission decision bit.
    pub const PERMISSION_MASK: Self = Self::ALLOWED.union(Self::DENIED);

    /// Returns the flags a decision should be stored as.
    #[must_use]
    pub fn for_decision(allowed: bool) -> Self {
        if allowed {
            Self::ALLOWED
        } else {
            Self::DENIED
        }
    }

    /// Replaces the bits selected by `mask` with the same bits of `value`.
    ///
    /// Bits outside `mask` are preserved; bits of `value` outside `mask`
    /// are ignored.
    #[must_use]
    pub fn apply(self, mask: Self, value: Self) -> Self {
        (self - mask) | (value & mask)
    }

    /// Returns `true` if a permanent grant is recorded.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        self.contains(Self::ALLOWED)
    }

    /// Returns `true` if a permanent denial is recorded.
    #[must_use]
    pub fn is_denied(self) -> bool {
        self.contains(Self::DENIED)
    }
}

impl std::fmt::Display for PermissionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.is_allowed() {
            names.push("ALLOWED");
        }
        if self.is_denied() {
            names.push("DENIED");
        }
        if names.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}
