//! Client authorization state for the aegis broker.
//!
//! This crate decides who may call the broker's privileged API and
//! remembers the user's decisions.
//!
//! # Authorization Model
//!
//! ```text
//! Granted = Broker ∪ Manager ∪ (Attached ∧ allowed) ∪ (¬Attached ∧ PlatformGrant)
//! ```
//!
//! | Piece | Type | Holds |
//! |-------|------|-------|
//! | [`ClientRegistry`] | Struct | Attached `(uid, pid)` → callback + `allowed` |
//! | [`PermissionStore`] | Trait | Persisted per-uid [`PermissionFlags`] |
//! | [`PermissionAuthority`] | Trait | The platform's own permission record |
//! | [`AuthorizationGuard`] | Struct | The decision function over the three above |
//!
//! # Crate Architecture
//!
//! ```text
//! aegis-types  (Uid, Pid, CallerIdentity, transport)
//!     ↑
//! aegis-auth  ◄── THIS CRATE
//! (PermissionFlags, PermissionStore, ClientRegistry, AuthorizationGuard)
//!     ↑
//! aegis-runtime (Broker facade, platform impls)
//! ```
//!
//! # Design Principles
//!
//! - **Trait definitions here, implementations in consumers**: the runtime
//!   supplies the concrete [`PermissionAuthority`]
//! - **No internal locking in the registry**: the broker owns one coarse lock
//! - **Deny is loud**: every rejection is a typed [`AccessDenied`] plus a `warn` log

pub mod authority;
pub mod client;
pub mod error;
pub mod file_store;
pub mod flags;
pub mod guard;
pub mod store;

pub use authority::PermissionAuthority;
pub use client::{AttachReply, ClientCallback, ClientRecord, ClientRegistry, ClientStatus};
pub use error::{AccessDenied, NotAttached, StoreError};
pub use file_store::{FilePermissionStore, STORE_FORMAT_VERSION};
pub use flags::PermissionFlags;
pub use guard::AuthorizationGuard;
pub use store::{MemoryPermissionStore, PackageEntry, PermissionStore};
