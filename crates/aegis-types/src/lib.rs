//! Core types for the aegis privileged broker.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  aegis-types    : Identity, ServiceToken, transport, ErrorCode  ◄── HERE
//! ├─────────────────────────────────────────────────────────────┤
//! │  aegis-auth     : PermissionFlags, PermissionStore,         │
//! │                   ClientRegistry, AuthorizationGuard        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  aegis-runtime  : Broker facade, ServiceRegistry,           │
//! │                   CallRelay, spawn worker, config           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate holds state. It exists so that the auth layer and
//! the runtime agree on what a caller, a token and a remote handle are.

pub mod error;
pub mod identity;
pub mod token;
pub mod transport;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use identity::{AppId, CallerIdentity, Pid, Uid, UserId, PER_USER_RANGE};
pub use token::ServiceToken;
pub use transport::{
    CallMode, DeathLink, DeathRecipient, Handle, HandleId, Payload, RemoteHandle, TransportError,
};
