//! Abstractions over the IPC transport the broker sits on.
//!
//! The broker never marshals bytes itself. It only needs to:
//!
//! - forward an opaque [`Payload`] to a [`RemoteHandle`],
//! - ping a handle for liveness,
//! - be told when a handle's process dies.
//!
//! Concrete transports implement [`RemoteHandle`]; tests use the fakes in
//! `aegis_runtime::testing`.

use crate::ErrorCode;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque transaction payload.
///
/// The broker treats payloads as bytes. [`Payload::with_interface_token`]
/// is the only structure it ever writes itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Creates an empty payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copies `bytes` into a new payload.
    #[must_use]
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Builds a payload whose only content is the interface descriptor
    /// header (little-endian `u32` length followed by UTF-8 bytes).
    #[must_use]
    pub fn with_interface_token(descriptor: &str) -> Self {
        let len = u32::try_from(descriptor.len()).unwrap_or(u32::MAX);
        let mut bytes = Vec::with_capacity(4 + descriptor.len());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(descriptor.as_bytes());
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Delivery mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallMode {
    /// Wait for the reply.
    #[default]
    Blocking,
    /// Fire and forget; the reply payload is always empty.
    OneWay,
}

/// Transport-assigned identity of a remote endpoint.
///
/// Two handles referring to the same remote object compare equal by id,
/// which is what callback lists use to de-duplicate registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Wraps a raw transport id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw transport id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration returned by [`RemoteHandle::link_to_death`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeathLink(u64);

impl DeathLink {
    /// Wraps a transport-specific registration id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the registration id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Callback invoked once when a watched handle's process dies.
pub type DeathRecipient = Box<dyn Fn() + Send + Sync>;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote process is gone.
    #[error("remote object is dead")]
    DeadObject,

    /// The transaction failed for another reason.
    #[error("transaction failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Creates a generic failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Returns `true` if the failure proves the peer is dead.
    #[must_use]
    pub fn is_dead_object(&self) -> bool {
        matches!(self, Self::DeadObject)
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::DeadObject => "TRANSPORT_DEAD_OBJECT",
            Self::Failed(_) => "TRANSPORT_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Reference to a counterparty endpoint reachable through the transport.
pub trait RemoteHandle: Send + Sync + fmt::Debug {
    /// Transport identity of the endpoint.
    fn id(&self) -> HandleId;

    /// Interface descriptor advertised by the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the endpoint cannot be queried.
    fn descriptor(&self) -> Result<String, TransportError>;

    /// Pings the endpoint. `false` means its process is gone.
    fn is_alive(&self) -> bool;

    /// Sends one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if delivery fails.
    fn transact(
        &self,
        code: u32,
        data: Payload,
        mode: CallMode,
    ) -> Result<Payload, TransportError>;

    /// Registers `recipient` to run when the endpoint's process dies.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DeadObject`] if the endpoint is already dead.
    fn link_to_death(&self, recipient: DeathRecipient) -> Result<DeathLink, TransportError>;

    /// Removes a registration made by [`link_to_death`](Self::link_to_death).
    fn unlink_to_death(&self, link: DeathLink);
}

/// Shared handle to a remote endpoint.
pub type Handle = Arc<dyn RemoteHandle>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_error_codes;

    #[test]
    fn interface_token_layout() {
        let payload = Payload::with_interface_token("svc");
        assert_eq!(payload.as_bytes(), &[3, 0, 0, 0, b's', b'v', b'c']);
    }

    #[test]
    fn copy_from_does_not_alias() {
        let mut source = vec![1u8, 2, 3];
        let payload = Payload::copy_from(&source);
        source[0] = 9;
        assert_eq!(payload.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn empty_payload() {
        assert!(Payload::empty().is_empty());
        assert_eq!(Payload::empty().len(), 0);
    }

    #[test]
    fn transport_error_codes() {
        assert_error_codes(
            &[TransportError::DeadObject, TransportError::failed("x")],
            "TRANSPORT_",
        );
        assert!(TransportError::DeadObject.is_dead_object());
        assert!(!TransportError::DeadObject.is_recoverable());
        assert!(TransportError::failed("busy").is_recoverable());
    }
}
