//! Forwarding a call to a third-party endpoint under the broker's identity.
//!
//! ```text
//! forward(target, code, payload)
//!   │ copy payload
//!   │ clear_calling_identity() ─── Err ──► log, empty reply
//!   ▼
//!   IdentityGuard ── transact(target) ── Ok / Err
//!   │
//!   └─ drop: restore_calling_identity()   (always, also on failure)
//! ```
//!
//! Nothing escapes the relay: a failed swap or a failed call is logged and
//! answered with an empty, undelivered reply. The ambient identity of the
//! worker thread is restored before [`CallRelay::forward`] returns.
//!
//! Authorization is the broker's job; the relay assumes the caller has
//! already been checked.

use crate::platform::{IdentitySwitch, IdentityToken};
use aegis_types::{CallMode, Handle, Payload};
use std::sync::Arc;

/// Outcome of a relayed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReply {
    /// Reply of the target. Empty if the call was not delivered.
    pub payload: Payload,
    /// `true` if the target accepted the call.
    pub delivered: bool,
}

impl RelayReply {
    fn failed() -> Self {
        Self::default()
    }
}

/// Restores the saved identity when dropped.
struct IdentityGuard<'a> {
    switch: &'a dyn IdentitySwitch,
    token: IdentityToken,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.switch.restore_calling_identity(self.token);
    }
}

/// Identity-switching call forwarder.
#[derive(Clone)]
pub struct CallRelay {
    identity: Arc<dyn IdentitySwitch>,
}

impl std::fmt::Debug for CallRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRelay").finish_non_exhaustive()
    }
}

impl CallRelay {
    /// Creates a relay using `identity` to switch identities.
    pub fn new(identity: Arc<dyn IdentitySwitch>) -> Self {
        Self { identity }
    }

    /// Sends one transaction to `target` as the broker.
    ///
    /// `payload` is copied; the caller's buffer is neither changed nor kept.
    pub fn forward(
        &self,
        target: &Handle,
        code: u32,
        payload: &Payload,
        mode: CallMode,
    ) -> RelayReply {
        let data = Payload::copy_from(payload.as_bytes());

        let token = match self.identity.clear_calling_identity() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(handle = %target.id(), code, "failed to switch identity: {e}");
                return RelayReply::failed();
            }
        };
        let _guard = IdentityGuard {
            switch: self.identity.as_ref(),
            token,
        };

        match target.transact(code, data, mode) {
            Ok(reply) => RelayReply {
                payload: reply,
                delivered: true,
            },
            Err(e) => {
                tracing::warn!(handle = %target.id(), code, "relayed call failed: {e}");
                RelayReply::failed()
            }
        }
    }
}
