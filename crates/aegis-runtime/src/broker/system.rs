//! Privileged operations executed by the broker on a client's behalf.

use super::{Broker, ShutdownRequest};
use crate::error::BrokerError;
use crate::platform::{HostedProcess, ProcessSpec};
use crate::relay::RelayReply;
use aegis_types::{CallMode, CallerIdentity, Handle, HandleId, Payload, Pid, Uid};
use std::sync::Arc;

/// A process started through [`Broker::new_process`].
#[derive(Debug)]
pub struct RemoteProcess {
    caller: CallerIdentity,
    owner: Option<HandleId>,
    process: Box<dyn HostedProcess>,
}

impl RemoteProcess {
    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    /// Identity that started the process.
    #[must_use]
    pub fn caller(&self) -> CallerIdentity {
        self.caller
    }

    /// Callback endpoint of the starting client, if it was attached.
    #[must_use]
    pub fn owner(&self) -> Option<HandleId> {
        self.owner
    }

    /// Exit code if the process finished.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Platform`] if the status cannot be read.
    pub fn exit_code(&self) -> Result<Option<i32>, BrokerError> {
        self.process
            .try_exit_code()
            .map_err(|e| BrokerError::platform("exit_code", e))
    }

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Platform`] if waiting fails.
    pub fn wait(&self) -> Result<i32, BrokerError> {
        self.process.wait().map_err(|e| BrokerError::platform("wait", e))
    }

    /// Returns `true` until the process exits.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self.process.try_exit_code(), Ok(None))
    }

    /// Kills the process.
    pub fn destroy(&self) {
        self.process.destroy();
    }
}

impl Broker {
    /// API version of the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not authorized.
    pub fn version(&self, identity: CallerIdentity) -> Result<u32, BrokerError> {
        self.authorize(identity, "version")?;
        Ok(self.config.server_version)
    }

    /// Uid the broker runs as.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not authorized.
    pub fn uid(&self, identity: CallerIdentity) -> Result<Uid, BrokerError> {
        self.authorize(identity, "uid")?;
        Ok(self.identity().uid)
    }

    /// Whether the broker's own uid holds the platform permission `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized and [`BrokerError::Platform`] if the check fails.
    pub fn check_broker_permission(&self, identity: CallerIdentity, name: &str) -> Result<bool, BrokerError> {
        self.authorize(identity, "check_permission")?;
        self.guard
            .authority()
            .check_permission(name, self.identity().uid, None)
            .map_err(|e| BrokerError::platform("check_permission", e))
    }

    /// Starts a process with the broker's privileges.
    ///
    /// The process is tracked until it is dropped and destroyed when the
    /// calling client dies.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized and [`BrokerError::Platform`] if the process cannot start.
    pub fn new_process(&self, identity: CallerIdentity, spec: &ProcessSpec) -> Result<Arc<RemoteProcess>, BrokerError> {
        self.authorize(identity, "new_process")?;
        tracing::debug!(%identity, argv = ?spec.argv, env = ?spec.env, dir = ?spec.dir, "new_process");

        let process = self
            .platform
            .host
            .new_process(spec)
            .map_err(|e| BrokerError::platform("new_process", e))?;

        let mut state = self.state.lock();
        let process = Arc::new(RemoteProcess {
            caller: identity,
            owner: state.clients.find(identity).map(|r| r.callback().id()),
            process,
        });
        state.processes.retain(|weak| weak.strong_count() > 0);
        state.processes.push(Arc::downgrade(&process));
        Ok(process)
    }

    /// Reads a system property, `default` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized and [`BrokerError::Platform`] if the read fails.
    pub fn system_property(&self, identity: CallerIdentity, name: &str, default: &str) -> Result<String, BrokerError> {
        self.authorize(identity, "system_property")?;
        let value = self
            .platform
            .system
            .property(name)
            .map_err(|e| BrokerError::platform("system_property", e))?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    /// Writes a system property.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized and [`BrokerError::Platform`] if the write is refused.
    pub fn set_system_property(&self, identity: CallerIdentity, name: &str, value: &str) -> Result<(), BrokerError> {
        self.authorize(identity, "set_system_property")?;
        self.platform
            .system
            .set_property(name, value)
            .map_err(|e| BrokerError::platform("set_system_property", e))
    }

    /// Security context of the broker process.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized and [`BrokerError::Platform`] if the label is unreadable.
    pub fn security_context(&self, identity: CallerIdentity) -> Result<String, BrokerError> {
        self.authorize(identity, "security_context")?;
        self.platform
            .system
            .security_context()
            .map_err(|e| BrokerError::platform("security_context", e))
    }

    /// Forwards one transaction to `target` under the broker's identity.
    ///
    /// Transport failures are not errors; they produce an undelivered,
    /// empty [`RelayReply`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not authorized.
    pub fn relay(
        &self,
        identity: CallerIdentity,
        target: &Handle,
        code: u32,
        payload: &Payload,
        mode: CallMode,
    ) -> Result<RelayReply, BrokerError> {
        self.authorize(identity, "relay")?;
        tracing::trace!(%identity, handle = %target.id(), code, len = payload.len(), "relay");
        Ok(self.relay.forward(target, code, payload, mode))
    }

    /// Asks the embedding process to stop the broker. Manager or the
    /// broker process only.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`](aegis_auth::AccessDenied::NotManager)
    /// for other callers.
    pub fn exit(&self, identity: CallerIdentity) -> Result<(), BrokerError> {
        self.guard.require_manager_or_self(identity, "exit")?;
        tracing::info!(%identity, "exit requested");
        self.request_shutdown(ShutdownRequest::exit());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::testing::{package, FakeHandle, FakePlatform, ManualExecutor, RecordingClient};
    use aegis_auth::MemoryPermissionStore;

    const BROKER: CallerIdentity = CallerIdentity::new(Uid::new(2000), Pid::new(100));
    const MANAGER: CallerIdentity = CallerIdentity::new(Uid::new(10050), Pid::new(500));
    const CLIENT: CallerIdentity = CallerIdentity::new(Uid::new(10123), Pid::new(4242));

    fn start() -> (FakePlatform, Arc<Broker>) {
        let fakes = FakePlatform::new(BROKER);
        fakes.packages.install(package("dev.aegis.manager", MANAGER.uid));
        fakes.packages.install(package("com.example", CLIENT.uid));
        let broker = Broker::start(
            BrokerConfig::default(),
            fakes.platform(),
            Arc::new(MemoryPermissionStore::new()),
            ManualExecutor::new(),
        )
        .expect("start");
        (fakes, broker)
    }

    #[test]
    fn metadata_requires_authorization() {
        let (fakes, broker) = start();
        assert_eq!(broker.version(MANAGER).expect("manager"), 13);
        assert_eq!(broker.uid(BROKER).expect("self"), BROKER.uid);

        let err = broker.version(CLIENT).expect_err("denied");
        assert!(err.is_security());

        // Not attached yet: the platform grant decides.
        fakes.permissions.grant(CLIENT.uid);
        assert_eq!(broker.version(CLIENT).expect("granted"), 13);
    }

    #[test]
    fn attached_record_overrides_platform_grant() {
        let (fakes, broker) = start();
        broker
            .attach(CLIENT, RecordingClient::new(1), "com.example")
            .expect("attach");
        fakes.permissions.grant(CLIENT.uid);
        assert!(broker.uid(CLIENT).is_err());
    }

    #[test]
    fn new_process_records_owner() {
        let (fakes, broker) = start();
        broker
            .attach(MANAGER, RecordingClient::new(1), "dev.aegis.manager")
            .expect("attach");
        let process = broker
            .new_process(MANAGER, &ProcessSpec::new(["id"]))
            .expect("process");

        assert_eq!(process.caller(), MANAGER);
        assert_eq!(process.owner(), None);
        assert!(process.is_alive());
        assert_eq!(fakes.host.processes().len(), 1);

        process.destroy();
        assert!(!process.is_alive());
        assert_eq!(process.exit_code().expect("status"), Some(-9));
    }

    #[test]
    fn new_process_failure_is_platform_error() {
        let (_fakes, broker) = start();
        let err = broker
            .new_process(MANAGER, &ProcessSpec::default())
            .expect_err("empty argv");
        assert!(matches!(err, BrokerError::Platform { operation: "new_process", .. }));
    }

    #[test]
    fn properties_pass_through() {
        let (fakes, broker) = start();
        assert_eq!(
            broker
                .system_property(MANAGER, "debug.aegis", "fallback")
                .expect("read"),
            "fallback"
        );
        broker
            .set_system_property(MANAGER, "debug.aegis", "1")
            .expect("write");
        assert_eq!(fakes.system.get("debug.aegis").as_deref(), Some("1"));
        assert_eq!(
            broker.system_property(MANAGER, "debug.aegis", "fallback").expect("read"),
            "1"
        );

        broker.set_system_property(MANAGER, "ro.secure", "1").expect("first write");
        assert!(matches!(
            broker.set_system_property(MANAGER, "ro.secure", "0"),
            Err(BrokerError::Platform { .. })
        ));
    }

    #[test]
    fn security_context_failure_surfaces() {
        let (fakes, broker) = start();
        assert_eq!(broker.security_context(MANAGER).expect("context"), "u:r:shell:s0");
        fakes.system.clear_security_context();
        assert!(matches!(
            broker.security_context(MANAGER),
            Err(BrokerError::Platform { operation: "security_context", .. })
        ));
    }

    #[test]
    fn broker_permission_uses_own_uid() {
        let (fakes, broker) = start();
        assert!(!broker
            .check_broker_permission(MANAGER, "android.permission.DUMP")
            .expect("check"));
        fakes.permissions.grant(BROKER.uid);
        assert!(broker
            .check_broker_permission(MANAGER, "android.permission.DUMP")
            .expect("check"));
    }

    #[test]
    fn relay_is_authorized() {
        let (fakes, broker) = start();
        let target = FakeHandle::new(77);
        target.set_reply(Payload::copy_from(b"pong"));
        let handle: Handle = target.clone();

        let reply = broker
            .relay(MANAGER, &handle, 5, &Payload::copy_from(b"ping"), CallMode::Blocking)
            .expect("relay");
        assert!(reply.delivered);
        assert_eq!(reply.payload.as_bytes(), b"pong");
        assert_eq!(fakes.identity.restores(), 1);

        assert!(broker
            .relay(CLIENT, &handle, 5, &Payload::empty(), CallMode::Blocking)
            .is_err());
        assert_eq!(target.transactions().len(), 1);
    }

    #[test]
    fn exit_is_manager_or_self() {
        let (_fakes, broker) = start();
        assert!(broker.exit(CLIENT).is_err());
        assert_eq!(*broker.shutdown_signal().borrow(), None);

        let same_process = CallerIdentity::new(Uid::new(0), BROKER.pid);
        broker.exit(same_process).expect("self");
        assert_eq!(*broker.shutdown_signal().borrow(), Some(ShutdownRequest::exit()));
    }
}
