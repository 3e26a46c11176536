//! User service operations of the broker.
//!
//! # Record Lifecycle
//!
//! ```text
//! add_user_service ──► get_or_create (lock) ──► created? ──► SpawnExecutor
//!                                                              │
//!                ┌─────────────────────────────────────────────┤
//!                ▼                                             ▼
//!        load_and_instantiate                       shell(launch command)
//!                │                                             │
//!                │                              attach_handle(token, handle)
//!                ▼                                             ▼
//!        complete_rendezvous: bind + snapshot (lock) ──► connected(handle)
//! ```
//!
//! A record leaves the table, under the lock, on `remove_user_service`,
//! replacement by a newer request, death of its service, a change of its
//! package's artifact, a failed spawn or an expired rendezvous. It is
//! destroyed after the lock is released.

use super::Broker;
use crate::error::BrokerError;
use crate::platform::PackageInfo;
use crate::service::{
    send_destroy, LaunchCommand, RecordRef, RecordState, ServiceConnection, ServiceRequest,
};
use aegis_auth::AccessDenied;
use aegis_types::{CallerIdentity, Handle, ServiceToken, Uid};
use std::sync::Arc;
use std::time::Duration;

impl Broker {
    /// Subscribes `connection` to the user service described by `request`,
    /// spawning it if needed.
    ///
    /// Returns once the subscription is registered. The service handle
    /// arrives later through [`ServiceConnection::connected`]; a spawn
    /// failure shows up as [`ServiceConnection::died`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized or does not own the package,
    /// [`BrokerError::PackageNotFound`] if the package is not installed
    /// and [`BrokerError::InvalidArgument`] for a malformed request.
    pub fn add_user_service(
        &self,
        identity: CallerIdentity,
        connection: Arc<dyn ServiceConnection>,
        request: &ServiceRequest,
    ) -> Result<(), BrokerError> {
        self.authorize(identity, "add_user_service")?;
        request.validate().map_err(BrokerError::invalid_argument)?;
        let package = self.ensure_calling_package(identity, &request.package)?;

        let (lookup, bound) = {
            let mut state = self.state.lock();
            let lookup = state.services.get_or_create(request, &package.source_dir);
            if !lookup.record.callbacks().register(Arc::clone(&connection)) {
                tracing::warn!(key = %lookup.record.key(), "subscriber list closed");
            }
            let bound = lookup.record.state() == RecordState::Bound;
            (lookup, bound)
        };

        if let Some((stale, _)) = &lookup.replaced {
            stale.destroy(self.platform.artifacts.as_ref());
        }
        if bound {
            lookup.record.notify_connected(connection.as_ref());
        }
        if lookup.created {
            self.install_artifact_watch(&lookup.record);
            self.schedule_spawn(&lookup.record, request, identity.uid);
        }
        Ok(())
    }

    /// Tears down the user service described by `request`, whoever else
    /// subscribed to it. Returns `false` if no such service exists.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AccessDenied`] if the caller is not
    /// authorized or does not own the package, and
    /// [`BrokerError::PackageNotFound`] if the package is not installed.
    pub fn remove_user_service(&self, identity: CallerIdentity, request: &ServiceRequest) -> Result<bool, BrokerError> {
        self.authorize(identity, "remove_user_service")?;
        self.ensure_calling_package(identity, &request.package)?;

        let key = request.key();
        let Some(record) = self.state.lock().services.remove(&key) else {
            tracing::debug!(%key, "no service to remove");
            return Ok(false);
        };
        tracing::info!(%key, token = %record.token(), %identity, "service removed by client");
        record.destroy(self.platform.artifacts.as_ref());
        Ok(true)
    }

    /// Hands the broker the handle of a separately launched service.
    ///
    /// Callable by the manager and by processes running as the broker.
    /// Returns `false` if no record is waiting for `token`; the handle is
    /// then asked to shut down.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::NotManager`] for other callers and
    /// [`BrokerError::InvalidArgument`] for an empty token.
    pub fn attach_handle(&self, identity: CallerIdentity, token: &ServiceToken, service: Handle) -> Result<bool, BrokerError> {
        if !self.guard.is_broker(identity) {
            self.guard.require_manager(identity, "attach_handle")?;
        }
        if token.as_str().is_empty() {
            return Err(BrokerError::invalid_argument("token is empty"));
        }

        let record = self.state.lock().services.find_by_token(token).cloned();
        let Some(record) = record else {
            tracing::warn!(%token, service = %service.id(), "no service record waiting for token");
            send_destroy(&service);
            return Ok(false);
        };
        Ok(self.complete_rendezvous(&record, service))
    }

    /// Binds `service` to `record` and tells the subscribers.
    ///
    /// The subscriber snapshot is taken under the broker lock together with
    /// the bind, so a concurrent `add_user_service` is notified either by
    /// this delivery or by its own, never both.
    fn complete_rendezvous(&self, record: &RecordRef, service: Handle) -> bool {
        let subscribers = {
            let state = self.state.lock();
            let registered = state
                .services
                .get(record.key())
                .is_some_and(|current| Arc::ptr_eq(current, record));
            (registered && record.bind(Arc::clone(&service))).then(|| record.callbacks().snapshot())
        };
        let Some(subscribers) = subscribers else {
            tracing::warn!(key = %record.key(), token = %record.token(), "discarding handle for a record no longer waiting");
            send_destroy(&service);
            return false;
        };

        if record.is_standalone() {
            self.link_service_death(record, &service);
        }
        tracing::info!(key = %record.key(), token = %record.token(), service = %service.id(), "service attached");
        record.deliver_connected(&subscribers);
        true
    }

    fn link_service_death(&self, record: &RecordRef, service: &Handle) {
        let broker = self.me.clone();
        let weak = Arc::downgrade(record);
        let linked = service.link_to_death(Box::new(move || {
            if let (Some(broker), Some(record)) = (broker.upgrade(), weak.upgrade()) {
                broker.on_service_died(&record);
            }
        }));
        match linked {
            Ok(link) => {
                if !record.set_death_link(link) {
                    service.unlink_to_death(link);
                }
            }
            Err(e) => {
                tracing::warn!(key = %record.key(), token = %record.token(), "failed to watch service for death: {e}");
            }
        }
    }

    fn install_artifact_watch(&self, record: &RecordRef) {
        let broker = self.me.clone();
        let weak = Arc::downgrade(record);
        let id = self.platform.artifacts.watch(
            record.artifact_path(),
            Box::new(move || {
                if let (Some(broker), Some(record)) = (broker.upgrade(), weak.upgrade()) {
                    broker.on_artifact_changed(&record);
                }
            }),
        );
        if !record.set_artifact_watch(id) {
            self.platform.artifacts.unwatch(id);
        }
    }

    fn schedule_spawn(&self, record: &RecordRef, request: &ServiceRequest, caller_uid: Uid) {
        let broker = self.me.clone();
        let record = Arc::clone(record);
        let request = request.clone();
        tracing::debug!(key = %record.key(), token = %record.token(), "spawn scheduled");
        self.executor.execute(Box::new(move || {
            if let Some(broker) = broker.upgrade() {
                broker.run_spawn(&record, &request, caller_uid);
            }
        }));
    }

    fn run_spawn(&self, record: &RecordRef, request: &ServiceRequest, caller_uid: Uid) {
        if record.state() != RecordState::Created {
            tracing::debug!(key = %record.key(), token = %record.token(), "record gone before spawn");
            return;
        }
        match &request.process_name_suffix {
            Some(suffix) => self.launch_standalone(record, request, suffix, caller_uid),
            None => self.load_in_process(record, request),
        }
    }

    fn launch_standalone(&self, record: &RecordRef, request: &ServiceRequest, suffix: &str, caller_uid: Uid) {
        let launch = LaunchCommand {
            token: record.token(),
            package: &request.package,
            class_name: &request.class_name,
            suffix,
            caller_uid,
            debuggable: request.debuggable,
        };
        tracing::info!(key = %record.key(), token = %record.token(), process = %launch.process_name(), "launching service process");

        match self.platform.host.spawn_shell(&launch.render(&self.config)) {
            Ok(0) => self.schedule_rendezvous_expiry(record),
            Ok(code) => {
                tracing::warn!(key = %record.key(), token = %record.token(), code, "service launcher failed");
                self.retire(record, "launch failed");
            }
            Err(e) => {
                tracing::warn!(key = %record.key(), token = %record.token(), "failed to run service launcher: {e}");
                self.retire(record, "launch failed");
            }
        }
    }

    fn load_in_process(&self, record: &RecordRef, request: &ServiceRequest) {
        match self
            .platform
            .host
            .load_and_instantiate(record.artifact_path(), &request.class_name)
        {
            Ok(service) => {
                self.complete_rendezvous(record, service);
            }
            Err(e) => {
                tracing::warn!(key = %record.key(), class = %request.class_name, "failed to load service: {e}");
                self.retire(record, "load failed");
            }
        }
    }

    fn schedule_rendezvous_expiry(&self, record: &RecordRef) {
        let Some(timeout) = self.config.services.rendezvous_timeout() else {
            return;
        };
        let broker = self.me.clone();
        let weak = Arc::downgrade(record);
        self.executor.execute_after(
            timeout,
            Box::new(move || {
                if let (Some(broker), Some(record)) = (broker.upgrade(), weak.upgrade()) {
                    broker.expire_rendezvous(&record, timeout);
                }
            }),
        );
    }

    fn expire_rendezvous(&self, record: &RecordRef, timeout: Duration) {
        let expired = {
            let mut state = self.state.lock();
            record.state() == RecordState::Created && state.services.remove_record(record)
        };
        if expired {
            tracing::warn!(key = %record.key(), token = %record.token(), ?timeout, "service did not attach in time");
            record.destroy(self.platform.artifacts.as_ref());
        }
    }

    fn on_service_died(&self, record: &RecordRef) {
        self.retire(record, "service died");
    }

    fn on_artifact_changed(&self, record: &RecordRef) {
        self.retire(record, "package artifact changed");
    }

    /// Takes `record` out of the table and destroys it, unless it was
    /// already replaced or removed.
    fn retire(&self, record: &RecordRef, reason: &str) -> bool {
        let removed = self.state.lock().services.remove_record(record);
        if removed {
            tracing::info!(key = %record.key(), token = %record.token(), reason, "tearing down service");
            record.destroy(self.platform.artifacts.as_ref());
        }
        removed
    }

    /// Resolves `package` in the caller's user and checks the caller owns it.
    fn ensure_calling_package(&self, identity: CallerIdentity, package: &str) -> Result<PackageInfo, BrokerError> {
        let info = self
            .platform
            .packages
            .package_info(package, identity.user_id())
            .ok_or_else(|| BrokerError::package_not_found(package, identity.user_id()))?;
        if info.uid.app_id() != identity.app_id() {
            tracing::warn!(%identity, package, owner = %info.uid, "service request for a package the caller does not own");
            return Err(AccessDenied::package_not_owned(package, identity).into());
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::testing::{package, FakeHandle, FakePlatform, ManualExecutor, RecordingConnection};
    use aegis_auth::MemoryPermissionStore;
    use aegis_types::{Pid, RemoteHandle};

    const BROKER: CallerIdentity = CallerIdentity::new(Uid::new(2000), Pid::new(100));
    const MANAGER: CallerIdentity = CallerIdentity::new(Uid::new(10050), Pid::new(500));
    const CLIENT: CallerIdentity = CallerIdentity::new(Uid::new(10123), Pid::new(4242));
    const CLASS: &str = "com.example.FileService";

    struct Fixture {
        fakes: FakePlatform,
        executor: Arc<ManualExecutor>,
        broker: Arc<Broker>,
    }

    fn fixture() -> Fixture {
        let fakes = FakePlatform::new(BROKER);
        fakes.packages.install(package("dev.aegis.manager", MANAGER.uid));
        fakes.packages.install(package("com.example", CLIENT.uid));
        fakes.permissions.grant(CLIENT.uid);
        let executor = ManualExecutor::new();
        let broker = Broker::start(
            BrokerConfig::default(),
            fakes.platform(),
            Arc::new(MemoryPermissionStore::new()),
            executor.clone(),
        )
        .expect("start");
        Fixture {
            fakes,
            executor,
            broker,
        }
    }

    #[test]
    fn in_process_service_is_loaded_and_delivered() {
        let f = fixture();
        let service = FakeHandle::new(900);
        f.fakes.host.provide(CLASS, service.clone());
        let subscriber = RecordingConnection::new(1);

        f.broker
            .add_user_service(CLIENT, subscriber.clone(), &ServiceRequest::new("com.example", CLASS))
            .expect("add");
        assert_eq!(subscriber.connected_count(), 0);
        assert_eq!(f.executor.run_pending(), 1);

        assert_eq!(subscriber.connected_count(), 1);
        assert_eq!(subscriber.last_connected(), Some(service.id()));
        let loads = f.fakes.host.loads();
        assert_eq!(loads[0].0, std::path::PathBuf::from("/data/app/com.example/base.apk"));
        // In-process services have no death link.
        assert_eq!(service.death_links(), 0);
    }

    #[test]
    fn failed_load_tears_record_down() {
        let f = fixture();
        let subscriber = RecordingConnection::new(1);
        let request = ServiceRequest::new("com.example", CLASS);
        f.broker
            .add_user_service(CLIENT, subscriber.clone(), &request)
            .expect("add");
        f.executor.run_pending();

        assert_eq!(subscriber.died_count(), 1);
        assert!(f.broker.service_record(&request.key()).is_none());
        assert_eq!(f.fakes.artifacts.unwatched().len(), 1);
    }

    #[test]
    fn standalone_record_expires_without_rendezvous() {
        let f = fixture();
        let subscriber = RecordingConnection::new(1);
        let request = ServiceRequest::new("com.example", CLASS).standalone("svc");
        f.broker
            .add_user_service(CLIENT, subscriber.clone(), &request)
            .expect("add");
        f.executor.run_pending();

        assert_eq!(f.executor.delayed(), vec![Duration::from_secs(30)]);
        assert_eq!(f.executor.elapse(), 1);
        assert!(f.broker.service_record(&request.key()).is_none());
        assert_eq!(subscriber.died_count(), 1);
    }

    #[test]
    fn expiry_after_bind_is_ignored() {
        let f = fixture();
        let request = ServiceRequest::new("com.example", CLASS).standalone("svc");
        f.broker
            .add_user_service(CLIENT, RecordingConnection::new(1), &request)
            .expect("add");
        f.executor.run_pending();

        let record = f.broker.service_record(&request.key()).expect("record");
        let launched = CallerIdentity::new(BROKER.uid, Pid::new(31000));
        assert!(f
            .broker
            .attach_handle(launched, record.token(), FakeHandle::new(900))
            .expect("attach"));

        f.executor.elapse();
        assert_eq!(record.state(), RecordState::Bound);
    }

    #[test]
    fn disabled_timeout_schedules_no_expiry() {
        let fakes = FakePlatform::new(BROKER);
        fakes.packages.install(package("dev.aegis.manager", MANAGER.uid));
        fakes.packages.install(package("com.example", CLIENT.uid));
        let executor = ManualExecutor::new();
        let mut config = BrokerConfig::default();
        config.services.rendezvous_timeout_ms = 0;
        let broker = Broker::start(
            config,
            fakes.platform(),
            Arc::new(MemoryPermissionStore::new()),
            executor.clone(),
        )
        .expect("start");

        let request = ServiceRequest::new("com.example", CLASS).standalone("svc");
        broker
            .add_user_service(MANAGER, RecordingConnection::new(1), &request)
            .expect_err("manager does not own com.example");
        broker
            .add_user_service(
                CallerIdentity::new(CLIENT.uid, Pid::new(1)),
                RecordingConnection::new(1),
                &request,
            )
            .expect_err("client is not authorized");

        fakes.permissions.grant(CLIENT.uid);
        broker
            .add_user_service(CLIENT, RecordingConnection::new(1), &request)
            .expect("add");
        executor.run_pending();
        assert!(executor.delayed().is_empty());
    }

    #[test]
    fn service_death_tears_record_down() {
        let f = fixture();
        let subscriber = RecordingConnection::new(1);
        let request = ServiceRequest::new("com.example", CLASS).standalone("svc");
        f.broker
            .add_user_service(CLIENT, subscriber.clone(), &request)
            .expect("add");
        f.executor.run_pending();

        let record = f.broker.service_record(&request.key()).expect("record");
        let service = FakeHandle::new(900);
        f.broker
            .attach_handle(BROKER, record.token(), service.clone())
            .expect("attach");
        assert_eq!(service.death_links(), 1);

        service.fire_death();
        assert!(f.broker.service_record(&request.key()).is_none());
        assert_eq!(record.state(), RecordState::Destroyed);
        // A bound standalone service reports its own death.
        assert_eq!(subscriber.died_count(), 0);
    }

    #[test]
    fn artifact_change_tears_record_down() {
        let f = fixture();
        let subscriber = RecordingConnection::new(1);
        let request = ServiceRequest::new("com.example", CLASS);
        let service = FakeHandle::new(900);
        f.fakes.host.provide(CLASS, service.clone());
        f.broker
            .add_user_service(CLIENT, subscriber.clone(), &request)
            .expect("add");
        f.executor.run_pending();

        f.fakes.artifacts.fire("/data/app/com.example/base.apk");

        assert!(f.broker.service_record(&request.key()).is_none());
        assert_eq!(subscriber.died_count(), 1);
        assert_eq!(service.destroy_requests(), 1);
    }

    #[test]
    fn foreign_package_is_refused() {
        let f = fixture();
        let err = f
            .broker
            .add_user_service(
                CLIENT,
                RecordingConnection::new(1),
                &ServiceRequest::new("dev.aegis.manager", CLASS),
            )
            .expect_err("not owned");
        assert!(matches!(
            err,
            BrokerError::AccessDenied(AccessDenied::PackageNotOwned { .. })
        ));

        let err = f
            .broker
            .add_user_service(
                CLIENT,
                RecordingConnection::new(1),
                &ServiceRequest::new("com.missing", CLASS),
            )
            .expect_err("missing");
        assert!(matches!(err, BrokerError::PackageNotFound { .. }));
        assert_eq!(f.broker.service_count(), 0);
    }

    #[test]
    fn malformed_request_is_invalid() {
        let f = fixture();
        let err = f
            .broker
            .add_user_service(
                CLIENT,
                RecordingConnection::new(1),
                &ServiceRequest::new("com.example", CLASS).standalone("two words"),
            )
            .expect_err("invalid");
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
    }

    #[test]
    fn class_with_shell_metacharacters_never_reaches_the_shell() {
        let f = fixture();
        let err = f
            .broker
            .add_user_service(
                CLIENT,
                RecordingConnection::new(1),
                &ServiceRequest::new("com.example", "x;touch /tmp/injected;").standalone("svc"),
            )
            .expect_err("invalid");
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
        assert_eq!(f.executor.pending(), 0);
        assert_eq!(f.broker.service_count(), 0);
        assert!(f.fakes.host.shell_commands().is_empty());
    }

    #[test]
    fn attach_handle_checks_caller_and_token() {
        let f = fixture();
        let err = f
            .broker
            .attach_handle(CLIENT, &ServiceToken::from("t"), FakeHandle::new(1))
            .expect_err("client");
        assert!(err.is_security());

        let err = f
            .broker
            .attach_handle(MANAGER, &ServiceToken::from(""), FakeHandle::new(1))
            .expect_err("empty token");
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
    }
}
