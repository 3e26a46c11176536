//! In-memory fakes of every platform collaborator.
//!
//! Each fake records what the broker asked of it and exposes knobs to
//! inject failures. [`FakePlatform`] wires one of each into a
//! [`Platform`].
//!
//! # Example
//!
//! ```
//! use aegis_runtime::testing::{package, FakePlatform};
//! use aegis_types::{CallerIdentity, Pid, Uid};
//!
//! let fakes = FakePlatform::new(CallerIdentity::new(Uid::new(2000), Pid::new(1)));
//! fakes.packages.install(package("com.example", Uid::new(10123)));
//!
//! let platform = fakes.platform();
//! assert_eq!(
//!     platform.packages.packages_for_uid(Uid::new(10123)),
//!     vec!["com.example".to_string()]
//! );
//! ```

use crate::config::BrokerConfig;
use crate::platform::{
    ActivityManager, ArtifactCallback, ArtifactWatcher, ConfirmationRequest, HostedProcess,
    IdentitySwitch, IdentityToken, PackageAuthority, PackageInfo, PermissionAuthority, Platform,
    PlatformError, ProcessHost, ProcessSpec, SystemFacility, WatchId,
};
use crate::service::{ServiceConnection, SpawnExecutor, SpawnJob, USER_SERVICE_TRANSACTION_DESTROY};
use aegis_auth::{AttachReply, ClientCallback};
use aegis_types::{
    CallMode, CallerIdentity, DeathLink, DeathRecipient, Handle, HandleId, Payload, Pid,
    RemoteHandle, TransportError, Uid, UserId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interface descriptor reported by [`FakeHandle`].
pub const FAKE_DESCRIPTOR: &str = "dev.aegis.test.IUserService";

/// Package metadata for `name` running as `uid`, declaring the default
/// broker permission.
#[must_use]
pub fn package(name: &str, uid: Uid) -> PackageInfo {
    PackageInfo {
        name: name.to_string(),
        uid,
        source_dir: PathBuf::from(format!("/data/app/{name}/base.apk")),
        requested_permissions: vec![BrokerConfig::default().permission],
    }
}

// ---------------------------------------------------------------------------
// Transport endpoints
// ---------------------------------------------------------------------------

/// Remote handle that records transactions.
#[derive(Default)]
pub struct FakeHandle {
    id: u64,
    dead: AtomicBool,
    fail: AtomicBool,
    reply: Mutex<Payload>,
    transactions: Mutex<Vec<(u32, Vec<u8>)>>,
    recipients: Mutex<HashMap<u64, Arc<dyn Fn() + Send + Sync>>>,
    next_link: AtomicU64,
}

impl std::fmt::Debug for FakeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHandle")
            .field("id", &self.id)
            .field("dead", &self.dead.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FakeHandle {
    /// Creates a live handle.
    #[must_use]
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Self::default()
        })
    }

    /// Marks the remote process dead without running death recipients.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Marks the remote process dead and runs every linked recipient.
    pub fn fire_death(&self) {
        self.kill();
        let recipients: Vec<_> = self.recipients.lock().drain().map(|(_, r)| r).collect();
        for recipient in recipients {
            recipient();
        }
    }

    /// Makes every following transaction fail.
    pub fn fail_transactions(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Sets the reply of blocking transactions.
    pub fn set_reply(&self, reply: Payload) {
        *self.reply.lock() = reply;
    }

    /// Transactions received so far, as `(code, bytes)`.
    #[must_use]
    pub fn transactions(&self) -> Vec<(u32, Vec<u8>)> {
        self.transactions.lock().clone()
    }

    /// Number of teardown transactions received.
    #[must_use]
    pub fn destroy_requests(&self) -> usize {
        self.transactions
            .lock()
            .iter()
            .filter(|(code, _)| *code == USER_SERVICE_TRANSACTION_DESTROY)
            .count()
    }

    /// Number of active death links.
    #[must_use]
    pub fn death_links(&self) -> usize {
        self.recipients.lock().len()
    }
}

impl RemoteHandle for FakeHandle {
    fn id(&self) -> HandleId {
        HandleId::new(self.id)
    }

    fn descriptor(&self) -> Result<String, TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        Ok(FAKE_DESCRIPTOR.to_string())
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn transact(&self, code: u32, data: Payload, mode: CallMode) -> Result<Payload, TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::failed("injected failure"));
        }
        self.transactions.lock().push((code, data.as_bytes().to_vec()));
        Ok(match mode {
            CallMode::Blocking => self.reply.lock().clone(),
            CallMode::OneWay => Payload::empty(),
        })
    }

    fn link_to_death(&self, recipient: DeathRecipient) -> Result<DeathLink, TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        let link = self.next_link.fetch_add(1, Ordering::SeqCst);
        self.recipients.lock().insert(link, Arc::from(recipient));
        Ok(DeathLink::new(link))
    }

    fn unlink_to_death(&self, link: DeathLink) {
        self.recipients.lock().remove(&link.raw());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Ok,
    Failing,
    Dead,
}

impl Behavior {
    fn check(self) -> Result<(), TransportError> {
        match self {
            Self::Ok => Ok(()),
            Self::Failing => Err(TransportError::failed("injected failure")),
            Self::Dead => Err(TransportError::DeadObject),
        }
    }
}

/// Service subscriber that records notifications.
#[derive(Debug)]
pub struct RecordingConnection {
    id: u64,
    behavior: Behavior,
    connected: Mutex<Vec<HandleId>>,
    died: AtomicUsize,
}

impl RecordingConnection {
    fn with(id: u64, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            behavior,
            connected: Mutex::new(Vec::new()),
            died: AtomicUsize::new(0),
        })
    }

    /// A subscriber that accepts every notification.
    #[must_use]
    pub fn new(id: u64) -> Arc<Self> {
        Self::with(id, Behavior::Ok)
    }

    /// A subscriber whose deliveries fail without proving it dead.
    #[must_use]
    pub fn failing(id: u64) -> Arc<Self> {
        Self::with(id, Behavior::Failing)
    }

    /// A subscriber whose process is gone.
    #[must_use]
    pub fn dead(id: u64) -> Arc<Self> {
        Self::with(id, Behavior::Dead)
    }

    /// Number of `connected` notifications received.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connected.lock().len()
    }

    /// Handle of the latest `connected` notification.
    #[must_use]
    pub fn last_connected(&self) -> Option<HandleId> {
        self.connected.lock().last().copied()
    }

    /// Number of `died` notifications received.
    #[must_use]
    pub fn died_count(&self) -> usize {
        self.died.load(Ordering::SeqCst)
    }
}

impl ServiceConnection for RecordingConnection {
    fn id(&self) -> HandleId {
        HandleId::new(self.id)
    }

    fn connected(&self, service: &Handle) -> Result<(), TransportError> {
        self.behavior.check()?;
        self.connected.lock().push(service.id());
        Ok(())
    }

    fn died(&self) -> Result<(), TransportError> {
        self.behavior.check()?;
        self.died.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Client callback that records what the broker sent.
#[derive(Debug)]
pub struct RecordingClient {
    id: u64,
    dead: AtomicBool,
    replies: Mutex<Vec<AttachReply>>,
    results: Mutex<Vec<(i32, bool)>>,
}

impl RecordingClient {
    /// A reachable client.
    #[must_use]
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            dead: AtomicBool::new(false),
            replies: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
        })
    }

    /// Makes every following delivery fail with a dead peer.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Attach replies received.
    #[must_use]
    pub fn replies(&self) -> Vec<AttachReply> {
        self.replies.lock().clone()
    }

    /// Permission results received, as `(request_code, allowed)`.
    #[must_use]
    pub fn results(&self) -> Vec<(i32, bool)> {
        self.results.lock().clone()
    }
}

impl ClientCallback for RecordingClient {
    fn id(&self) -> HandleId {
        HandleId::new(self.id)
    }

    fn bind_application(&self, reply: &AttachReply) -> Result<(), TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        self.replies.lock().push(reply.clone());
        Ok(())
    }

    fn dispatch_request_permission_result(
        &self,
        request_code: i32,
        allowed: bool,
    ) -> Result<(), TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        self.results.lock().push((request_code, allowed));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Platform collaborators
// ---------------------------------------------------------------------------

/// Package registry backed by a list.
#[derive(Debug, Default)]
pub struct FakePackages {
    installed: Mutex<Vec<PackageInfo>>,
}

impl FakePackages {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs or replaces a package.
    pub fn install(&self, info: PackageInfo) {
        let mut installed = self.installed.lock();
        installed.retain(|p| !(p.name == info.name && p.uid.user_id() == info.uid.user_id()));
        installed.push(info);
    }

    /// Removes `name` from every user.
    pub fn uninstall(&self, name: &str) {
        self.installed.lock().retain(|p| p.name != name);
    }
}

impl PackageAuthority for FakePackages {
    fn packages_for_uid(&self, uid: Uid) -> Vec<String> {
        self.installed
            .lock()
            .iter()
            .filter(|p| p.uid == uid)
            .map(|p| p.name.clone())
            .collect()
    }

    fn package_info(&self, package: &str, user: UserId) -> Option<PackageInfo> {
        self.installed
            .lock()
            .iter()
            .find(|p| p.name == package && p.uid.user_id() == user)
            .cloned()
    }
}

/// Permission authority with a settable grant set.
#[derive(Debug, Default)]
pub struct FakePermissions {
    granted: Mutex<HashSet<Uid>>,
    broken: AtomicBool,
    grants: Mutex<Vec<String>>,
    revokes: Mutex<Vec<String>>,
}

impl FakePermissions {
    /// Creates an authority granting nothing.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes checks for `uid` succeed.
    pub fn grant(&self, uid: Uid) {
        self.granted.lock().insert(uid);
    }

    /// Makes every check fail with a transport error.
    pub fn break_checks(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Packages granted the runtime permission.
    #[must_use]
    pub fn granted_packages(&self) -> Vec<String> {
        self.grants.lock().clone()
    }

    /// Packages the runtime permission was revoked from.
    #[must_use]
    pub fn revoked_packages(&self) -> Vec<String> {
        self.revokes.lock().clone()
    }
}

impl PermissionAuthority for FakePermissions {
    fn check_permission(
        &self,
        _permission: &str,
        uid: Uid,
        _pid: Option<Pid>,
    ) -> Result<bool, TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::failed("permission service unavailable"));
        }
        Ok(self.granted.lock().contains(&uid))
    }

    fn grant_runtime_permission(
        &self,
        package: &str,
        _permission: &str,
        _user: UserId,
    ) -> Result<(), TransportError> {
        self.grants.lock().push(package.to_string());
        Ok(())
    }

    fn revoke_runtime_permission(
        &self,
        package: &str,
        _permission: &str,
        _user: UserId,
    ) -> Result<(), TransportError> {
        self.revokes.lock().push(package.to_string());
        Ok(())
    }
}

/// Activity manager recording confirmations and force-stops.
#[derive(Debug, Default)]
pub struct FakeActivities {
    confirmations: Mutex<Vec<ConfirmationRequest>>,
    force_stopped: Mutex<Vec<String>>,
}

impl FakeActivities {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Confirmation screens started.
    #[must_use]
    pub fn confirmations(&self) -> Vec<ConfirmationRequest> {
        self.confirmations.lock().clone()
    }

    /// Packages force-stopped.
    #[must_use]
    pub fn force_stopped(&self) -> Vec<String> {
        self.force_stopped.lock().clone()
    }
}

impl ActivityManager for FakeActivities {
    fn start_confirmation(&self, request: &ConfirmationRequest) -> Result<(), PlatformError> {
        self.confirmations.lock().push(request.clone());
        Ok(())
    }

    fn force_stop_package(&self, package: &str, _user: UserId) -> Result<(), PlatformError> {
        self.force_stopped.lock().push(package.to_string());
        Ok(())
    }
}

/// Child process handed out by [`FakeHost`].
#[derive(Debug)]
pub struct FakeProcess {
    pid: Pid,
    destroyed: Arc<Mutex<Vec<Pid>>>,
}

impl HostedProcess for FakeProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn try_exit_code(&self) -> Result<Option<i32>, PlatformError> {
        Ok(self.destroyed.lock().contains(&self.pid).then_some(-9))
    }

    fn wait(&self) -> Result<i32, PlatformError> {
        Ok(self.try_exit_code()?.unwrap_or(0))
    }

    fn destroy(&self) {
        let mut destroyed = self.destroyed.lock();
        if !destroyed.contains(&self.pid) {
            destroyed.push(self.pid);
        }
    }
}

/// Process host recording shell commands and loads.
#[derive(Debug, Default)]
pub struct FakeHost {
    shell_exit: AtomicI32,
    shell_commands: Mutex<Vec<String>>,
    processes: Mutex<Vec<ProcessSpec>>,
    next_pid: AtomicU32,
    destroyed: Arc<Mutex<Vec<Pid>>>,
    instances: Mutex<HashMap<String, Handle>>,
    loads: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeHost {
    /// Creates a host whose shell succeeds.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(30_000),
            ..Self::default()
        })
    }

    /// Sets the exit code of following shell runs.
    pub fn set_shell_exit(&self, code: i32) {
        self.shell_exit.store(code, Ordering::SeqCst);
    }

    /// Registers the handle `load_and_instantiate` returns for `class_name`.
    pub fn provide(&self, class_name: &str, service: Handle) {
        self.instances.lock().insert(class_name.to_string(), service);
    }

    /// Shell commands run so far.
    #[must_use]
    pub fn shell_commands(&self) -> Vec<String> {
        self.shell_commands.lock().clone()
    }

    /// Processes started so far.
    #[must_use]
    pub fn processes(&self) -> Vec<ProcessSpec> {
        self.processes.lock().clone()
    }

    /// Pids of processes destroyed so far.
    #[must_use]
    pub fn destroyed(&self) -> Vec<Pid> {
        self.destroyed.lock().clone()
    }

    /// In-process loads attempted, as `(artifact, class)`.
    #[must_use]
    pub fn loads(&self) -> Vec<(PathBuf, String)> {
        self.loads.lock().clone()
    }
}

impl ProcessHost for FakeHost {
    fn spawn_shell(&self, command: &str) -> Result<i32, PlatformError> {
        self.shell_commands.lock().push(command.to_string());
        Ok(self.shell_exit.load(Ordering::SeqCst))
    }

    fn new_process(&self, spec: &ProcessSpec) -> Result<Box<dyn HostedProcess>, PlatformError> {
        if spec.argv.is_empty() {
            return Err(PlatformError::unavailable("empty command"));
        }
        self.processes.lock().push(spec.clone());
        Ok(Box::new(FakeProcess {
            pid: Pid::new(self.next_pid.fetch_add(1, Ordering::SeqCst)),
            destroyed: Arc::clone(&self.destroyed),
        }))
    }

    fn load_and_instantiate(&self, artifact: &Path, class_name: &str) -> Result<Handle, PlatformError> {
        self.loads
            .lock()
            .push((artifact.to_path_buf(), class_name.to_string()));
        self.instances
            .lock()
            .get(class_name)
            .cloned()
            .ok_or_else(|| PlatformError::unavailable(format!("class {class_name} not found")))
    }
}

/// Artifact watcher fired by hand.
#[derive(Default)]
pub struct FakeArtifacts {
    watches: Mutex<HashMap<WatchId, (PathBuf, Arc<dyn Fn() + Send + Sync>)>>,
    next_id: AtomicU64,
    unwatched: Mutex<Vec<WatchId>>,
}

impl std::fmt::Debug for FakeArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeArtifacts")
            .field("watches", &self.watches.lock().len())
            .finish_non_exhaustive()
    }
}

impl FakeArtifacts {
    /// Creates a watcher with no registrations.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs the callbacks of every registration on `path`.
    ///
    /// Returns the number of callbacks run.
    pub fn fire(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let callbacks: Vec<_> = self
            .watches
            .lock()
            .values()
            .filter(|(p, _)| p == path)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb();
        }
        callbacks.len()
    }

    /// Paths currently watched.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watches.lock().values().map(|(p, _)| p.clone()).collect()
    }

    /// Registrations cancelled so far.
    #[must_use]
    pub fn unwatched(&self) -> Vec<WatchId> {
        self.unwatched.lock().clone()
    }
}

impl ArtifactWatcher for FakeArtifacts {
    fn watch(&self, path: &Path, on_change: ArtifactCallback) -> WatchId {
        let id = WatchId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.watches
            .lock()
            .insert(id, (path.to_path_buf(), Arc::from(on_change)));
        id
    }

    fn unwatch(&self, id: WatchId) {
        if self.watches.lock().remove(&id).is_some() {
            self.unwatched.lock().push(id);
        }
    }
}

/// Identity switch tracking whether the identity is currently cleared.
#[derive(Debug, Default)]
pub struct FakeIdentity {
    fail: bool,
    cleared: AtomicBool,
    next_token: AtomicU64,
    restores: AtomicUsize,
}

impl FakeIdentity {
    /// A working switch.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A switch whose `clear_calling_identity` always fails.
    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// `true` while the caller's identity is cleared.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    /// Number of restores so far.
    #[must_use]
    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl IdentitySwitch for FakeIdentity {
    fn clear_calling_identity(&self) -> Result<IdentityToken, PlatformError> {
        if self.fail {
            return Err(PlatformError::unavailable("identity switch refused"));
        }
        self.cleared.store(true, Ordering::SeqCst);
        Ok(IdentityToken::new(self.next_token.fetch_add(1, Ordering::SeqCst)))
    }

    fn restore_calling_identity(&self, _token: IdentityToken) {
        self.cleared.store(false, Ordering::SeqCst);
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}

/// System facility with in-memory properties.
///
/// Like the real property service, `ro.*` properties can be set once.
#[derive(Debug)]
pub struct FakeSystem {
    identity: CallerIdentity,
    properties: Mutex<HashMap<String, String>>,
    security_context: Mutex<Option<String>>,
}

impl FakeSystem {
    /// Creates a facility reporting `identity` as the broker.
    #[must_use]
    pub fn new(identity: CallerIdentity) -> Arc<Self> {
        Arc::new(Self {
            identity,
            properties: Mutex::new(HashMap::new()),
            security_context: Mutex::new(Some("u:r:shell:s0".to_string())),
        })
    }

    /// Makes the security context unreadable.
    pub fn clear_security_context(&self) {
        *self.security_context.lock() = None;
    }

    /// Current value of a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.properties.lock().get(name).cloned()
    }
}

impl SystemFacility for FakeSystem {
    fn identity(&self) -> CallerIdentity {
        self.identity
    }

    fn property(&self, name: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.get(name))
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), PlatformError> {
        let mut properties = self.properties.lock();
        if name.starts_with("ro.") && properties.contains_key(name) {
            return Err(PlatformError::unavailable(format!("{name} is read-only")));
        }
        properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn security_context(&self) -> Result<String, PlatformError> {
        self.security_context
            .lock()
            .clone()
            .ok_or_else(|| PlatformError::unavailable("security context unavailable"))
    }
}

/// One fake of each collaborator.
#[derive(Debug, Clone)]
pub struct FakePlatform {
    /// Package registry.
    pub packages: Arc<FakePackages>,
    /// Permission authority.
    pub permissions: Arc<FakePermissions>,
    /// Activity manager.
    pub activities: Arc<FakeActivities>,
    /// Process host.
    pub host: Arc<FakeHost>,
    /// Artifact watcher.
    pub artifacts: Arc<FakeArtifacts>,
    /// Identity switch.
    pub identity: Arc<FakeIdentity>,
    /// System facility.
    pub system: Arc<FakeSystem>,
}

impl FakePlatform {
    /// Creates fakes for a broker running as `broker`.
    #[must_use]
    pub fn new(broker: CallerIdentity) -> Self {
        Self {
            packages: FakePackages::new(),
            permissions: FakePermissions::new(),
            activities: FakeActivities::new(),
            host: FakeHost::new(),
            artifacts: FakeArtifacts::new(),
            identity: FakeIdentity::new(),
            system: FakeSystem::new(broker),
        }
    }

    /// Bundles the fakes.
    #[must_use]
    pub fn platform(&self) -> Platform {
        Platform {
            packages: self.packages.clone(),
            permissions: self.permissions.clone(),
            activities: self.activities.clone(),
            host: self.host.clone(),
            artifacts: self.artifacts.clone(),
            identity: self.identity.clone(),
            system: self.system.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Executor that holds jobs until the test runs them.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<SpawnJob>>,
    delayed: Mutex<Vec<(Duration, SpawnJob)>>,
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .field("delayed", &self.delayed().len())
            .finish()
    }
}

impl ManualExecutor {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Delays of the held delayed jobs.
    #[must_use]
    pub fn delayed(&self) -> Vec<Duration> {
        self.delayed.lock().iter().map(|(d, _)| *d).collect()
    }

    /// Runs queued jobs, including ones queued while running, in order.
    ///
    /// Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().pop_front();
            let Some(job) = job else {
                return ran;
            };
            job();
            ran += 1;
        }
    }

    /// Moves every delayed job to the queue, as if its delay elapsed, and
    /// runs the queue.
    pub fn elapse(&self) -> usize {
        let delayed: Vec<_> = self.delayed.lock().drain(..).map(|(_, job)| job).collect();
        self.queue.lock().extend(delayed);
        self.run_pending()
    }
}

impl SpawnExecutor for ManualExecutor {
    fn execute(&self, job: SpawnJob) {
        self.queue.lock().push_back(job);
    }

    fn execute_after(&self, delay: Duration, job: SpawnJob) {
        self.delayed.lock().push((delay, job));
    }
}
