//! Platform collaborators the broker is built on.
//!
//! The broker core never talks to the host OS directly. Everything it needs
//! from the platform goes through one of these traits:
//!
//! | Trait | Provides |
//! |-------|----------|
//! | [`PackageAuthority`] | Installed packages and the uids owning them |
//! | [`PermissionAuthority`] | Platform runtime-permission checks and grants |
//! | [`ActivityManager`] | Confirmation UI launch, force-stop |
//! | [`ProcessHost`] | Shell launch, child processes, in-process loading |
//! | [`ArtifactWatcher`] | Change notification on installed artifacts |
//! | [`IdentitySwitch`] | Temporarily dropping the caller's identity |
//! | [`SystemFacility`] | Own identity, properties, security context |
//!
//! [`Platform`] bundles one of each. Host implementations live in
//! [`crate::host`]; fakes for tests in [`crate::testing`].

use aegis_types::{CallerIdentity, ErrorCode, Handle, Pid, TransportError, Uid, UserId};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use aegis_auth::PermissionAuthority;

/// Failure of a platform collaborator.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform service could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A host I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS file notification service failed.
    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The platform refused or could not complete the request.
    #[error("{0}")]
    Unavailable(String),
}

impl PlatformError {
    /// Creates an Unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

impl ErrorCode for PlatformError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "PLATFORM_TRANSPORT",
            Self::Io(_) => "PLATFORM_IO",
            Self::Watch(_) => "PLATFORM_WATCH",
            Self::Unavailable(_) => "PLATFORM_UNAVAILABLE",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::Watch(_) => false,
            Self::Io(_) | Self::Unavailable(_) => true,
        }
    }
}

/// Installed package metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Package name.
    pub name: String,
    /// Uid the package runs as in the queried user.
    pub uid: Uid,
    /// Installed code artifact.
    pub source_dir: PathBuf,
    /// Permissions declared by the package.
    pub requested_permissions: Vec<String>,
}

impl PackageInfo {
    /// Returns `true` if the package declares `permission`.
    #[must_use]
    pub fn requests(&self, permission: &str) -> bool {
        self.requested_permissions.iter().any(|p| p == permission)
    }
}

/// Installed package registry.
pub trait PackageAuthority: Send + Sync {
    /// Names of every package running as `uid`. Empty on failure.
    fn packages_for_uid(&self, uid: Uid) -> Vec<String>;

    /// Metadata of `package` in `user`, including uninstalled-but-kept packages.
    fn package_info(&self, package: &str, user: UserId) -> Option<PackageInfo>;
}

/// Data handed to the manager's confirmation screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    /// Requesting client.
    pub identity: CallerIdentity,
    /// Client-chosen correlation code.
    pub request_code: i32,
    /// Requesting package.
    pub package: PackageInfo,
    /// Manager package that shows the screen.
    pub manager_package: String,
}

/// Activity-level platform operations.
pub trait ActivityManager: Send + Sync {
    /// Shows the permission confirmation screen of the manager.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the screen cannot be started.
    fn start_confirmation(&self, request: &ConfirmationRequest) -> Result<(), PlatformError>;

    /// Stops every process of `package` in `user`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the platform refuses.
    fn force_stop_package(&self, package: &str, user: UserId) -> Result<(), PlatformError>;
}

/// Arguments of a process launched on behalf of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program and arguments.
    pub argv: Vec<String>,
    /// Full environment as `KEY=value`; inherited when `None`.
    pub env: Option<Vec<String>>,
    /// Working directory; inherited when `None`.
    pub dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Creates a spec running `argv` with inherited environment.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: None,
            dir: None,
        }
    }
}

/// A child process started by [`ProcessHost::new_process`].
pub trait HostedProcess: Send + Sync + fmt::Debug {
    /// OS process id.
    fn pid(&self) -> Pid;

    /// Exit code if the process has finished.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the status cannot be read.
    fn try_exit_code(&self) -> Result<Option<i32>, PlatformError>;

    /// Blocks until the process exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if waiting fails.
    fn wait(&self) -> Result<i32, PlatformError>;

    /// Kills the process. No-op if it already exited.
    fn destroy(&self);
}

/// Process creation facilities.
pub trait ProcessHost: Send + Sync {
    /// Feeds `command` to a host shell and waits for the shell to exit.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the shell cannot be started.
    fn spawn_shell(&self, command: &str) -> Result<i32, PlatformError>;

    /// Starts a child process.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the process cannot be started.
    fn new_process(&self, spec: &ProcessSpec) -> Result<Box<dyn HostedProcess>, PlatformError>;

    /// Loads `class_name` from `artifact` in an isolated loader and
    /// returns the handle of the new instance.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if loading or instantiation fails.
    fn load_and_instantiate(&self, artifact: &Path, class_name: &str)
        -> Result<Handle, PlatformError>;
}

/// Registration returned by [`ArtifactWatcher::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    /// Wraps a raw registration id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw registration id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Callback run when a watched artifact changes.
pub type ArtifactCallback = Box<dyn Fn() + Send + Sync>;

/// Change notification on installed artifacts.
pub trait ArtifactWatcher: Send + Sync {
    /// Calls `on_change` whenever `path` is replaced, modified or removed.
    fn watch(&self, path: &Path, on_change: ArtifactCallback) -> WatchId;

    /// Cancels a registration. Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);
}

/// Saved ambient identity returned by [`IdentitySwitch::clear_calling_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityToken(u64);

impl IdentityToken {
    /// Wraps a platform token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the platform token.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Switches the ambient identity of the current thread.
pub trait IdentitySwitch: Send + Sync {
    /// Makes outgoing calls use the broker's own identity.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the identity cannot be switched.
    fn clear_calling_identity(&self) -> Result<IdentityToken, PlatformError>;

    /// Restores the identity saved in `token`.
    fn restore_calling_identity(&self, token: IdentityToken);
}

/// Host facilities of the broker process itself.
pub trait SystemFacility: Send + Sync {
    /// Uid and pid of the broker process.
    fn identity(&self) -> CallerIdentity;

    /// Reads a system property. `None` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the property service fails.
    fn property(&self, name: &str) -> Result<Option<String>, PlatformError>;

    /// Writes a system property.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the property service refuses.
    fn set_property(&self, name: &str, value: &str) -> Result<(), PlatformError>;

    /// Security context (SELinux label) of the broker process.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the label cannot be read.
    fn security_context(&self) -> Result<String, PlatformError>;
}

/// One instance of every platform collaborator.
#[derive(Clone)]
pub struct Platform {
    /// Package registry.
    pub packages: Arc<dyn PackageAuthority>,
    /// Runtime permissions.
    pub permissions: Arc<dyn PermissionAuthority>,
    /// Activity manager.
    pub activities: Arc<dyn ActivityManager>,
    /// Process creation.
    pub host: Arc<dyn ProcessHost>,
    /// Artifact watches.
    pub artifacts: Arc<dyn ArtifactWatcher>,
    /// Identity switching.
    pub identity: Arc<dyn IdentitySwitch>,
    /// Own-process facilities.
    pub system: Arc<dyn SystemFacility>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
