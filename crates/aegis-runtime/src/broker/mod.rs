//! The broker facade.
//!
//! [`Broker`] is the single entry point of every inbound call. It owns
//! the client table and the service table behind one coarse lock and
//! dispatches to the authorization guard, the service registry and the
//! call relay.
//!
//! # Call Flow
//!
//! ```text
//! inbound call (identity from transport)
//!   │
//!   ▼
//! Broker ── authorize ──► AuthorizationGuard ◄── ClientRegistry / PermissionStore
//!   │
//!   ├─► direct operation (version, process, property, ...)
//!   ├─► CallRelay
//!   └─► ServiceRegistry mutation ──► SpawnExecutor ··· attach_handle ──┐
//!                                                                     │
//!         ◄────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! | Lock | Guards | Held while |
//! |------|--------|------------|
//! | broker state | client table, service table, process list | table lookups and mutations only |
//! | record | record state and handle | reading or switching state |
//! | callback list | subscribers | taking a snapshot |
//!
//! Nothing that reaches out of the broker (platform calls, client
//! callbacks, subscriber broadcasts, teardown transactions) runs under the
//! broker lock. Records leave the service table under the lock and are
//! torn down after it is released.
//!
//! # Shutdown
//!
//! The broker never exits the process itself. [`Broker::exit`] and the
//! fatal "manager uninstalled" condition publish a [`ShutdownRequest`] on
//! the channel returned by [`Broker::shutdown_signal`]; the embedding
//! binary decides how to stop.

mod clients;
mod services;
mod system;

pub use clients::PermissionDecision;
pub use system::RemoteProcess;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, EXIT_MANAGER_NOT_INSTALLED};
use crate::platform::{PackageInfo, Platform};
use crate::relay::CallRelay;
use crate::service::{RecordRef, ServiceRegistry, SpawnExecutor};
use aegis_auth::{
    AuthorizationGuard, ClientRegistry, FilePermissionStore, PermissionStore,
};
use aegis_types::{CallerIdentity, UserId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Why the broker asks to be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The manager called `exit`.
    Exit,
    /// The manager application is no longer installed.
    ManagerUninstalled,
}

/// Request to stop the broker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Why.
    pub reason: ShutdownReason,
    /// Process exit code to use.
    pub exit_code: i32,
}

impl ShutdownRequest {
    /// Clean shutdown requested through `exit`.
    #[must_use]
    pub const fn exit() -> Self {
        Self {
            reason: ShutdownReason::Exit,
            exit_code: 0,
        }
    }

    /// Fatal shutdown after the manager was uninstalled.
    #[must_use]
    pub const fn manager_uninstalled() -> Self {
        Self {
            reason: ShutdownReason::ManagerUninstalled,
            exit_code: EXIT_MANAGER_NOT_INSTALLED,
        }
    }
}

/// Tables guarded by the broker lock.
#[derive(Default)]
struct BrokerState {
    clients: ClientRegistry,
    services: ServiceRegistry,
    processes: Vec<Weak<RemoteProcess>>,
}

/// Opens the on-disk permission store named by `config`.
///
/// # Errors
///
/// Returns [`BrokerError::Storage`] if the store cannot be created or read.
pub fn open_permission_store(config: &BrokerConfig) -> Result<Arc<dyn PermissionStore>, BrokerError> {
    let store = FilePermissionStore::open(config.permission_store_path())?;
    Ok(Arc::new(store))
}

/// The privileged broker.
pub struct Broker {
    me: Weak<Broker>,
    config: BrokerConfig,
    platform: Platform,
    guard: AuthorizationGuard,
    store: Arc<dyn PermissionStore>,
    executor: Arc<dyn SpawnExecutor>,
    relay: CallRelay,
    manager: PackageInfo,
    state: Mutex<BrokerState>,
    shutdown: watch::Sender<Option<ShutdownRequest>>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Broker")
            .field("identity", &self.guard.broker())
            .field("manager", &self.manager.name)
            .field("clients", &state.clients.len())
            .field("services", &state.services.len())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Starts a broker.
    ///
    /// Resolves the manager application in the system user and watches
    /// its install path; the broker asks to be stopped once the manager
    /// is uninstalled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ManagerNotInstalled`] if the manager
    /// application is missing.
    pub fn start(
        config: BrokerConfig,
        platform: Platform,
        store: Arc<dyn PermissionStore>,
        executor: Arc<dyn SpawnExecutor>,
    ) -> Result<Arc<Self>, BrokerError> {
        let manager = platform
            .packages
            .package_info(&config.manager_package, UserId::SYSTEM)
            .ok_or_else(|| BrokerError::ManagerNotInstalled(config.manager_package.clone()))?;

        let identity = platform.system.identity();
        let guard = AuthorizationGuard::new(
            identity,
            manager.uid.app_id(),
            config.permission.clone(),
            Arc::clone(&platform.permissions),
        );
        let relay = CallRelay::new(Arc::clone(&platform.identity));
        let (shutdown, _) = watch::channel(None);

        let broker = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            platform,
            guard,
            store,
            executor,
            relay,
            manager,
            state: Mutex::new(BrokerState::default()),
            shutdown,
        });

        let weak = Arc::downgrade(&broker);
        broker.platform.artifacts.watch(
            &broker.manager.source_dir,
            Box::new(move || {
                if let Some(broker) = weak.upgrade() {
                    broker.on_manager_artifact_changed();
                }
            }),
        );

        tracing::info!(
            uid = %identity.uid,
            pid = %identity.pid,
            manager = %broker.manager.name,
            version = broker.config.server_version,
            "broker started"
        );
        Ok(broker)
    }

    /// Configuration the broker runs with.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Uid and pid of the broker process.
    #[must_use]
    pub fn identity(&self) -> CallerIdentity {
        self.guard.broker()
    }

    /// Receives shutdown requests. Holds `None` until one is published.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<Option<ShutdownRequest>> {
        self.shutdown.subscribe()
    }

    /// Number of attached clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Number of managed user services.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Record of the user service registered under `key`.
    #[must_use]
    pub fn service_record(&self, key: &str) -> Option<RecordRef> {
        self.state.lock().services.get(key).cloned()
    }

    /// Applies the authorization rules to a privileged call.
    fn authorize(&self, identity: CallerIdentity, operation: &str) -> Result<(), BrokerError> {
        let allowed = self.state.lock().clients.find(identity).map(|r| r.allowed);
        self.guard.authorize_with(identity, allowed, operation)?;
        Ok(())
    }

    fn request_shutdown(&self, request: ShutdownRequest) {
        let published = self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(request);
            true
        });
        if published {
            tracing::info!(reason = ?request.reason, exit_code = request.exit_code, "shutdown requested");
        }
    }

    fn on_manager_artifact_changed(&self) {
        let installed = self
            .platform
            .packages
            .package_info(&self.manager.name, UserId::SYSTEM)
            .is_some();
        if installed {
            tracing::debug!(manager = %self.manager.name, "manager application updated");
            return;
        }
        tracing::error!(manager = %self.manager.name, "manager application uninstalled, shutting down");
        self.request_shutdown(ShutdownRequest::manager_uninstalled());
    }
}
