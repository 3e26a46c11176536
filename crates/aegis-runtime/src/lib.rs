//! aegis runtime - the privileged broker.
//!
//! A long-lived process running with elevated privileges that lets
//! ordinary applications, once the user allowed them, call privileged
//! operations through it, spawn helper services on their behalf and relay
//! calls to third-party endpoints under the broker's identity.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  aegis-types   : Uid/Pid, ServiceToken, RemoteHandle        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  aegis-auth    : PermissionFlags, PermissionStore,          │
//! │                  ClientRegistry, AuthorizationGuard         │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Runtime Layer (THIS CRATE)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  broker/   : Broker facade, one coarse lock, shutdown       │
//! │  service/  : ServiceRegistry, records, spawn executor       │
//! │  relay     : CallRelay                                      │
//! │  platform  : collaborator traits                            │
//! │  host/     : shell, file watcher, host system               │
//! │  config/   : BrokerConfig + ConfigLoader                    │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transport binding (embedder)                │
//! │  decodes calls, supplies CallerIdentity, installs tracing   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! ## [`broker`] - Facade
//!
//! - [`Broker`]: every inbound operation, keyed by the caller's identity
//! - [`ShutdownRequest`]: published on exit or when the manager disappears
//!
//! ## [`service`] - User Services
//!
//! - [`ServiceRequest`](service::ServiceRequest): what a client asks for
//! - [`ServiceRegistry`](service::ServiceRegistry): key → record table
//! - [`SpawnWorker`](service::SpawnWorker): serialized spawn queue
//!
//! ## [`platform`] / [`host`] - Collaborators
//!
//! Traits for the package, permission, activity, process, artifact,
//! identity and system services, and host implementations for the ones a
//! plain Unix host can provide.
//!
//! ## [`testing`] - Fakes
//!
//! In-memory fakes of every collaborator, used by this crate's tests and
//! by embedders testing their transport binding.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aegis_auth::MemoryPermissionStore;
//! use aegis_runtime::testing::{package, FakePlatform, ManualExecutor, RecordingClient};
//! use aegis_runtime::{Broker, BrokerConfig};
//! use aegis_types::{CallerIdentity, Pid, Uid};
//!
//! let fakes = FakePlatform::new(CallerIdentity::new(Uid::new(2000), Pid::new(1)));
//! fakes.packages.install(package("dev.aegis.manager", Uid::new(10050)));
//! fakes.packages.install(package("com.example", Uid::new(10123)));
//!
//! let broker = Broker::start(
//!     BrokerConfig::default(),
//!     fakes.platform(),
//!     Arc::new(MemoryPermissionStore::new()),
//!     ManualExecutor::new(),
//! )
//! .expect("manager installed");
//!
//! let client = CallerIdentity::new(Uid::new(10123), Pid::new(4242));
//! let reply = broker
//!     .attach(client, RecordingClient::new(1), "com.example")
//!     .expect("owns its package");
//! assert_eq!(reply.client.map(|c| c.allowed), Some(false));
//! assert!(broker.version(client).is_err());
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod relay;
pub mod service;
pub mod testing;

pub use broker::{
    open_permission_store, Broker, PermissionDecision, RemoteProcess, ShutdownReason,
    ShutdownRequest,
};
pub use config::{BrokerConfig, ConfigError, ConfigLoader};
pub use error::{BrokerError, EXIT_MANAGER_NOT_INSTALLED};
pub use platform::{Platform, PlatformError};
pub use relay::{CallRelay, RelayReply};
pub use service::{ServiceConnection, ServiceRequest, SpawnExecutor, SpawnWorker};
