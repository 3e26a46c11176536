//! User service lifecycle.
//!
//! A user service is a component a client asks the broker to start on its
//! behalf. Requests naming the same key share one [`UserServiceRecord`];
//! every requester subscribes to it and receives the service handle once
//! the service is up.
//!
//! # Components
//!
//! | Type | Role |
//! |------|------|
//! | [`ServiceRequest`] | What the client asked for; derives the key |
//! | [`ServiceRegistry`] | Key → record table, kept under the broker lock |
//! | [`UserServiceRecord`] | Token, handle, state machine, subscribers |
//! | [`CallbackList`] | Subscriber broadcast with failure isolation |
//! | [`LaunchCommand`] | Shell command of a standalone service |
//! | [`SpawnExecutor`] | Serialized background queue for spawn work |
//!
//! # Spawn Strategies
//!
//! ```text
//! in-process:  load_and_instantiate(artifact, class) ──► handle ──► attach
//! standalone:  shell(launch command) ··· service starts ··· attach_handle(token, handle)
//! ```
//!
//! The standalone path is asynchronous: the record stays `Created` until
//! the service presents its token, or until the rendezvous timeout, an
//! artifact change or a `remove` tears it down.

mod callback_list;
mod executor;
mod launch;
mod record;
mod registry;
mod request;

pub use callback_list::{CallbackList, ServiceConnection};
pub use executor::{SpawnExecutor, SpawnJob, SpawnWorker};
pub use launch::LaunchCommand;
pub use record::{RecordRef, RecordState, Staleness, UserServiceRecord, USER_SERVICE_TRANSACTION_DESTROY};
pub use registry::{Lookup, ServiceRegistry};
pub use request::{ServiceRequest, DEFAULT_VERSION_CODE};

pub(crate) use record::send_destroy;
