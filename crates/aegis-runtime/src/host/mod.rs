//! Host implementations of the platform collaborators.
//!
//! | Type | Implements |
//! |------|-----------|
//! | [`ShellProcessHost`] | [`ProcessHost`](crate::platform::ProcessHost) |
//! | [`NotifyArtifactWatcher`] | [`ArtifactWatcher`](crate::platform::ArtifactWatcher) |
//! | [`HostSystem`] | [`SystemFacility`](crate::platform::SystemFacility) |
//!
//! Package, permission, activity and identity services belong to the
//! platform the broker is embedded in and have no host implementation
//! here.

mod shell;
mod system;
mod watcher;

pub use shell::ShellProcessHost;
pub use system::HostSystem;
pub use watcher::NotifyArtifactWatcher;
