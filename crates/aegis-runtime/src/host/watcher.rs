//! Artifact watcher backed by the OS file notification service.
//!
//! A registration watches the parent directory of its path, so an artifact
//! replaced by a new file is noticed as well as one written in place.
//! Each directory is watched once and released with its last registration.
//!
//! ```text
//! notify thread ── change event ──► mpsc ──► dispatch thread
//!                                              │ match registrations
//!                                              ▼
//!                                           callbacks
//! ```
//!
//! Callbacks run on the dispatch thread with no watcher lock held, so they
//! may call [`ArtifactWatcher::unwatch`] or tear down broker state.

use crate::platform::{ArtifactCallback, ArtifactWatcher, PlatformError, WatchId};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

struct Registration {
    path: PathBuf,
    /// Watched directory. `None` if it could not be watched.
    dir: Option<PathBuf>,
    on_change: Arc<dyn Fn() + Send + Sync>,
}

impl Registration {
    /// An event on the path itself or on one of its ancestors.
    fn affected_by(&self, event: &Event) -> bool {
        event.paths.iter().any(|p| self.path.starts_with(p))
    }
}

type Registrations = Arc<Mutex<HashMap<WatchId, Registration>>>;

struct DirWatches {
    watcher: RecommendedWatcher,
    counts: HashMap<PathBuf, usize>,
}

/// [`ArtifactWatcher`] on top of [`notify::RecommendedWatcher`].
pub struct NotifyArtifactWatcher {
    dirs: Mutex<DirWatches>,
    registrations: Registrations,
    next_id: AtomicU64,
}

impl std::fmt::Debug for NotifyArtifactWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyArtifactWatcher")
            .field("dirs", &self.dirs.lock().counts.len())
            .field("registrations", &self.registrations.lock().len())
            .finish()
    }
}

impl NotifyArtifactWatcher {
    /// Creates the watcher and its dispatch thread.
    ///
    /// The dispatch thread ends once the watcher is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Watch`] if the OS notification service is
    /// unavailable and [`PlatformError::Io`] if the thread cannot start.
    pub fn new() -> Result<Self, PlatformError> {
        let registrations: Registrations = Arc::default();
        let (events, rx) = mpsc::channel::<Event>();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_change(&event.kind) => {
                    let _ = events.send(event);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("artifact watcher error: {e}"),
            },
            notify::Config::default(),
        )?;

        let table = Arc::clone(&registrations);
        thread::Builder::new()
            .name("aegis-artifact-watch".into())
            .spawn(move || dispatch(&rx, &table))?;

        Ok(Self {
            dirs: Mutex::new(DirWatches {
                watcher,
                counts: HashMap::new(),
            }),
            registrations,
            next_id: AtomicU64::new(0),
        })
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn dispatch(events: &mpsc::Receiver<Event>, registrations: &Mutex<HashMap<WatchId, Registration>>) {
    while let Ok(event) = events.recv() {
        let callbacks: Vec<_> = registrations
            .lock()
            .iter()
            .filter(|(_, r)| r.affected_by(&event))
            .map(|(id, r)| {
                tracing::debug!(watch = id.raw(), path = %r.path.display(), kind = ?event.kind, "artifact changed");
                Arc::clone(&r.on_change)
            })
            .collect();
        for on_change in callbacks {
            on_change();
        }
    }
    tracing::debug!("artifact watcher stopped");
}

impl ArtifactWatcher for NotifyArtifactWatcher {
    fn watch(&self, path: &Path, on_change: ArtifactCallback) -> WatchId {
        let id = WatchId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let dir = watch_dir(path);

        let mut guard = self.dirs.lock();
        let DirWatches { watcher, counts } = &mut *guard;
        // Re-adding an existing directory is harmless and recovers a watch
        // the OS dropped when the directory was deleted and recreated.
        let dir = match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                *counts.entry(dir.clone()).or_insert(0) += 1;
                Some(dir)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), dir = %dir.display(), "failed to watch artifact: {e}");
                None
            }
        };

        self.registrations.lock().insert(
            id,
            Registration {
                path: path.to_path_buf(),
                dir,
                on_change: Arc::from(on_change),
            },
        );
        tracing::debug!(watch = id.raw(), path = %path.display(), "watching artifact");
        id
    }

    fn unwatch(&self, id: WatchId) {
        let mut guard = self.dirs.lock();
        let Some(registration) = self.registrations.lock().remove(&id) else {
            return;
        };
        let Some(dir) = registration.dir else {
            return;
        };

        let DirWatches { watcher, counts } = &mut *guard;
        let Some(count) = counts.get_mut(&dir) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(&dir);
            if let Err(e) = watcher.unwatch(&dir) {
                tracing::debug!(dir = %dir.display(), "failed to release directory watch: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn notifier() -> (mpsc::Receiver<()>, ArtifactCallback) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        (
            rx,
            Box::new(move || {
                let _ = tx.lock().send(());
            }),
        )
    }

    #[test]
    fn replaced_artifact_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let apk = dir.path().join("base.apk");
        fs::write(&apk, b"v1").expect("write");

        let watcher = NotifyArtifactWatcher::new().expect("watcher");
        let (fired, on_change) = notifier();
        watcher.watch(&apk, on_change);

        // Same size, swapped in by rename like a reinstall.
        let staged = dir.path().join("staged.tmp");
        fs::write(&staged, b"v2").expect("stage");
        fs::rename(&staged, &apk).expect("replace");

        fired.recv_timeout(WAIT).expect("change noticed");
    }

    #[test]
    fn removed_artifact_fires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let apk = dir.path().join("base.apk");
        fs::write(&apk, b"v1").expect("write");

        let watcher = NotifyArtifactWatcher::new().expect("watcher");
        let (fired, on_change) = notifier();
        watcher.watch(&apk, on_change);

        fs::remove_file(&apk).expect("remove");
        fired.recv_timeout(WAIT).expect("removal noticed");
    }

    #[test]
    fn sibling_change_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let apk = dir.path().join("base.apk");
        let lib = dir.path().join("lib.so");
        fs::write(&apk, b"v1").expect("write");

        let watcher = NotifyArtifactWatcher::new().expect("watcher");
        let (apk_fired, on_apk) = notifier();
        let (lib_fired, on_lib) = notifier();
        watcher.watch(&apk, on_apk);
        watcher.watch(&lib, on_lib);

        fs::write(&lib, b"x").expect("write lib");
        lib_fired.recv_timeout(WAIT).expect("lib change noticed");
        assert!(apk_fired.try_recv().is_err());
    }

    #[test]
    fn callback_may_unwatch_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let apk = dir.path().join("base.apk");
        fs::write(&apk, b"v1").expect("write");

        let watcher = Arc::new(NotifyArtifactWatcher::new().expect("watcher"));
        let slot: Arc<Mutex<Option<WatchId>>> = Arc::default();
        let (tx, fired) = mpsc::channel();
        let tx = Mutex::new(tx);
        let on_change: ArtifactCallback = {
            let watcher = Arc::downgrade(&watcher);
            let slot = Arc::clone(&slot);
            Box::new(move || {
                if let (Some(watcher), Some(id)) = (watcher.upgrade(), slot.lock().take()) {
                    watcher.unwatch(id);
                }
                let _ = tx.lock().send(());
            })
        };
        *slot.lock() = Some(watcher.watch(&apk, on_change));

        fs::write(&apk, b"v2").expect("rewrite");
        fired.recv_timeout(WAIT).expect("change noticed");
        assert!(watcher.registrations.lock().is_empty());
        assert!(watcher.dirs.lock().counts.is_empty());

        fs::write(&apk, b"v3").expect("rewrite again");
        assert!(fired.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn directory_released_with_last_registration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = NotifyArtifactWatcher::new().expect("watcher");
        let first = watcher.watch(&dir.path().join("a.apk"), Box::new(|| {}));
        let second = watcher.watch(&dir.path().join("b.apk"), Box::new(|| {}));
        assert_eq!(watcher.dirs.lock().counts.get(dir.path()), Some(&2));

        watcher.unwatch(first);
        assert_eq!(watcher.dirs.lock().counts.get(dir.path()), Some(&1));
        watcher.unwatch(second);
        watcher.unwatch(second);
        assert!(watcher.dirs.lock().counts.is_empty());
    }

    #[test]
    fn missing_directory_is_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = NotifyArtifactWatcher::new().expect("watcher");
        let id = watcher.watch(&dir.path().join("gone/base.apk"), Box::new(|| {}));

        assert!(watcher.dirs.lock().counts.is_empty());
        watcher.unwatch(id);
        assert!(watcher.registrations.lock().is_empty());
    }
}
