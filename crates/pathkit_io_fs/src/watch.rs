//! Recursive directory watching on top of `notify`.
//!
//! Every registered directory gets its own non-recursive OS watch. Newly
//! created directories that pass the pattern set are registered on the fly,
//! so the registration set only grows while the subscription lives.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::location::{Directory, File, Location};
use crate::pattern::SpecPatternSet;
use crate::spec::{EnumOperationKind, FsError, FsResult, SpecWalkOptions};
use crate::util::absolutize_path;
use crate::walk::read_dir_sorted;

////////////////////////////////////////////////////////////////////////////////
// #region WatchModels

/// High-level change kinds delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumWatchKind {
    Created,
    Deleted,
    Modified,
}

/// Lifecycle of one watch session. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumWatchState {
    Registering,
    Running,
    /// Stopped by [`WatchSubscription::dispose`].
    Disposed,
    /// The OS facility went away without a dispose.
    ServiceClosed,
}

/// One accepted change below the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EnumWatchKind,
    pub location: Location,
    /// Path relative to the watched root.
    pub relative: PathBuf,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WatchEngine

struct SpecWatchShared {
    path_dir_root: PathBuf,
    spec_pats: SpecPatternSet,
    depth: Option<usize>,
    b_recursive: bool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    set_registered: Mutex<BTreeSet<PathBuf>>,
    state: Mutex<EnumWatchState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SpecWatchShared {
    fn register(&self, path_dir: &Path) -> FsResult<()> {
        let mut guard = lock(&self.watcher);
        let Some(watcher) = guard.as_mut() else {
            return Err(FsError::WatchServiceClosed);
        };
        watcher
            .watch(path_dir, RecursiveMode::NonRecursive)
            .map_err(|e| FsError::watch(path_dir, e))?;
        lock(&self.set_registered).insert(path_dir.to_path_buf());
        debug!(path = %path_dir.display(), "directory registered");
        Ok(())
    }

    /// Register `path_dir` and, in recursive mode, its non-pruned subtree.
    fn register_tree(&self, path_dir: &Path, path_rel: &Path) -> FsResult<()> {
        self.register(path_dir)?;
        if !self.b_recursive {
            return Ok(());
        }
        let n_depth = path_rel.components().count();
        let (l_dirs, _) = read_dir_sorted(path_dir)?;
        for dir_entry in l_dirs {
            let path_rel_sub = path_rel.join(&dir_entry.name);
            if self.spec_pats.is_pruned(&path_rel_sub) || !self.is_within_depth(n_depth + 1) {
                continue;
            }
            self.register_tree(&dir_entry.path, &path_rel_sub)?;
        }
        Ok(())
    }

    fn is_within_depth(&self, n_depth: usize) -> bool {
        self.depth.is_none_or(|n| n_depth < n)
    }

    fn set_state(&self, state: EnumWatchState) {
        let mut guard = lock(&self.state);
        if !matches!(*guard, EnumWatchState::Disposed | EnumWatchState::ServiceClosed) {
            *guard = state;
        }
    }

    fn is_pruned_path(&self, path_rel: &Path) -> bool {
        path_rel
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .any(|p| self.spec_pats.is_pruned(p))
    }

    fn handle(&self, kind: EnumWatchKind, path: &Path, tx_event: &Sender<WatchEvent>) {
        let path = absolutize_path(path);
        let Ok(path_rel) = path.strip_prefix(&self.path_dir_root) else {
            debug!(path = %path.display(), "notification outside watched root ignored");
            return;
        };
        if path_rel.as_os_str().is_empty() || self.is_pruned_path(path_rel) {
            return;
        }

        let meta = fs::symlink_metadata(&path).ok();
        if !self.spec_pats.accepts(path_rel, meta.as_ref()) {
            return;
        }
        let b_is_dir = match &meta {
            Some(m) => m.is_dir(),
            None => lock(&self.set_registered).contains(&path),
        };

        if kind == EnumWatchKind::Created
            && b_is_dir
            && self.b_recursive
            && self.is_within_depth(path_rel.components().count())
            && let Err(e) = self.register_tree(&path, path_rel)
        {
            warn!(path = %path.display(), error = %e, "failed to register created directory");
        }

        let location = if b_is_dir {
            Location::Directory(Directory::new(&path))
        } else {
            Location::File(File::new(&path))
        };
        let event = WatchEvent {
            kind,
            location,
            relative: path_rel.to_path_buf(),
        };
        if tx_event.send(event).is_err() {
            debug!("watch subscriber is gone");
        }
    }
}

/// Map one raw notification onto high-level kinds.
fn map_event(event: &Event) -> Vec<(EnumWatchKind, &Path)> {
    let l_paths: Vec<&Path> = event.paths.iter().map(PathBuf::as_path).collect();
    let all = |kind: EnumWatchKind| l_paths.iter().map(|p| (kind, *p)).collect::<Vec<_>>();
    match event.kind {
        EventKind::Create(_) => all(EnumWatchKind::Created),
        EventKind::Remove(_) => all(EnumWatchKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(EnumWatchKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(EnumWatchKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut l_mapped = Vec::with_capacity(2);
            if let Some(path_from) = l_paths.first() {
                l_mapped.push((EnumWatchKind::Deleted, *path_from));
            }
            if let Some(path_to) = l_paths.get(1) {
                l_mapped.push((EnumWatchKind::Created, *path_to));
            }
            l_mapped
        }
        // Backends that cannot tell the rename side apart.
        EventKind::Modify(ModifyKind::Name(_)) => l_paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    EnumWatchKind::Created
                } else {
                    EnumWatchKind::Deleted
                };
                (kind, *p)
            })
            .collect(),
        EventKind::Modify(_) => all(EnumWatchKind::Modified),
        _ => Vec::new(),
    }
}

fn run_loop(
    shared: Arc<SpecWatchShared>,
    rx_raw: Receiver<notify::Result<Event>>,
    rx_stop: Receiver<()>,
    tx_event: Sender<WatchEvent>,
) {
    loop {
        crossbeam_channel::select! {
            recv(rx_raw) -> msg => match msg {
                Ok(Ok(event)) => {
                    for (kind, path) in map_event(&event) {
                        shared.handle(kind, path, &tx_event);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "watch notification failed"),
                Err(_) => break,
            },
            recv(rx_stop) -> _ => break,
        }
    }
    shared.set_state(EnumWatchState::ServiceClosed);
    debug!(root = %shared.path_dir_root.display(), "watch loop finished");
}

/// A configured watch over one directory tree.
#[derive(Debug, Clone)]
pub struct WatchEngine {
    path_dir_root: PathBuf,
    spec_options: SpecWalkOptions,
    spec_pats: SpecPatternSet,
}

impl WatchEngine {
    pub fn new(root: impl AsRef<Path>, spec_options: SpecWalkOptions) -> FsResult<Self> {
        spec_options.validate()?;
        let spec_pats = SpecPatternSet::compile(&spec_options, EnumOperationKind::ScanFiles)?;
        Ok(Self {
            path_dir_root: absolutize_path(root.as_ref()),
            spec_options,
            spec_pats,
        })
    }

    pub fn root(&self) -> &Path {
        &self.path_dir_root
    }

    /// Register the tree and start the receive loop on its own thread.
    pub fn start(self) -> FsResult<WatchSubscription> {
        if !self.path_dir_root.is_dir() {
            return Err(FsError::NotADirectory {
                path: self.path_dir_root,
            });
        }

        let (tx_raw, rx_raw) = crossbeam_channel::unbounded::<notify::Result<Event>>();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx_raw.send(res);
            },
            Config::default(),
        )
        .map_err(|e| FsError::watch(&self.path_dir_root, e))?;

        let b_recursive = !self.spec_pats.is_direct_children_only();
        let shared = Arc::new(SpecWatchShared {
            path_dir_root: self.path_dir_root.clone(),
            spec_pats: self.spec_pats,
            depth: self.spec_options.depth,
            b_recursive,
            watcher: Mutex::new(Some(watcher)),
            set_registered: Mutex::new(BTreeSet::new()),
            state: Mutex::new(EnumWatchState::Registering),
        });
        shared.register_tree(&self.path_dir_root, Path::new(""))?;
        shared.set_state(EnumWatchState::Running);

        let (tx_stop, rx_stop) = crossbeam_channel::bounded::<()>(0);
        let (tx_event, rx_event) = crossbeam_channel::unbounded();
        let shared_loop = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("pathkit-watch".to_string())
            .spawn(move || run_loop(shared_loop, rx_raw, rx_stop, tx_event))
            .map_err(|e| FsError::io("spawn watch thread", &self.path_dir_root, e))?;

        Ok(WatchSubscription {
            shared,
            rx_event,
            tx_stop: Some(tx_stop),
            handle: Some(handle),
        })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WatchSubscription

/// Live handle of a running watch; disposes itself on drop.
pub struct WatchSubscription {
    shared: Arc<SpecWatchShared>,
    rx_event: Receiver<WatchEvent>,
    tx_stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchSubscription {
    /// Channel of accepted events, for `select!` or iteration.
    pub fn receiver(&self) -> &Receiver<WatchEvent> {
        &self.rx_event
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WatchEvent> {
        self.rx_event.recv_timeout(timeout).ok()
    }

    pub fn state(&self) -> EnumWatchState {
        *lock(&self.shared.state)
    }

    /// Snapshot of the registered directories.
    pub fn registered(&self) -> Vec<PathBuf> {
        lock(&self.shared.set_registered).iter().cloned().collect()
    }

    /// Stop the loop and close the OS watches. Idempotent.
    pub fn dispose(&mut self) {
        self.shared.set_state(EnumWatchState::Disposed);
        let watcher = lock(&self.shared.watcher).take();
        drop(watcher);
        self.tx_stop.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(root = %self.shared.path_dir_root.display(), "watch thread panicked");
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
