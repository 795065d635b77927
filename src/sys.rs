//! Public watch surface: [`WatchSystem`] and its options.
//!
//! `watch_file` delivers normalized [`FileWatcherEventKind`] events with the
//! exact path the caller passed; `watch_directory` stays intentionally close
//! to native semantics, handing consumers raw event names and relative file
//! names so they can apply their own interpretation policy.
//!
//! Backend selection: `UseFsEvents` arms a native subscription and, when the
//! platform reports `BackendUnavailable` and the options allow it, falls back
//! to polling. Resource exhaustion always surfaces.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use crate::backend::{FileSystem, RawEvent};
use crate::config::WatchConfig;
use crate::dispatch::Dispatcher;
use crate::error::WatchError;
use crate::handle::FileWatcher;
use crate::polling::{PollPriority, PollSchedule, PollingEngine};
use crate::registry::{
    BackendKind, BackendResource, CallbackKind, EntryKey, PathView, WatchRegistry,
};
use crate::resolver;

pub use crate::registry::{DirWatchCallback, FileWatchCallback};

/// Backend preference for single-file watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchFileKind {
    /// Timer-driven polling with priority tiers.
    PriorityPollingInterval,
    /// OS-native change notifications.
    UseFsEvents,
}

/// Options for [`WatchSystem::watch_file`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub kind: WatchFileKind,
    /// Fall back to polling when native watching is unavailable.
    pub fall_back_polling: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            kind: WatchFileKind::UseFsEvents,
            fall_back_polling: true,
        }
    }
}

/// Backend preference for directory watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDirectoryKind {
    UseFsEvents,
    Polling,
}

/// Options for [`WatchSystem::watch_directory`].
#[derive(Debug, Clone)]
pub struct WatchDirectoryOptions {
    pub kind: WatchDirectoryKind,
    pub fall_back_polling: bool,
}

impl Default for WatchDirectoryOptions {
    fn default() -> Self {
        Self {
            kind: WatchDirectoryKind::UseFsEvents,
            fall_back_polling: true,
        }
    }
}

/// State shared between the system and every handle it issued. A handle
/// keeps this alive until closed, so backend resources are always released
/// through a live registry.
pub(crate) struct SysShared {
    pub fs: Arc<dyn FileSystem>,
    pub registry: Arc<WatchRegistry>,
    pub polling: PollingEngine,
    pub dispatcher: Arc<Dispatcher>,
}

/// The watch subsystem. Cheap to share; all methods take `&self`.
pub struct WatchSystem {
    shared: Arc<SysShared>,
}

impl WatchSystem {
    pub fn new(fs: Arc<dyn FileSystem>, config: WatchConfig) -> Self {
        let registry = Arc::new(WatchRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            fs.clone(),
            registry.clone(),
            Duration::from_millis(config.coalesce_window_ms),
        ));
        let polling = PollingEngine::new(fs.clone(), config.polling.clone());
        Self {
            shared: Arc::new(SysShared {
                fs,
                registry,
                polling,
                dispatcher,
            }),
        }
    }

    pub fn with_defaults(fs: Arc<dyn FileSystem>) -> Self {
        Self::new(fs, WatchConfig::default())
    }

    /// The file-system capability backing this system.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.shared.fs
    }

    /// Watch a single file. The callback receives the path exactly as
    /// passed here, the normalized event kind, and the file's modification
    /// time when it could be obtained.
    ///
    /// `polling_interval_ms` pins a polling watch to a fixed interval;
    /// `None` uses the priority tiers.
    pub fn watch_file(
        &self,
        path: &Path,
        callback: FileWatchCallback,
        polling_interval_ms: Option<u64>,
        options: &WatchOptions,
    ) -> Result<FileWatcher, WatchError> {
        match options.kind {
            WatchFileKind::UseFsEvents => {
                match self.watch_file_native(path, callback.clone()) {
                    Err(WatchError::BackendUnavailable { path: p, reason })
                        if options.fall_back_polling =>
                    {
                        crate::log_event!("sys", "polling fallback", "{}: {}", p.display(), reason);
                        self.watch_file_polling(path, callback, polling_interval_ms)
                    }
                    other => other,
                }
            }
            WatchFileKind::PriorityPollingInterval => {
                self.watch_file_polling(path, callback, polling_interval_ms)
            }
        }
    }

    /// Watch a directory, non-recursively or recursively. The callback
    /// receives the raw event name (`"rename"` / `"change"`) and the file
    /// name relative to the watched root, when the backend reported one.
    pub fn watch_directory(
        &self,
        path: &Path,
        recursive: bool,
        callback: DirWatchCallback,
        options: &WatchDirectoryOptions,
    ) -> Result<FileWatcher, WatchError> {
        match options.kind {
            WatchDirectoryKind::UseFsEvents => {
                match self.watch_directory_native(path, recursive, callback.clone()) {
                    Err(WatchError::BackendUnavailable { path: p, reason })
                        if options.fall_back_polling =>
                    {
                        crate::log_event!("sys", "polling fallback", "{}: {}", p.display(), reason);
                        self.watch_directory_polling(path, recursive, callback)
                    }
                    other => other,
                }
            }
            WatchDirectoryKind::Polling => self.watch_directory_polling(path, recursive, callback),
        }
    }

    /// Write `contents` to `path`, creating missing parent directories.
    pub fn write_file(&self, path: &Path, contents: &str) -> Result<(), WatchError> {
        self.shared
            .fs
            .write_file(path, contents)
            .map_err(|e| WatchError::io(path, e))
    }

    pub fn delete_file(&self, path: &Path) -> Result<(), WatchError> {
        self.shared
            .fs
            .delete_file(path)
            .map_err(|e| WatchError::io(path, e))
    }

    /// Set a path's modification time, simulating a touch.
    pub fn set_modified_time(&self, path: &Path, mtime: SystemTime) -> Result<(), WatchError> {
        self.shared
            .fs
            .set_modified_time(path, mtime)
            .map_err(|e| WatchError::io(path, e))
    }

    /// Current modification time, or `None` when the path is not stat-able.
    pub fn get_modified_time(&self, path: &Path) -> Option<SystemTime> {
        self.shared.fs.get_modified_time(path)
    }

    fn watch_file_native(
        &self,
        path: &Path,
        cb: FileWatchCallback,
    ) -> Result<FileWatcher, WatchError> {
        match self.try_watch_file_native(path, cb.clone()) {
            // The link target may have been swapped between resolution and
            // arming; re-resolve once.
            Err(WatchError::Io { .. }) => self.try_watch_file_native(path, cb),
            other => other,
        }
    }

    fn try_watch_file_native(
        &self,
        path: &Path,
        cb: FileWatchCallback,
    ) -> Result<FileWatcher, WatchError> {
        let shared = &self.shared;
        let resolved = resolver::resolve_or_literal(shared.fs.as_ref(), path);
        let key = EntryKey {
            real_path: resolved.real_path,
            recursive: false,
            backend: BackendKind::Native,
        };
        self.arm_native(&key)?;
        let exists = shared.fs.stat(&key.real_path).is_ok();
        let slot = shared.registry.new_slot(CallbackKind::File {
            path: path.to_path_buf(),
            exists: AtomicBool::new(exists),
            cb,
        });
        shared.registry.add_slot(&key, slot.clone());
        Ok(FileWatcher::new(shared.clone(), key, slot))
    }

    fn watch_file_polling(
        &self,
        path: &Path,
        cb: FileWatchCallback,
        interval_ms: Option<u64>,
    ) -> Result<FileWatcher, WatchError> {
        let shared = &self.shared;
        let resolved = resolver::resolve_or_literal(shared.fs.as_ref(), path);
        let key = EntryKey {
            real_path: resolved.real_path,
            recursive: false,
            backend: BackendKind::Polling,
        };
        let schedule = match interval_ms {
            Some(ms) => PollSchedule::Fixed(Duration::from_millis(ms)),
            None => PollSchedule::Tiered(PollPriority::High),
        };
        self.arm_polling(&key, schedule)?;
        let exists = shared.fs.stat(&key.real_path).is_ok();
        let slot = shared.registry.new_slot(CallbackKind::File {
            path: path.to_path_buf(),
            exists: AtomicBool::new(exists),
            cb,
        });
        shared.registry.add_slot(&key, slot.clone());
        Ok(FileWatcher::new(shared.clone(), key, slot))
    }

    fn watch_directory_native(
        &self,
        path: &Path,
        recursive: bool,
        cb: DirWatchCallback,
    ) -> Result<FileWatcher, WatchError> {
        match self.try_watch_directory_native(path, recursive, cb.clone()) {
            Err(WatchError::Io { .. }) => self.try_watch_directory_native(path, recursive, cb),
            other => other,
        }
    }

    fn try_watch_directory_native(
        &self,
        path: &Path,
        recursive: bool,
        cb: DirWatchCallback,
    ) -> Result<FileWatcher, WatchError> {
        let shared = &self.shared;
        let resolved = resolver::resolve_or_literal(shared.fs.as_ref(), path);
        let key = EntryKey {
            real_path: resolved.real_path.clone(),
            recursive,
            backend: BackendKind::Native,
        };
        self.arm_native(&key)?;
        let slot = shared.registry.new_slot(CallbackKind::Directory {
            view: PathView {
                view_root: path.to_path_buf(),
                real_root: resolved.real_path,
            },
            cb,
        });
        shared.registry.add_slot(&key, slot.clone());
        Ok(FileWatcher::new(shared.clone(), key, slot))
    }

    /// Directory polling watches the directory's own metadata: child
    /// creation and deletion bump the directory mtime, surfacing as a raw
    /// `change` with no file name. Coarser than native, but available
    /// everywhere, including recursive watches on Linux.
    fn watch_directory_polling(
        &self,
        path: &Path,
        recursive: bool,
        cb: DirWatchCallback,
    ) -> Result<FileWatcher, WatchError> {
        let shared = &self.shared;
        let resolved = resolver::resolve_or_literal(shared.fs.as_ref(), path);
        let key = EntryKey {
            real_path: resolved.real_path.clone(),
            recursive,
            backend: BackendKind::Polling,
        };
        self.arm_polling(&key, PollSchedule::Tiered(PollPriority::Medium))?;
        let slot = shared.registry.new_slot(CallbackKind::Directory {
            view: PathView {
                view_root: path.to_path_buf(),
                real_root: resolved.real_path,
            },
            cb,
        });
        shared.registry.add_slot(&key, slot.clone());
        Ok(FileWatcher::new(shared.clone(), key, slot))
    }

    fn arm_native(&self, key: &EntryKey) -> Result<(), WatchError> {
        let dispatcher = self.shared.dispatcher.clone();
        let sink_key = key.clone();
        self.shared.registry.acquire_with(key, || {
            let sink = Arc::new(move |event: RawEvent| dispatcher.dispatch_raw(&sink_key, &event));
            let id = self.shared.fs.subscribe(&key.real_path, key.recursive, sink)?;
            Ok(BackendResource::Native(id))
        })
    }

    fn arm_polling(&self, key: &EntryKey, schedule: PollSchedule) -> Result<(), WatchError> {
        let dispatcher = self.shared.dispatcher.clone();
        let sink_key = key.clone();
        self.shared.registry.acquire_with(key, || {
            let sink = Arc::new(move |kind| dispatcher.dispatch_poll(&sink_key, kind));
            let id = self.shared.polling.add(&key.real_path, schedule, sink);
            Ok(BackendResource::Polling(id))
        })
    }
}
