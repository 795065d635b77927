//! Watch registry: refcounted entries keyed by real path.
//!
//! The registry's map is the only shared mutable state in the subsystem.
//! It is guarded by a single lock scoped to registry operations and never
//! held across a callback invocation: delivery snapshots the slot list out
//! of the lock first, so a callback issuing a new watch cannot deadlock.
//!
//! Invariant: at most one backend subscription per (real path, recursive,
//! backend) key. Multiple logical watch handles share one entry via
//! reference counting, which is also the primary mitigation against OS
//! watch-descriptor exhaustion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex};

use crate::backend::SubscriptionId;
use crate::dispatch::FileWatcherEventKind;
use crate::error::WatchError;
use crate::polling::PollId;

/// Callback for single-file watches: `(file_name, kind, modified_time)`.
/// `file_name` is exactly the path the caller passed to `watch_file`. An
/// absent timestamp means "unknown, verify independently".
pub type FileWatchCallback = Arc<dyn Fn(&Path, FileWatcherEventKind, Option<SystemTime>) + Send + Sync>;

/// Callback for directory watches: `(raw_event_name, relative_file_name)`.
/// Intentionally closer to native semantics than `watch_file`'s, so
/// consumers can apply their own debounce/interpretation policy.
pub type DirWatchCallback = Arc<dyn Fn(&str, Option<&Path>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BackendKind {
    Native,
    Polling,
}

/// Registry key. One backend subscription exists per distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub real_path: PathBuf,
    pub recursive: bool,
    pub backend: BackendKind,
}

/// The backend resource an entry owns; released when the refcount drops
/// to zero.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BackendResource {
    Native(SubscriptionId),
    Polling(PollId),
}

pub(crate) type SlotId = u64;

pub(crate) const PHASE_ACTIVE: u8 = 0;
pub(crate) const PHASE_CLOSING: u8 = 1;
pub(crate) const PHASE_CLOSED: u8 = 2;

/// Per-handle delivery state implementing Active -> Closing -> Closed.
///
/// `delivering` serializes callback invocation against close: an in-flight
/// event is either delivered before `close()` returns or dropped, never
/// delivered after. Reentrant so a callback may close its own handle.
pub(crate) struct SlotState {
    pub phase: AtomicU8,
    pub delivering: ReentrantMutex<()>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(PHASE_ACTIVE),
            delivering: ReentrantMutex::new(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == PHASE_ACTIVE
    }
}

/// How the caller addressed the watch: `view_root` is the caller's original
/// spelling (possibly through a link), `real_root` the resolved path events
/// are keyed by. Lets delivered paths be renamed back to the caller's view.
#[derive(Debug, Clone)]
pub(crate) struct PathView {
    pub view_root: PathBuf,
    pub real_root: PathBuf,
}

impl PathView {
    /// Substitute the real-path prefix for the caller's view prefix.
    pub fn render(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.real_root) {
            Ok(rel) if !rel.as_os_str().is_empty() => self.view_root.join(rel),
            Ok(_) => self.view_root.clone(),
            Err(_) => path.to_path_buf(),
        }
    }
}

pub(crate) enum CallbackKind {
    File {
        /// The path the caller passed, delivered back verbatim.
        path: PathBuf,
        /// Last observed existence, for deriving Created vs Changed.
        exists: AtomicBool,
        cb: FileWatchCallback,
    },
    Directory {
        view: PathView,
        cb: DirWatchCallback,
    },
}

pub(crate) struct CallbackSlot {
    pub id: SlotId,
    pub state: SlotState,
    pub kind: CallbackKind,
}

struct WatchEntry {
    refcount: usize,
    resource: BackendResource,
    slots: Vec<Arc<CallbackSlot>>,
}

/// Registry of active watch entries.
pub(crate) struct WatchRegistry {
    inner: Mutex<HashMap<EntryKey, WatchEntry>>,
    next_slot: AtomicU64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_slot: AtomicU64::new(1),
        }
    }

    pub fn new_slot(&self, kind: CallbackKind) -> Arc<CallbackSlot> {
        Arc::new(CallbackSlot {
            id: self.next_slot.fetch_add(1, Ordering::Relaxed),
            state: SlotState::new(),
            kind,
        })
    }

    /// Create-or-reuse an entry. `arm` runs only when the key is absent and
    /// supplies the backend resource; on arm failure nothing is inserted.
    pub fn acquire_with<F>(&self, key: &EntryKey, arm: F) -> Result<(), WatchError>
    where
        F: FnOnce() -> Result<BackendResource, WatchError>,
    {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(key) {
            entry.refcount += 1;
            crate::debug_event!("registry", "shared", "{}", key.real_path.display());
            return Ok(());
        }
        let resource = arm()?;
        inner.insert(
            key.clone(),
            WatchEntry {
                refcount: 1,
                resource,
                slots: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn add_slot(&self, key: &EntryKey, slot: Arc<CallbackSlot>) {
        if let Some(entry) = self.inner.lock().get_mut(key) {
            entry.slots.push(slot);
        }
    }

    /// Drop one reference and its slot. Returns the backend resource when
    /// the refcount reaches zero; the caller releases it before its close
    /// returns, outside this lock.
    pub fn release(&self, key: &EntryKey, slot_id: SlotId) -> Option<BackendResource> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(key)?;
        entry.slots.retain(|s| s.id != slot_id);
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let entry = inner.remove(key).expect("entry present");
            crate::debug_event!("registry", "released", "{}", key.real_path.display());
            Some(entry.resource)
        } else {
            None
        }
    }

    /// Clone out the slot list so callbacks run without the registry lock.
    pub fn snapshot_slots(&self, key: &EntryKey) -> Vec<Arc<CallbackSlot>> {
        self.inner
            .lock()
            .get(key)
            .map(|e| e.slots.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().len()
    }
}
