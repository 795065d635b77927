//! Event dispatcher: normalization, coalescing, and callback delivery.
//!
//! Raw backend events and polling transitions both funnel through here.
//! The dispatcher snapshots callback slots out of the registry lock before
//! invoking anything, collapses identical consecutive deliveries inside a
//! short window, renders link-relative paths back into the caller's view,
//! and enforces the per-handle Active -> Closing -> Closed state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::{FileSystem, RawEvent};
use crate::flavor::{OsFlavor, RawEventName};
use crate::registry::{CallbackKind, CallbackSlot, EntryKey, SlotId, WatchRegistry};

/// Normalized event kind delivered to `watch_file` callbacks, produced
/// uniformly regardless of backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileWatcherEventKind {
    Created,
    Changed,
    Deleted,
}

/// Key identifying a delivery for coalescing purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CoalesceKey {
    Raw(u8, Option<PathBuf>),
    File(FileWatcherEventKind, PathBuf),
}

/// On macOS, rename and change fold into one class for matching purposes;
/// elsewhere they stay distinct.
fn raw_class(flavor: OsFlavor, name: RawEventName) -> u8 {
    if flavor == OsFlavor::MacOs {
        0
    } else {
        match name {
            RawEventName::Rename => 1,
            RawEventName::Change => 2,
        }
    }
}

pub(crate) struct Dispatcher {
    fs: Arc<dyn FileSystem>,
    registry: Arc<WatchRegistry>,
    window: Duration,
    recent: Mutex<HashMap<(SlotId, CoalesceKey), Instant>>,
}

impl Dispatcher {
    pub fn new(fs: Arc<dyn FileSystem>, registry: Arc<WatchRegistry>, window: Duration) -> Self {
        Self {
            fs,
            registry,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Fan a raw backend event out to every callback of an entry.
    pub fn dispatch_raw(&self, key: &EntryKey, event: &RawEvent) {
        let flavor = self.fs.flavor();
        for slot in self.registry.snapshot_slots(key) {
            match &slot.kind {
                CallbackKind::Directory { view, cb } => {
                    let name = event.file_name.as_deref().map(|p| {
                        if p.is_absolute() {
                            view.render(p)
                        } else {
                            p.to_path_buf()
                        }
                    });
                    let coalesce = CoalesceKey::Raw(raw_class(flavor, event.name), name.clone());
                    if self.coalesced(slot.id, coalesce) {
                        continue;
                    }
                    deliver(&slot, || cb(event.name.as_str(), name.as_deref()));
                }
                CallbackKind::File { path, exists, cb } => {
                    // A watch-file subscription filters down to exactly the
                    // watched path; everything arriving here is for it.
                    let now_exists = self.fs.stat(&key.real_path).is_ok();
                    let was = exists.swap(now_exists, Ordering::SeqCst);
                    let kind = match (was, now_exists) {
                        (false, true) => FileWatcherEventKind::Created,
                        (true, false) => FileWatcherEventKind::Deleted,
                        (true, true) => FileWatcherEventKind::Changed,
                        (false, false) => continue,
                    };
                    let mtime = if now_exists {
                        self.fs.get_modified_time(&key.real_path)
                    } else {
                        None
                    };
                    if self.coalesced(slot.id, CoalesceKey::File(kind, path.clone())) {
                        continue;
                    }
                    deliver(&slot, || cb(path, kind, mtime));
                }
            }
        }
    }

    /// Fan a polling transition out to every callback of an entry.
    pub fn dispatch_poll(&self, key: &EntryKey, kind: FileWatcherEventKind) {
        let flavor = self.fs.flavor();
        for slot in self.registry.snapshot_slots(key) {
            match &slot.kind {
                CallbackKind::File { path, exists, cb } => {
                    exists.store(kind != FileWatcherEventKind::Deleted, Ordering::SeqCst);
                    let mtime = if kind == FileWatcherEventKind::Deleted {
                        None
                    } else {
                        self.fs.get_modified_time(&key.real_path)
                    };
                    if self.coalesced(slot.id, CoalesceKey::File(kind, path.clone())) {
                        continue;
                    }
                    deliver(&slot, || cb(path, kind, mtime));
                }
                CallbackKind::Directory { cb, .. } => {
                    // Directory polling exposes the raw taxonomy: existence
                    // transitions read as rename, content as change.
                    let name = match kind {
                        FileWatcherEventKind::Created | FileWatcherEventKind::Deleted => {
                            RawEventName::Rename
                        }
                        FileWatcherEventKind::Changed => RawEventName::Change,
                    };
                    if self.coalesced(slot.id, CoalesceKey::Raw(raw_class(flavor, name), None)) {
                        continue;
                    }
                    deliver(&slot, || cb(name.as_str(), None));
                }
            }
        }
    }

    /// True when an identical delivery already happened inside the window.
    /// Legitimately distinct repeats spread further apart pass through.
    fn coalesced(&self, slot: SlotId, key: CoalesceKey) -> bool {
        if self.window.is_zero() {
            return false;
        }
        let now = Instant::now();
        let mut recent = self.recent.lock();
        recent.retain(|_, at| now.duration_since(*at) < self.window);
        if recent.contains_key(&(slot, key.clone())) {
            crate::debug_event!("dispatch", "coalesced", "{key:?}");
            return true;
        }
        recent.insert((slot, key), now);
        false
    }
}

/// Invoke a callback unless its handle closed. The delivery lock makes
/// close-vs-delivery a clean race: an in-flight event completes before
/// `close()` returns, and nothing fires after.
fn deliver(slot: &CallbackSlot, invoke: impl FnOnce()) {
    if !slot.state.is_active() {
        return;
    }
    let _guard = slot.state.delivering.lock();
    if !slot.state.is_active() {
        return;
    }
    invoke();
}
