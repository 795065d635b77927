//! Opaque watch handle with idempotent, synchronous close.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::registry::{BackendResource, CallbackSlot, EntryKey, PHASE_ACTIVE, PHASE_CLOSED, PHASE_CLOSING};
use crate::sys::SysShared;

/// Handle to one logical watch. Dropping the handle closes the watch.
pub struct FileWatcher {
    shared: Arc<SysShared>,
    key: EntryKey,
    slot: Arc<CallbackSlot>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    pub(crate) fn new(shared: Arc<SysShared>, key: EntryKey, slot: Arc<CallbackSlot>) -> Self {
        Self { shared, key, slot }
    }

    /// Stop delivery and release the backend resource if this was the last
    /// handle sharing it.
    ///
    /// Synchronous: once this returns, the callback will not be invoked
    /// again; an in-flight delivery completes first. Idempotent: a second
    /// close is a no-op, not an error.
    pub fn close(&self) {
        if self
            .slot
            .state
            .phase
            .compare_exchange(PHASE_ACTIVE, PHASE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        {
            // Reentrant lock: a callback closing its own handle already
            // holds it and must not deadlock here.
            let _delivering = self.slot.state.delivering.lock();
            self.slot.state.phase.store(PHASE_CLOSED, Ordering::SeqCst);
        }
        if let Some(resource) = self.shared.registry.release(&self.key, self.slot.id) {
            match resource {
                BackendResource::Native(id) => self.shared.fs.unsubscribe(id),
                BackendResource::Polling(id) => self.shared.polling.remove(id),
            }
        }
        crate::debug_event!("handle", "closed", "{}", self.key.real_path.display());
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
