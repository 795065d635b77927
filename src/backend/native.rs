//! Real file-system backend: std::fs plus `notify` subscriptions.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use filetime::FileTime;
use notify::{ErrorKind as NotifyErrorKind, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::{FileKind, FileStat, FileSystem, RawEvent, RawEventSink, SubscriptionId};
use crate::error::WatchError;
use crate::flavor::{OsFlavor, RawEventName};

/// File system backed by the operating system.
///
/// Each subscription owns one `notify::RecommendedWatcher`; dropping it on
/// unsubscribe releases the OS watch descriptor synchronously.
#[derive(Default)]
pub struct OsFileSystem {
    subscriptions: Mutex<HashMap<u64, notify::RecommendedWatcher>>,
    next_id: AtomicU64,
}

impl OsFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for OsFileSystem {
    fn flavor(&self) -> OsFlavor {
        OsFlavor::host()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        stat_from(std::fs::metadata(path)?)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        stat_from(std::fs::symlink_metadata(path)?)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn set_modified_time(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        filetime::set_file_mtime(path, FileTime::from_system_time(mtime))
    }

    fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
        sink: RawEventSink,
    ) -> Result<SubscriptionId, WatchError> {
        if recursive && !self.flavor().supports_recursive_native() {
            return Err(WatchError::unavailable(
                path,
                "recursive native watches cannot span symlinked subtrees on this platform",
            ));
        }

        let root = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for raw in normalize(&root, &event) {
                        sink(raw);
                    }
                }
                Err(e) => tracing::warn!("[native] event stream error: {e}"),
            }
        })
        .map_err(|e| map_notify_error(path, e))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .map_err(|e| map_notify_error(path, e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().insert(id, watcher);
        crate::debug_event!("native", "subscribed", "{}", path.display());
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        // Dropping the watcher releases the descriptor before we return.
        if self.subscriptions.lock().remove(&id.0).is_some() {
            crate::debug_event!("native", "unsubscribed", "{:?}", id);
        }
    }
}

fn stat_from(meta: std::fs::Metadata) -> io::Result<FileStat> {
    let kind = if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Directory
    } else {
        FileKind::File
    };
    Ok(FileStat {
        kind,
        mtime: meta.modified()?,
        size: meta.len(),
    })
}

/// Map a notify event onto the raw rename/change taxonomy, with paths made
/// relative to the subscription root.
fn normalize(root: &Path, event: &notify::Event) -> Vec<RawEvent> {
    let name = match event.kind {
        notify::EventKind::Create(_) | notify::EventKind::Remove(_) => RawEventName::Rename,
        notify::EventKind::Modify(_) => RawEventName::Change,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| RawEvent {
            name,
            file_name: p.strip_prefix(root).ok().and_then(|rel| {
                if rel.as_os_str().is_empty() {
                    None
                } else {
                    Some(rel.to_path_buf())
                }
            }),
        })
        .collect()
}

fn map_notify_error(path: &Path, e: notify::Error) -> WatchError {
    let message = e.to_string();
    match e.kind {
        NotifyErrorKind::MaxFilesWatch => WatchError::ResourceExhausted {
            path: path.to_path_buf(),
        },
        NotifyErrorKind::Io(source) => WatchError::io(path, source),
        _ => WatchError::unavailable(path, message),
    }
}
