//! File-system capability behind the watch subsystem.
//!
//! All access to the real file system goes through the [`FileSystem`]
//! trait: stat-ing paths, reading links, mutating files, and subscribing to
//! raw native change events. Two implementations are provided:
//!
//! - [`OsFileSystem`]: the real thing, with `notify` supplying native
//!   change notifications.
//! - [`SimFileSystem`]: an in-memory tree that synthesizes raw events per
//!   OS flavor, used for deterministic cross-flavor tests.

mod native;
mod sim;

pub use native::OsFileSystem;
pub use sim::SimFileSystem;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::WatchError;
use crate::flavor::{OsFlavor, RawEventName};

/// Token for one raw-event subscription. Passed back to [`FileSystem::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// A raw native event as delivered by the OS. Requires normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: RawEventName,
    /// Path relative to the subscription root, or `None` when the OS did
    /// not report one.
    pub file_name: Option<PathBuf>,
}

/// Sink invoked for every raw event of a subscription. May be called from
/// any notification thread, concurrently with registry mutation.
pub type RawEventSink = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// What kind of node a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

/// Snapshot of a path's metadata.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub kind: FileKind,
    pub mtime: SystemTime,
    pub size: u64,
}

/// The black-box file-system capability: metadata, mutation primitives,
/// and `subscribe(path, recursive) -> stream of raw OS events`.
///
/// Object safe; the watch subsystem holds it as `Arc<dyn FileSystem>`.
pub trait FileSystem: Send + Sync + 'static {
    /// The OS flavor governing native event shape.
    fn flavor(&self) -> OsFlavor;

    /// Stat a path, following symlinks.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Stat a path without following a trailing symlink.
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    /// Read the target of a symlink.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Fully resolve a path, removing all symlink indirection. Fails if the
    /// path (or a link target along the way) does not exist.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Write a file, creating missing parent directories.
    fn write_file(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Delete a file.
    fn delete_file(&self, path: &Path) -> io::Result<()>;

    /// Set a path's modification time, simulating a touch.
    fn set_modified_time(&self, path: &Path, mtime: SystemTime) -> io::Result<()>;

    /// Current modification time, or `None` when the path is not stat-able.
    fn get_modified_time(&self, path: &Path) -> Option<SystemTime> {
        self.stat(path).ok().map(|s| s.mtime)
    }

    /// Start a native subscription on `path`. Raw events flow into `sink`
    /// until [`FileSystem::unsubscribe`] releases the OS resource.
    fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
        sink: RawEventSink,
    ) -> Result<SubscriptionId, WatchError>;

    /// Release a subscription. Synchronous: the OS resource is freed before
    /// this returns. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
