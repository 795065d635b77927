//! Symlink-aware cross-platform file watching.
//!
//! This crate notifies callers when files change, are created, or deleted,
//! including through symbolic links, using either OS-native change
//! notifications or a timer-driven polling fallback.
//!
//! # Architecture
//!
//! ```text
//! WatchSystem
//!   - resolver: symlink detection, real-path computation
//!   - registry: refcounted watch entries, one subscription per
//!     (real path, recursive, backend)
//!   - polling:  single cooperative timer thread, priority tiers
//!   - backend:  FileSystem capability (OsFileSystem / SimFileSystem)
//!   - dispatch: coalescing, link-view rendering, callback delivery
//! ```
//!
//! Native event semantics differ per OS flavor (Linux, Windows, macOS);
//! the [`flavor`] module models those differences explicitly, including the
//! macOS rename/change equivalence class.

pub mod backend;
pub mod config;
mod dispatch;
pub mod error;
pub mod flavor;
mod handle;
pub mod logging;
mod polling;
mod registry;
pub mod resolver;
mod sys;

pub use backend::{FileKind, FileStat, FileSystem, OsFileSystem, RawEvent, SimFileSystem};
pub use config::WatchConfig;
pub use dispatch::FileWatcherEventKind;
pub use error::WatchError;
pub use flavor::{OsFlavor, RawEventName};
pub use handle::FileWatcher;
pub use polling::PollPriority;
pub use resolver::Resolved;
pub use sys::{
    DirWatchCallback, FileWatchCallback, WatchDirectoryKind, WatchDirectoryOptions, WatchFileKind,
    WatchOptions, WatchSystem,
};
