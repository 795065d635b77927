//! Path resolution: symlink detection and real-path computation.
//!
//! Resolution is re-attempted on every watch (re)arm, never cached
//! indefinitely, since link targets can be replaced while the process runs.
//! A broken or missing target yields [`WatchError::Resolution`]; callers
//! degrade to watching the literal path rather than failing the subscribe.

use std::path::{Path, PathBuf};

use crate::backend::{FileKind, FileSystem};
use crate::error::WatchError;

/// Outcome of resolving a watch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Fully resolved path with all symlink indirection removed.
    pub real_path: PathBuf,
    /// Whether the path itself or any ancestor was a symlink.
    pub via_symlink: bool,
}

/// Resolve `path` to its real path, reporting whether a symlink sat
/// anywhere along the way.
///
/// The final component is allowed to not exist yet (a watch may be placed
/// on a file before its first write); its parent chain is resolved instead.
pub fn resolve(fs: &dyn FileSystem, path: &Path) -> Result<Resolved, WatchError> {
    if !has_symlink_component(fs, path) {
        return Ok(Resolved {
            real_path: path.to_path_buf(),
            via_symlink: false,
        });
    }

    let real_path = match fs.canonicalize(path) {
        Ok(real) => real,
        Err(_) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => fs
                .canonicalize(parent)
                .map(|p| p.join(name))
                .map_err(|e| WatchError::Resolution {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?,
            _ => {
                return Err(WatchError::Resolution {
                    path: path.to_path_buf(),
                    reason: "cannot resolve a bare root".to_string(),
                });
            }
        },
    };

    Ok(Resolved {
        real_path,
        via_symlink: true,
    })
}

/// Resolve, falling back to the literal path when resolution fails.
pub(crate) fn resolve_or_literal(fs: &dyn FileSystem, path: &Path) -> Resolved {
    match resolve(fs, path) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!("[resolver] {e}; watching literal path");
            Resolved {
                real_path: path.to_path_buf(),
                via_symlink: false,
            }
        }
    }
}

fn has_symlink_component(fs: &dyn FileSystem, path: &Path) -> bool {
    let mut probe = PathBuf::new();
    for comp in path.components() {
        probe.push(comp);
        if let Ok(stat) = fs.lstat(&probe) {
            if stat.kind == FileKind::Symlink {
                return true;
            }
        }
    }
    false
}
