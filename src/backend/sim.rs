//! In-memory file system with per-flavor native event synthesis.
//!
//! The deterministic counterpart to [`super::OsFileSystem`]: a tree of
//! files, directories, and symlinks whose mutations synthesize raw events
//! following the flavor table in [`crate::flavor`] and deliver them
//! synchronously to every covering subscription. Scope matching happens on
//! canonical paths, so edits made through a symlink surface in the real
//! subtree's watchers (and vice versa) while parallel trees never
//! cross-talk.
//!
//! Only the terminal node of a write emits events; intermediate directories
//! created on the way stay silent, matching watchers that are armed before
//! the tree exists.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use super::{FileKind, FileStat, FileSystem, RawEvent, RawEventSink, SubscriptionId};
use crate::error::WatchError;
use crate::flavor::{OsFlavor, RawEventName};

/// Simulated file system for a chosen OS flavor.
pub struct SimFileSystem {
    flavor: OsFlavor,
    state: Mutex<SimState>,
    next_sub: AtomicU64,
}

struct SimState {
    nodes: BTreeMap<PathBuf, SimNode>,
    subs: HashMap<u64, SimSubscription>,
    last_mtime: SystemTime,
}

#[derive(Debug, Clone)]
enum SimNode {
    File { mtime: SystemTime, size: u64 },
    Dir { mtime: SystemTime },
    Symlink { target: PathBuf, mtime: SystemTime },
}

struct SimSubscription {
    canonical: PathBuf,
    recursive: bool,
    is_file: bool,
    sink: RawEventSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Change,
    MtimeTouch,
    Delete,
}

impl SimFileSystem {
    pub fn new(flavor: OsFlavor) -> Self {
        let mut nodes = BTreeMap::new();
        let now = SystemTime::now();
        nodes.insert(PathBuf::from("/"), SimNode::Dir { mtime: now });
        Self {
            flavor,
            state: Mutex::new(SimState {
                nodes,
                subs: HashMap::new(),
                last_mtime: now,
            }),
            next_sub: AtomicU64::new(1),
        }
    }

    /// Create a symlink at `link` pointing to `target`, creating missing
    /// parent directories. Emits no events; links are set up before watches
    /// in every scenario this backend serves.
    pub fn symlink(&self, target: impl Into<PathBuf>, link: impl AsRef<Path>) -> io::Result<()> {
        let mut st = self.state.lock();
        let link = resolve_path(&st, link.as_ref(), 0);
        if st.nodes.contains_key(&link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", link.display()),
            ));
        }
        let now = next_mtime(&mut st);
        if let Some(parent) = link.parent() {
            ensure_dirs(&mut st, parent, now);
        }
        st.nodes.insert(
            link,
            SimNode::Symlink {
                target: target.into(),
                mtime: now,
            },
        );
        Ok(())
    }

    fn mutate(&self, path: &Path, op: Op, mtime: Option<SystemTime>, size: u64) -> io::Result<()> {
        let mut st = self.state.lock();
        let canon = resolve_path(&st, path, 0);
        let now = mtime.unwrap_or_else(|| next_mtime(&mut st));

        let op = match op {
            Op::Create | Op::Change => {
                if matches!(st.nodes.get(&canon), Some(SimNode::Dir { .. })) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{} is a directory", canon.display()),
                    ));
                }
                let created = !st.nodes.contains_key(&canon);
                if let Some(parent) = canon.parent() {
                    ensure_dirs(&mut st, parent, now);
                    if created {
                        touch(&mut st, parent, now);
                    }
                }
                st.nodes
                    .insert(canon.clone(), SimNode::File { mtime: now, size });
                if created { Op::Create } else { Op::Change }
            }
            Op::MtimeTouch => {
                match st.nodes.get_mut(&canon) {
                    Some(SimNode::File { mtime, .. })
                    | Some(SimNode::Dir { mtime })
                    | Some(SimNode::Symlink { mtime, .. }) => *mtime = now,
                    None => return Err(not_found(&canon)),
                }
                Op::MtimeTouch
            }
            Op::Delete => {
                if st.nodes.remove(&canon).is_none() {
                    return Err(not_found(&canon));
                }
                if let Some(parent) = canon.parent() {
                    let parent_mtime = next_mtime(&mut st);
                    touch(&mut st, parent, parent_mtime);
                }
                Op::Delete
            }
        };

        let deliveries = self.collect_deliveries(&st, &canon, op);
        // Sinks run without the tree lock held: delivery re-enters this
        // backend for mtime probes.
        drop(st);
        for (sink, event) in deliveries {
            sink(event);
        }
        Ok(())
    }

    fn collect_deliveries(
        &self,
        st: &SimState,
        target: &Path,
        op: Op,
    ) -> Vec<(RawEventSink, RawEvent)> {
        let names = synthesize(self.flavor, op);
        let mut out = Vec::new();
        for sub in st.subs.values() {
            let Some(rel) = scope_match(sub, target) else {
                continue;
            };
            for &name in names {
                out.push((
                    sub.sink.clone(),
                    RawEvent {
                        name,
                        file_name: Some(rel.clone()),
                    },
                ));
            }
            if op == Op::Create && sub.recursive && self.flavor.reports_container_change() {
                if let Some(container) = rel.parent() {
                    if !container.as_os_str().is_empty() {
                        out.push((
                            sub.sink.clone(),
                            RawEvent {
                                name: RawEventName::Change,
                                file_name: Some(container.to_path_buf()),
                            },
                        ));
                    }
                }
            }
        }
        out
    }
}

impl FileSystem for SimFileSystem {
    fn flavor(&self) -> OsFlavor {
        self.flavor
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let st = self.state.lock();
        let canon = resolve_path(&st, path, 0);
        match st.nodes.get(&canon) {
            Some(node) => Ok(stat_of(node)),
            None => Err(not_found(&canon)),
        }
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        let st = self.state.lock();
        let literal = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => resolve_path(&st, parent, 0).join(name),
            _ => PathBuf::from("/"),
        };
        match st.nodes.get(&literal) {
            Some(SimNode::Symlink { mtime, .. }) => Ok(FileStat {
                kind: FileKind::Symlink,
                mtime: *mtime,
                size: 0,
            }),
            Some(node) => Ok(stat_of(node)),
            None => Err(not_found(&literal)),
        }
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let st = self.state.lock();
        let literal = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => resolve_path(&st, parent, 0).join(name),
            _ => PathBuf::from("/"),
        };
        match st.nodes.get(&literal) {
            Some(SimNode::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a symlink", literal.display()),
            )),
            None => Err(not_found(&literal)),
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let st = self.state.lock();
        let canon = resolve_path(&st, path, 0);
        if st.nodes.contains_key(&canon) {
            Ok(canon)
        } else {
            Err(not_found(&canon))
        }
    }

    fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.mutate(path, Op::Change, None, contents.len() as u64)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        self.mutate(path, Op::Delete, None, 0)
    }

    fn set_modified_time(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        self.mutate(path, Op::MtimeTouch, Some(mtime), 0)
    }

    fn subscribe(
        &self,
        path: &Path,
        recursive: bool,
        sink: RawEventSink,
    ) -> Result<SubscriptionId, WatchError> {
        if recursive && !self.flavor.supports_recursive_native() {
            return Err(WatchError::unavailable(
                path,
                "recursive native watches cannot span symlinked subtrees on this platform",
            ));
        }
        let mut st = self.state.lock();
        let canonical = resolve_path(&st, path, 0);
        let is_file = match st.nodes.get(&canonical) {
            Some(SimNode::File { .. }) => true,
            Some(_) => false,
            None => return Err(WatchError::unavailable(path, "path does not exist")),
        };
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        st.subs.insert(
            id,
            SimSubscription {
                canonical,
                recursive,
                is_file,
                sink,
            },
        );
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subs.remove(&id.0);
    }
}

/// Resolve symlink indirection component by component. Missing components
/// pass through untouched so not-yet-existing files still get canonical
/// parent chains.
fn resolve_path(st: &SimState, path: &Path, depth: u8) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::RootDir => out.push("/"),
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => {
                out.push(c);
                if depth < 16 {
                    if let Some(SimNode::Symlink { target, .. }) = st.nodes.get(&out) {
                        let target = target.clone();
                        out = resolve_path(st, &target, depth + 1);
                    }
                }
            }
        }
    }
    out
}

fn ensure_dirs(st: &mut SimState, dir: &Path, mtime: SystemTime) {
    let mut prefix = PathBuf::new();
    for comp in dir.components() {
        prefix.push(comp);
        st.nodes
            .entry(prefix.clone())
            .or_insert(SimNode::Dir { mtime });
    }
}

fn touch(st: &mut SimState, path: &Path, new_mtime: SystemTime) {
    match st.nodes.get_mut(path) {
        Some(SimNode::File { mtime, .. })
        | Some(SimNode::Dir { mtime })
        | Some(SimNode::Symlink { mtime, .. }) => *mtime = new_mtime,
        None => {}
    }
}

/// Strictly increasing mtimes so polling diffs see every write.
fn next_mtime(st: &mut SimState) -> SystemTime {
    let candidate = SystemTime::now();
    let floor = st.last_mtime + Duration::from_millis(1);
    let next = if candidate > floor { candidate } else { floor };
    st.last_mtime = next;
    next
}

fn stat_of(node: &SimNode) -> FileStat {
    match node {
        SimNode::File { mtime, size } => FileStat {
            kind: FileKind::File,
            mtime: *mtime,
            size: *size,
        },
        SimNode::Dir { mtime } => FileStat {
            kind: FileKind::Directory,
            mtime: *mtime,
            size: 0,
        },
        SimNode::Symlink { mtime, .. } => FileStat {
            kind: FileKind::Symlink,
            mtime: *mtime,
            size: 0,
        },
    }
}

fn scope_match(sub: &SimSubscription, target: &Path) -> Option<PathBuf> {
    if sub.is_file {
        if target == sub.canonical {
            target.file_name().map(PathBuf::from)
        } else {
            None
        }
    } else if sub.recursive {
        let rel = target.strip_prefix(&sub.canonical).ok()?;
        if rel.as_os_str().is_empty() {
            None
        } else {
            Some(rel.to_path_buf())
        }
    } else if target.parent() == Some(sub.canonical.as_path()) {
        target.file_name().map(PathBuf::from)
    } else {
        None
    }
}

fn synthesize(flavor: OsFlavor, op: Op) -> &'static [RawEventName] {
    match (flavor, op) {
        (OsFlavor::MacOs, Op::Create | Op::Delete) => &[RawEventName::Rename],
        // One deterministic member of the macOS rename/change equivalence
        // class; consumers must accept either.
        (OsFlavor::MacOs, Op::Change | Op::MtimeTouch) => &[RawEventName::Change],
        (_, Op::Create) => &[RawEventName::Rename, RawEventName::Change],
        (_, Op::Change | Op::MtimeTouch) => &[RawEventName::Change],
        (_, Op::Delete) => &[RawEventName::Rename],
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}
