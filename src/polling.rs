//! Timer-driven polling fallback.
//!
//! A single cooperative timer thread polls every target on a schedule
//! selected by a priority tier; there is no per-watch thread. Targets live
//! in a shared map so closing a watch removes its target synchronously,
//! without waiting for the loop.
//!
//! Resolution limit: a tick compares {existence, mtime, size} against the
//! last snapshot, so edits held open across one tick collapse into a single
//! `Changed` event. Transitions to terminal states are emitted as soon as
//! they are observed; a missed tick never skips a transition the caller
//! cares about.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::backend::FileSystem;
use crate::config::PollingConfig;
use crate::dispatch::FileWatcherEventKind;

pub(crate) type PollId = u64;

/// Sink invoked from the timer thread when a target transitions.
pub(crate) type PollSink = Arc<dyn Fn(FileWatcherEventKind) + Send + Sync>;

/// Priority tier selecting the polling interval. Files expected to change
/// soon poll on the short interval; steady-state files decay to the long
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPriority {
    High,
    Medium,
    Low,
}

impl PollPriority {
    fn interval(self, cfg: &PollingConfig) -> Duration {
        let ms = match self {
            PollPriority::High => cfg.high_interval_ms,
            PollPriority::Medium => cfg.medium_interval_ms,
            PollPriority::Low => cfg.low_interval_ms,
        };
        Duration::from_millis(ms)
    }

    fn decay(self) -> Self {
        match self {
            PollPriority::High => PollPriority::Medium,
            PollPriority::Medium | PollPriority::Low => PollPriority::Low,
        }
    }
}

/// Fixed-interval targets keep their interval for life; tiered targets are
/// promoted back to High on every observed change and decay after enough
/// unchanged polls.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PollSchedule {
    Fixed(Duration),
    Tiered(PollPriority),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PollSnapshot {
    exists: bool,
    mtime: Option<SystemTime>,
    size: u64,
}

fn take_snapshot(fs: &dyn FileSystem, path: &Path) -> PollSnapshot {
    match fs.stat(path) {
        Ok(stat) => PollSnapshot {
            exists: true,
            mtime: Some(stat.mtime),
            size: stat.size,
        },
        Err(_) => PollSnapshot {
            exists: false,
            mtime: None,
            size: 0,
        },
    }
}

fn diff(prev: &PollSnapshot, current: &PollSnapshot) -> Option<FileWatcherEventKind> {
    match (prev.exists, current.exists) {
        (false, true) => Some(FileWatcherEventKind::Created),
        (true, false) => Some(FileWatcherEventKind::Deleted),
        (true, true) if prev.mtime != current.mtime || prev.size != current.size => {
            Some(FileWatcherEventKind::Changed)
        }
        _ => None,
    }
}

struct PollTarget {
    path: PathBuf,
    schedule: PollSchedule,
    snapshot: PollSnapshot,
    unchanged_polls: u32,
    next_due: Instant,
    sink: PollSink,
}

impl PollTarget {
    fn interval(&self, cfg: &PollingConfig) -> Duration {
        match self.schedule {
            PollSchedule::Fixed(interval) => interval,
            PollSchedule::Tiered(priority) => priority.interval(cfg),
        }
    }
}

/// Stat the target and reschedule it; returns the transition, if any.
fn poll_once(
    fs: &dyn FileSystem,
    target: &mut PollTarget,
    cfg: &PollingConfig,
) -> Option<FileWatcherEventKind> {
    let current = take_snapshot(fs, &target.path);
    let event = diff(&target.snapshot, &current);
    target.snapshot = current;

    match event {
        Some(_) => {
            target.unchanged_polls = 0;
            if let PollSchedule::Tiered(_) = target.schedule {
                target.schedule = PollSchedule::Tiered(PollPriority::High);
            }
        }
        None => {
            target.unchanged_polls += 1;
            if let PollSchedule::Tiered(priority) = target.schedule {
                if target.unchanged_polls >= cfg.decay_threshold {
                    target.schedule = PollSchedule::Tiered(priority.decay());
                    target.unchanged_polls = 0;
                }
            }
        }
    }

    target.next_due = Instant::now() + target.interval(cfg);
    event
}

enum Ctl {
    Wake,
    Shutdown,
}

/// The single-threaded cooperative polling loop.
pub(crate) struct PollingEngine {
    fs: Arc<dyn FileSystem>,
    targets: Arc<DashMap<PollId, PollTarget>>,
    ctl_tx: Sender<Ctl>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
    cfg: PollingConfig,
}

impl PollingEngine {
    pub fn new(fs: Arc<dyn FileSystem>, cfg: PollingConfig) -> Self {
        let targets: Arc<DashMap<PollId, PollTarget>> = Arc::new(DashMap::new());
        let (ctl_tx, ctl_rx) = crossbeam_channel::unbounded();

        let loop_fs = fs.clone();
        let loop_targets = targets.clone();
        let loop_cfg = cfg.clone();
        let thread = std::thread::Builder::new()
            .name("linkwatch-poll".to_string())
            .spawn(move || run_loop(loop_fs, loop_targets, ctl_rx, loop_cfg))
            .expect("failed to spawn polling thread");

        Self {
            fs,
            targets,
            ctl_tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
            cfg,
        }
    }

    /// Register a target with its baseline snapshot and wake the loop.
    pub fn add(&self, path: &Path, schedule: PollSchedule, sink: PollSink) -> PollId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = take_snapshot(self.fs.as_ref(), path);
        let mut target = PollTarget {
            path: path.to_path_buf(),
            schedule,
            snapshot,
            unchanged_polls: 0,
            next_due: Instant::now(),
            sink,
        };
        target.next_due += target.interval(&self.cfg);
        self.targets.insert(id, target);
        let _ = self.ctl_tx.send(Ctl::Wake);
        crate::debug_event!("polling", "added", "{}", path.display());
        id
    }

    /// Synchronous removal: the target is gone before this returns. The
    /// loop may already hold a copied sink for this tick; the dispatcher's
    /// slot state drops that delivery.
    pub fn remove(&self, id: PollId) {
        self.targets.remove(&id);
    }

    pub fn shutdown(&self) {
        let _ = self.ctl_tx.send(Ctl::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

const IDLE_WAIT: Duration = Duration::from_millis(500);

fn run_loop(
    fs: Arc<dyn FileSystem>,
    targets: Arc<DashMap<PollId, PollTarget>>,
    ctl_rx: Receiver<Ctl>,
    cfg: PollingConfig,
) {
    loop {
        let now = Instant::now();
        let mut ready: Vec<(PollSink, FileWatcherEventKind)> = Vec::new();
        let mut next_due: Option<Instant> = None;

        for mut entry in targets.iter_mut() {
            let target = entry.value_mut();
            if target.next_due <= now {
                if let Some(kind) = poll_once(fs.as_ref(), target, &cfg) {
                    ready.push((target.sink.clone(), kind));
                }
            }
            next_due = Some(match next_due {
                Some(due) => due.min(target.next_due),
                None => target.next_due,
            });
        }

        // Sinks run with no map guard held; a callback may add or remove
        // targets.
        for (sink, kind) in ready {
            sink(kind);
        }

        let timeout = next_due
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);
        match ctl_rx.recv_timeout(timeout) {
            Ok(Ctl::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Ctl::Wake) | Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
