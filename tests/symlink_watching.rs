//! Deterministic cross-flavor watching scenarios on the simulated backend.
//!
//! Every test drives a `SimFileSystem` pinned to an explicit `OsFlavor`, so
//! Linux, Windows, and macOS event shapes are all exercised on any host.
//! Coalescing is disabled throughout; these scenarios assert exact raw
//! sequences, with macOS matched against its rename/change equivalence
//! class rather than a single member.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use linkwatch::{
    DirWatchCallback, FileSystem, FileWatchCallback, FileWatcherEventKind, OsFlavor, RawEventName,
    SimFileSystem, WatchConfig, WatchDirectoryKind, WatchDirectoryOptions, WatchError,
    WatchFileKind, WatchOptions, WatchSystem,
};

type DirEvent = (String, Option<PathBuf>);
type FileEvent = (PathBuf, FileWatcherEventKind, Option<SystemTime>);

fn sim_system(flavor: OsFlavor) -> (Arc<SimFileSystem>, WatchSystem) {
    let fs = Arc::new(SimFileSystem::new(flavor));
    let mut config = WatchConfig::default();
    config.coalesce_window_ms = 0;
    (fs.clone(), WatchSystem::new(fs, config))
}

fn dir_recorder() -> (DirWatchCallback, Arc<Mutex<Vec<DirEvent>>>) {
    let events: Arc<Mutex<Vec<DirEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let cb: DirWatchCallback = Arc::new(move |name, file| {
        sink.lock()
            .push((name.to_string(), file.map(|p| p.to_path_buf())));
    });
    (cb, events)
}

fn file_recorder() -> (FileWatchCallback, Arc<Mutex<Vec<FileEvent>>>) {
    let events: Arc<Mutex<Vec<FileEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let cb: FileWatchCallback = Arc::new(move |path, kind, mtime| {
        sink.lock().push((path.to_path_buf(), kind, mtime));
    });
    (cb, events)
}

fn fsevents_file() -> WatchOptions {
    WatchOptions {
        kind: WatchFileKind::UseFsEvents,
        fall_back_polling: false,
    }
}

fn fsevents_dir() -> WatchDirectoryOptions {
    WatchDirectoryOptions {
        kind: WatchDirectoryKind::UseFsEvents,
        fall_back_polling: false,
    }
}

/// Drain recorded events and compare against an expected sequence, matching
/// event names up to the flavor's equivalence class.
fn expect_events(
    flavor: OsFlavor,
    recorded: &Arc<Mutex<Vec<DirEvent>>>,
    expected: &[(RawEventName, Option<&str>)],
) {
    let got: Vec<DirEvent> = recorded.lock().drain(..).collect();
    assert_eq!(
        got.len(),
        expected.len(),
        "event count mismatch on {flavor:?}: got {got:?}, expected {expected:?}"
    );
    for (actual, wanted) in got.iter().zip(expected) {
        let actual_name = match actual.0.as_str() {
            "rename" => RawEventName::Rename,
            "change" => RawEventName::Change,
            other => panic!("unexpected raw event name {other:?}"),
        };
        assert!(
            flavor.events_equivalent(actual_name, wanted.0),
            "event name mismatch on {flavor:?}: got {actual:?}, expected {wanted:?}"
        );
        assert_eq!(
            actual.1.as_deref(),
            wanted.1.map(Path::new),
            "file name mismatch on {flavor:?}"
        );
    }
}

/// Expected sequence for a file creation inside a watched directory.
fn create_sequence(flavor: OsFlavor, name: &str) -> Vec<(RawEventName, Option<String>)> {
    match flavor {
        OsFlavor::MacOs => vec![(RawEventName::Rename, Some(name.to_string()))],
        _ => vec![
            (RawEventName::Rename, Some(name.to_string())),
            (RawEventName::Change, Some(name.to_string())),
        ],
    }
}

fn expect_owned(
    flavor: OsFlavor,
    recorded: &Arc<Mutex<Vec<DirEvent>>>,
    expected: &[(RawEventName, Option<String>)],
) {
    let borrowed: Vec<(RawEventName, Option<&str>)> = expected
        .iter()
        .map(|(name, file)| (*name, file.as_deref()))
        .collect();
    expect_events(flavor, recorded, &borrowed);
}

// --- watch_file through fsevents, addressed by real path and by link ---

#[test]
fn file_watch_sees_change_touch_delete_and_recreate() {
    for flavor in [OsFlavor::Linux, OsFlavor::Windows, OsFlavor::MacOs] {
        let (fs, sys) = sim_system(flavor);
        fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
            .unwrap();

        let (cb, events) = file_recorder();
        let watcher = sys
            .watch_file(Path::new("/root/folder/file.ts"), cb, None, &fsevents_file())
            .unwrap();

        sys.write_file(Path::new("/root/folder/file.ts"), "export const x = 100;")
            .unwrap();
        sys.set_modified_time(Path::new("/root/folder/file.ts"), SystemTime::now())
            .unwrap();
        sys.delete_file(Path::new("/root/folder/file.ts")).unwrap();
        sys.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
            .unwrap();

        let kinds: Vec<FileWatcherEventKind> =
            events.lock().iter().map(|(_, kind, _)| *kind).collect();
        // Recreation raises rename + change on Linux/Windows, so the
        // watcher sees Created followed by Changed there; macOS raises a
        // single rename.
        let expected = match flavor {
            OsFlavor::MacOs => vec![
                FileWatcherEventKind::Changed,
                FileWatcherEventKind::Changed,
                FileWatcherEventKind::Deleted,
                FileWatcherEventKind::Created,
            ],
            _ => vec![
                FileWatcherEventKind::Changed,
                FileWatcherEventKind::Changed,
                FileWatcherEventKind::Deleted,
                FileWatcherEventKind::Created,
                FileWatcherEventKind::Changed,
            ],
        };
        assert_eq!(kinds, expected, "flavor {flavor:?}");
        // Every delivery names the watched path verbatim; the delete carries
        // no mtime.
        for (path, kind, mtime) in events.lock().iter() {
            assert_eq!(path, Path::new("/root/folder/file.ts"));
            assert_eq!(
                mtime.is_none(),
                *kind == FileWatcherEventKind::Deleted,
                "flavor {flavor:?}"
            );
        }
        watcher.close();
    }
}

#[test]
fn file_watched_through_link_reports_link_path() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root/folder/file.ts", "/root/link.ts").unwrap();

    let (cb, events) = file_recorder();
    let watcher = sys
        .watch_file(Path::new("/root/link.ts"), cb, None, &fsevents_file())
        .unwrap();

    // Mutate through the real path and through the link; both reach the
    // single underlying subscription.
    sys.write_file(Path::new("/root/folder/file.ts"), "export const x = 100;")
        .unwrap();
    sys.write_file(Path::new("/root/link.ts"), "export const x = 200;")
        .unwrap();

    let got = events.lock().clone();
    assert_eq!(got.len(), 2);
    for (path, kind, _) in &got {
        assert_eq!(path, Path::new("/root/link.ts"));
        assert_eq!(*kind, FileWatcherEventKind::Changed);
    }
    watcher.close();
}

#[test]
fn file_and_link_watchers_both_fire_from_one_subscription() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root/folder/file.ts", "/root/link.ts").unwrap();

    let (file_cb, file_events) = file_recorder();
    let (link_cb, link_events) = file_recorder();
    let through_file = sys
        .watch_file(Path::new("/root/folder/file.ts"), file_cb, None, &fsevents_file())
        .unwrap();
    let through_link = sys
        .watch_file(Path::new("/root/link.ts"), link_cb, None, &fsevents_file())
        .unwrap();

    sys.write_file(Path::new("/root/link.ts"), "export const x = 100;")
        .unwrap();

    assert_eq!(file_events.lock()[0].0, PathBuf::from("/root/folder/file.ts"));
    assert_eq!(link_events.lock()[0].0, PathBuf::from("/root/link.ts"));
    through_file.close();
    through_link.close();
}

// --- non-recursive directory watching, per flavor ---

#[test]
fn directory_watch_follows_flavor_event_table() {
    for flavor in [OsFlavor::Linux, OsFlavor::Windows, OsFlavor::MacOs] {
        let (fs, sys) = sim_system(flavor);
        fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
            .unwrap();

        let (cb, events) = dir_recorder();
        let watcher = sys
            .watch_directory(Path::new("/root/folder"), false, cb, &fsevents_dir())
            .unwrap();

        sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 10;")
            .unwrap();
        expect_owned(flavor, &events, &create_sequence(flavor, "file2.ts"));

        sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 20;")
            .unwrap();
        expect_events(flavor, &events, &[(RawEventName::Change, Some("file2.ts"))]);

        sys.set_modified_time(Path::new("/root/folder/file2.ts"), SystemTime::now())
            .unwrap();
        expect_events(flavor, &events, &[(RawEventName::Change, Some("file2.ts"))]);

        sys.delete_file(Path::new("/root/folder/file2.ts")).unwrap();
        expect_events(flavor, &events, &[(RawEventName::Rename, Some("file2.ts"))]);

        watcher.close();
    }
}

#[test]
fn directory_watched_through_link_sees_edits_on_real_path() {
    for flavor in [OsFlavor::Linux, OsFlavor::Windows, OsFlavor::MacOs] {
        let (fs, sys) = sim_system(flavor);
        fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
            .unwrap();
        fs.symlink("/root/folder", "/root/linked").unwrap();

        let (cb, events) = dir_recorder();
        let watcher = sys
            .watch_directory(Path::new("/root/linked"), false, cb, &fsevents_dir())
            .unwrap();

        // Edit addressed via the real directory; the link watcher fires with
        // the same relative name.
        sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 10;")
            .unwrap();
        expect_owned(flavor, &events, &create_sequence(flavor, "file2.ts"));

        // And via the link.
        sys.delete_file(Path::new("/root/linked/file2.ts")).unwrap();
        expect_events(flavor, &events, &[(RawEventName::Rename, Some("file2.ts"))]);

        watcher.close();
    }
}

#[test]
fn directory_and_link_watchers_share_one_entry_and_both_fire() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root/folder", "/root/linked").unwrap();

    let (dir_cb, dir_events) = dir_recorder();
    let (link_cb, link_events) = dir_recorder();
    let through_dir = sys
        .watch_directory(Path::new("/root/folder"), false, dir_cb, &fsevents_dir())
        .unwrap();
    let through_link = sys
        .watch_directory(Path::new("/root/linked"), false, link_cb, &fsevents_dir())
        .unwrap();

    sys.write_file(Path::new("/root/linked/file2.ts"), "export const y = 10;")
        .unwrap();

    let expected = create_sequence(OsFlavor::Linux, "file2.ts");
    expect_owned(OsFlavor::Linux, &dir_events, &expected);
    expect_owned(OsFlavor::Linux, &link_events, &expected);
    through_dir.close();
    through_link.close();
}

// --- recursive directory watching ---

#[test]
fn recursive_windows_create_adds_container_change() {
    let flavor = OsFlavor::Windows;
    let (fs, sys) = sim_system(flavor);
    fs.write_file(Path::new("/root/sub/folder/file.ts"), "export const x = 10;")
        .unwrap();

    let (cb, events) = dir_recorder();
    let watcher = sys
        .watch_directory(Path::new("/root"), true, cb, &fsevents_dir())
        .unwrap();

    sys.write_file(Path::new("/root/sub/folder/file2.ts"), "export const y = 10;")
        .unwrap();
    expect_events(
        flavor,
        &events,
        &[
            (RawEventName::Rename, Some("sub/folder/file2.ts")),
            (RawEventName::Change, Some("sub/folder/file2.ts")),
            (RawEventName::Change, Some("sub/folder")),
        ],
    );

    sys.delete_file(Path::new("/root/sub/folder/file2.ts")).unwrap();
    expect_events(
        flavor,
        &events,
        &[(RawEventName::Rename, Some("sub/folder/file2.ts"))],
    );

    watcher.close();
}

#[test]
fn recursive_macos_reports_subtree_without_container_events() {
    let flavor = OsFlavor::MacOs;
    let (fs, sys) = sim_system(flavor);
    fs.write_file(Path::new("/root/sub/folder/file.ts"), "export const x = 10;")
        .unwrap();

    let (cb, events) = dir_recorder();
    let watcher = sys
        .watch_directory(Path::new("/root"), true, cb, &fsevents_dir())
        .unwrap();

    sys.write_file(Path::new("/root/sub/folder/file2.ts"), "export const y = 10;")
        .unwrap();
    expect_events(
        flavor,
        &events,
        &[(RawEventName::Rename, Some("sub/folder/file2.ts"))],
    );

    sys.write_file(Path::new("/root/sub/folder/file2.ts"), "export const y = 20;")
        .unwrap();
    expect_events(
        flavor,
        &events,
        &[(RawEventName::Change, Some("sub/folder/file2.ts"))],
    );

    watcher.close();
}

#[test]
fn recursive_create_through_linked_subdirectory_uses_real_names() {
    let flavor = OsFlavor::Windows;
    let (fs, sys) = sim_system(flavor);
    fs.write_file(Path::new("/root/sub/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root/sub", "/root/linkedsub").unwrap();

    let (cb, events) = dir_recorder();
    let watcher = sys
        .watch_directory(Path::new("/root"), true, cb, &fsevents_dir())
        .unwrap();

    // Created through the link, observed under the real subtree's names.
    sys.write_file(Path::new("/root/linkedsub/folder/file3.ts"), "export const z = 10;")
        .unwrap();
    expect_events(
        flavor,
        &events,
        &[
            (RawEventName::Rename, Some("sub/folder/file3.ts")),
            (RawEventName::Change, Some("sub/folder/file3.ts")),
            (RawEventName::Change, Some("sub/folder")),
        ],
    );

    watcher.close();
}

#[test]
fn recursive_dir_and_linked_dir_watchers_both_report_relative_creation() {
    for flavor in [OsFlavor::Windows, OsFlavor::MacOs] {
        let (fs, sys) = sim_system(flavor);
        fs.write_file(Path::new("/root/dir/seed.ts"), "export const x = 10;")
            .unwrap();
        fs.symlink("/root/dir", "/root/linkeddir").unwrap();

        let (dir_cb, dir_events) = dir_recorder();
        let (link_cb, link_events) = dir_recorder();
        let through_dir = sys
            .watch_directory(Path::new("/root/dir"), true, dir_cb, &fsevents_dir())
            .unwrap();
        let through_link = sys
            .watch_directory(Path::new("/root/linkeddir"), true, link_cb, &fsevents_dir())
            .unwrap();

        sys.write_file(Path::new("/root/dir/sub/folder/file1.ts"), "export const y = 10;")
            .unwrap();

        let expected: Vec<(RawEventName, Option<String>)> = match flavor {
            OsFlavor::MacOs => vec![(RawEventName::Rename, Some("sub/folder/file1.ts".into()))],
            _ => vec![
                (RawEventName::Rename, Some("sub/folder/file1.ts".into())),
                (RawEventName::Change, Some("sub/folder/file1.ts".into())),
                (RawEventName::Change, Some("sub/folder".into())),
            ],
        };
        // Both views share one subscription and name the file relative to
        // their own root.
        expect_owned(flavor, &dir_events, &expected);
        expect_owned(flavor, &link_events, &expected);
        through_dir.close();
        through_link.close();
    }
}

#[test]
fn recursive_watch_ignores_parallel_tree_behind_link() {
    let (fs, sys) = sim_system(OsFlavor::Windows);
    fs.write_file(Path::new("/root/sub/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.write_file(Path::new("/root2/sub/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root2", "/root/linkedsub2").unwrap();

    let (cb, events) = dir_recorder();
    let watcher = sys
        .watch_directory(Path::new("/root"), true, cb, &fsevents_dir())
        .unwrap();

    // The link target canonicalizes outside the watched tree.
    sys.write_file(
        Path::new("/root/linkedsub2/sub/folder/file5.ts"),
        "export const q = 10;",
    )
    .unwrap();

    assert!(events.lock().is_empty());
    watcher.close();
}

#[test]
fn recursive_native_is_unavailable_on_linux() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/sub/file.ts"), "export const x = 10;")
        .unwrap();

    let err = sys
        .watch_directory(Path::new("/root"), true, Arc::new(|_, _| {}), &fsevents_dir())
        .unwrap_err();
    assert!(matches!(err, WatchError::BackendUnavailable { .. }));
}

// --- close semantics ---

#[test]
fn closed_watcher_receives_nothing_and_close_is_idempotent() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();

    let (cb, events) = dir_recorder();
    let watcher = sys
        .watch_directory(Path::new("/root/folder"), false, cb, &fsevents_dir())
        .unwrap();

    sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 10;")
        .unwrap();
    let before_close = events.lock().len();
    assert!(before_close > 0);

    watcher.close();
    watcher.close();
    sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 20;")
        .unwrap();
    sys.delete_file(Path::new("/root/folder/file2.ts")).unwrap();

    assert_eq!(events.lock().len(), before_close);
}

#[test]
fn closing_one_shared_watcher_keeps_the_other_alive() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();
    fs.symlink("/root/folder", "/root/linked").unwrap();

    let (dir_cb, dir_events) = dir_recorder();
    let (link_cb, link_events) = dir_recorder();
    let through_dir = sys
        .watch_directory(Path::new("/root/folder"), false, dir_cb, &fsevents_dir())
        .unwrap();
    let through_link = sys
        .watch_directory(Path::new("/root/linked"), false, link_cb, &fsevents_dir())
        .unwrap();

    through_dir.close();
    sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 10;")
        .unwrap();

    assert!(dir_events.lock().is_empty());
    expect_owned(
        OsFlavor::Linux,
        &link_events,
        &create_sequence(OsFlavor::Linux, "file2.ts"),
    );
    through_link.close();
}

#[test]
fn callback_may_close_its_own_watcher() {
    let (fs, sys) = sim_system(OsFlavor::Linux);
    fs.write_file(Path::new("/root/folder/file.ts"), "export const x = 10;")
        .unwrap();

    let slot: Arc<Mutex<Option<linkwatch::FileWatcher>>> = Arc::new(Mutex::new(None));
    let count = Arc::new(Mutex::new(0usize));
    let cb_slot = slot.clone();
    let cb_count = count.clone();
    let watcher = sys
        .watch_directory(
            Path::new("/root/folder"),
            false,
            Arc::new(move |_, _| {
                *cb_count.lock() += 1;
                if let Some(w) = cb_slot.lock().take() {
                    w.close();
                }
            }),
            &fsevents_dir(),
        )
        .unwrap();
    *slot.lock() = Some(watcher);

    sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 10;")
        .unwrap();
    let after_first = *count.lock();
    assert_eq!(after_first, 1);

    sys.write_file(Path::new("/root/folder/file2.ts"), "export const y = 20;")
        .unwrap();
    assert_eq!(*count.lock(), after_first);
}
