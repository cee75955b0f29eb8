#![forbid(unsafe_code)]
//! End-to-end snapshot behavior, driven through the namespace facade with
//! a test double standing in for the external block map.

use sfs_error::SnapError;
use sfs_namespace::{BlockMap, BlocksMapUpdateInfo, CreateOptions, Namespace};
use sfs_types::{BlockId, InodeId, Permission};
use std::collections::BTreeMap;

/// Block map double: remembers which inode owns each block and forgets
/// blocks as deletion sets are applied.
#[derive(Default)]
struct TestBlockMap {
    owners: BTreeMap<BlockId, InodeId>,
}

impl BlockMap for TestBlockMap {
    fn mark(&mut self, block: BlockId, owner: InodeId) {
        self.owners.insert(block, owner);
    }
}

impl TestBlockMap {
    fn apply(&mut self, info: &BlocksMapUpdateInfo) {
        for b in info.to_delete() {
            self.owners.remove(b);
        }
    }

    fn holds(&self, block: u64) -> bool {
        self.owners.contains_key(&BlockId(block))
    }
}

fn perm() -> Permission {
    Permission::default()
}

fn file_opts(blocks: &[u64], size: u64) -> CreateOptions {
    CreateOptions {
        blocks: blocks.iter().map(|&b| BlockId(b)).collect(),
        size,
        ..CreateOptions::default()
    }
}

#[test]
fn snapshot_preserves_a_deleted_file() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.create("/a/f1", &file_opts(&[101], 1024), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    let released = ns.delete("/a/f1", 3).unwrap();
    blocks.apply(&released);

    assert!(ns.lookup("/a/f1").unwrap().last_inode().is_none());

    let snap = ns.lookup("/a/.snapshot/s0/f1").unwrap();
    let f1 = snap.last_inode().expect("visible in s0");
    assert_eq!(ns.store().file_size(f1, snap.path_snapshot()), 1024);
    assert!(blocks.holds(101), "snapshot still owns the block");
}

#[test]
fn snapshot_preserves_attributes_before_a_modification() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.create("/a/f1", &file_opts(&[101], 1024), 50, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    ns.set_times("/a/f1", Some(999), None).unwrap();

    let live = ns.lookup("/a/f1").unwrap();
    let live_file = live.last_inode().unwrap();
    assert_eq!(ns.store().modification_time(live_file, None), 999);
    assert!(
        ns.store()
            .node(ns.store().resolve(live_file))
            .as_file()
            .has_snapshot_state(),
        "first capture upgrades the file"
    );

    let snap = ns.lookup("/a/.snapshot/s0/f1").unwrap();
    let old_file = snap.last_inode().unwrap();
    assert_eq!(
        ns.store().modification_time(old_file, snap.path_snapshot()),
        50
    );
}

#[test]
fn rename_across_a_snapshot_keeps_both_access_paths() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.mkdirs("/b", &perm(), 1).unwrap();
    ns.create("/a/x", &file_opts(&[7], 512), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    ns.rename("/a/x", "/b/y", 3).unwrap();

    let via_snapshot = ns.lookup("/a/.snapshot/s0/x").unwrap();
    let via_dst = ns.lookup("/b/y").unwrap();
    let snap_node = via_snapshot.last_inode().expect("still in s0");
    let dst_node = via_dst.last_inode().expect("at destination");
    let underlying = ns.store().resolve(dst_node);
    assert_eq!(ns.store().resolve(snap_node), underlying, "one inode, two paths");

    let with_count = ns
        .store()
        .node(underlying)
        .parent_reference()
        .expect("wrapped by rename");
    assert_eq!(ns.store().node(with_count).as_reference().count(), 2);

    // The live parent is the destination directory.
    let b = ns.lookup("/b").unwrap().last_inode().unwrap();
    assert_eq!(ns.store().node(underlying).parent(), Some(b));
    assert!(ns.lookup("/a/x").unwrap().last_inode().is_none());
}

#[test]
fn deleting_the_snapshot_after_a_rename_releases_one_reference() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.mkdirs("/b", &perm(), 1).unwrap();
    ns.create("/a/x", &file_opts(&[7], 512), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();
    ns.rename("/a/x", "/b/y", 3).unwrap();

    let released = ns.delete_snapshot("/a", "s0").unwrap();
    blocks.apply(&released);

    assert!(ns.lookup("/a/.snapshot/s0/x").unwrap().last_inode().is_none());
    let dst_node = ns.lookup("/b/y").unwrap().last_inode().expect("still live");
    let underlying = ns.store().resolve(dst_node);
    let with_count = ns.store().node(underlying).parent_reference().unwrap();
    assert_eq!(ns.store().node(with_count).as_reference().count(), 1);
    assert!(blocks.holds(7), "the live path still owns the block");
}

#[test]
fn sequential_snapshots_bracket_a_file_lifetime() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();
    ns.create("/a/f1", &file_opts(&[11], 256), 2, &mut blocks)
        .unwrap();
    ns.create_snapshot("/a", "s1").unwrap();
    let released = ns.delete("/a/f1", 3).unwrap();
    blocks.apply(&released);

    assert!(ns.lookup("/a/.snapshot/s0/f1").unwrap().last_inode().is_none());
    assert!(ns.lookup("/a/.snapshot/s1/f1").unwrap().last_inode().is_some());
    assert!(ns.lookup("/a/f1").unwrap().last_inode().is_none());
    assert!(blocks.holds(11), "s1 still sees the file");

    let released = ns.delete_snapshot("/a", "s1").unwrap();
    blocks.apply(&released);
    assert!(!blocks.holds(11), "last reader gone, block released");
}

#[test]
fn create_and_delete_between_snapshots_surfaces_on_combine() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();
    ns.create("/a/tmp", &file_opts(&[21], 64), 2, &mut blocks)
        .unwrap();
    ns.create_snapshot("/a", "s1").unwrap();
    let released = ns.delete("/a/tmp", 3).unwrap();
    blocks.apply(&released);
    assert!(blocks.holds(21), "s1 still sees tmp");

    assert!(ns.lookup("/a/.snapshot/s0/tmp").unwrap().last_inode().is_none());
    assert!(ns.lookup("/a/tmp").unwrap().last_inode().is_none());

    let released = ns.delete_snapshot("/a", "s1").unwrap();
    blocks.apply(&released);
    assert!(!blocks.holds(21), "combine reported tmp's block");
}

#[test]
fn snapshot_paths_reject_mutation() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.create("/a/f1", &file_opts(&[1], 10), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    let err = ns.delete("/a/.snapshot/s0/f1", 3).unwrap_err();
    assert!(matches!(err, SnapError::SnapshotModification(_)));
    let err = ns.set_times("/a/.snapshot/s0/f1", Some(9), None).unwrap_err();
    assert!(matches!(err, SnapError::SnapshotModification(_)));
    let err = ns
        .rename("/a/.snapshot/s0/f1", "/a/f2", 3)
        .unwrap_err();
    assert!(matches!(err, SnapError::SnapshotModification(_)));
}

#[test]
fn directories_holding_snapshots_refuse_deletion() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/top/mid/leaf", &perm(), 1).unwrap();
    ns.create("/top/mid/leaf/f", &file_opts(&[1], 10), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/top/mid/leaf").unwrap();
    ns.create_snapshot("/top/mid/leaf", "s0").unwrap();

    let err = ns.delete("/top/mid/leaf", 3).unwrap_err();
    assert!(matches!(err, SnapError::HasSnapshots(_)));

    // An ancestor refuses too, naming the offending descendant.
    let err = ns.delete("/top", 3).unwrap_err();
    match err {
        SnapError::HasSnapshots(offender) => assert_eq!(offender, "/top/mid/leaf"),
        other => panic!("expected HasSnapshots, got {other:?}"),
    }

    let err = ns.disallow_snapshot("/top/mid/leaf").unwrap_err();
    assert!(matches!(err, SnapError::HasSnapshots(_)));
    ns.delete_snapshot("/top/mid/leaf", "s0").unwrap();
    ns.disallow_snapshot("/top/mid/leaf").unwrap();
    ns.delete("/top", 3).unwrap();
}

#[test]
fn snapshot_ids_are_monotone_across_directories() {
    let mut ns = Namespace::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.mkdirs("/b", &perm(), 1).unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.allow_snapshot("/b").unwrap();

    let s0 = ns.create_snapshot("/a", "s0").unwrap();
    let s1 = ns.create_snapshot("/b", "s1").unwrap();
    let s2 = ns.create_snapshot("/a", "s2").unwrap();
    assert!(s0.id < s1.id);
    assert!(s1.id < s2.id);
}

#[test]
fn listings_are_ascending_in_every_view() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    for name in ["zeta", "Alpha", "beta", "42"] {
        ns.create(
            &format!("/a/{name}"),
            &file_opts(&[], 0),
            2,
            &mut blocks,
        )
        .unwrap();
    }
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();
    ns.delete("/a/beta", 3).unwrap();

    let live = ns.list_children("/a").unwrap();
    assert_eq!(live, ["42", "Alpha", "zeta"]);

    // The snapshot view still carries the deleted child, in order.
    let snapshot_view = ns.list_children("/a/.snapshot/s0").unwrap();
    assert_eq!(snapshot_view, ["42", "Alpha", "beta", "zeta"]);
    assert!(ns.lookup("/a/.snapshot/s0/beta").unwrap().last_inode().is_some());
}

#[test]
fn bare_dot_snapshot_lists_snapshot_names() {
    let mut ns = Namespace::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "nightly").unwrap();
    ns.create_snapshot("/a", "daily").unwrap();

    assert_eq!(ns.list_children("/a/.snapshot").unwrap(), ["daily", "nightly"]);
    assert_eq!(ns.snapshot_names("/a").unwrap(), ["daily", "nightly"]);

    ns.rename_snapshot("/a", "daily", "weekly").unwrap();
    assert_eq!(ns.snapshot_names("/a").unwrap(), ["nightly", "weekly"]);
    let err = ns.rename_snapshot("/a", "weekly", "nightly").unwrap_err();
    assert!(matches!(err, SnapError::SnapshotNameExists { .. }));
}

#[test]
fn resolution_is_idempotent_over_full_paths() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a/b", &perm(), 1).unwrap();
    ns.create("/a/b/f", &file_opts(&[1], 10), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    for path in ["/a/b/f", "/a/.snapshot/s0/b/f", "/a/b", "/missing/x"] {
        let first = ns.lookup(path).unwrap();
        let second = ns.lookup(&first.full_path()).unwrap();
        assert_eq!(first.last_inode(), second.last_inode(), "path {path}");
    }
}

#[test]
fn snapshot_isolation_covers_permissions_and_listings() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.create("/a/f", &file_opts(&[1], 10), 2, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    ns.set_permission("/a/f", Permission::new("eve", "staff", 0o600))
        .unwrap();

    let live = ns.lookup("/a/f").unwrap().last_inode().unwrap();
    assert_eq!(ns.store().permission(live, None).user, "eve");

    let snap = ns.lookup("/a/.snapshot/s0/f").unwrap();
    let old = snap.last_inode().unwrap();
    let p = ns.store().permission(old, snap.path_snapshot());
    assert_eq!(p.user, Permission::default().user);
    assert_eq!(p.mode, 0o755);
}

#[test]
fn quota_directories_cap_namespace_growth() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/q", &perm(), 1).unwrap();
    ns.set_quota(
        "/q",
        sfs_namespace::DirQuota {
            ns_quota: Some(2),
            ds_quota: None,
        },
    )
    .unwrap();
    ns.create("/q/one", &file_opts(&[], 0), 2, &mut blocks)
        .unwrap();
    let err = ns
        .create("/q/two", &file_opts(&[], 0), 3, &mut blocks)
        .unwrap_err();
    assert!(matches!(err, SnapError::NsQuotaExceeded { .. }));
}

#[test]
fn snapshottable_directories_are_listed() {
    let mut ns = Namespace::default();
    ns.mkdirs("/x/y", &perm(), 1).unwrap();
    ns.mkdirs("/z", &perm(), 1).unwrap();
    ns.allow_snapshot("/x/y").unwrap();
    ns.allow_snapshot("/z").unwrap();
    ns.create_snapshot("/z", "s").unwrap();

    let listed = ns.list_snapshottable();
    let mut paths: Vec<&str> = listed.iter().map(|s| s.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, ["/x/y", "/z"]);
    let z = listed.iter().find(|s| s.path == "/z").unwrap();
    assert_eq!(z.snapshot_count, 1);
}

#[test]
fn setattr_then_delete_keeps_the_snapshot_view_intact() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.create("/a/f1", &file_opts(&[31], 1024), 40, &mut blocks)
        .unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();

    ns.set_times("/a/f1", Some(777), None).unwrap();
    let released = ns.delete("/a/f1", 50).unwrap();
    blocks.apply(&released);

    assert!(ns.lookup("/a/f1").unwrap().last_inode().is_none());
    let snap = ns.lookup("/a/.snapshot/s0/f1").unwrap();
    let old = snap.last_inode().expect("still visible in s0");
    assert_eq!(ns.store().modification_time(old, snap.path_snapshot()), 40);
    assert!(blocks.holds(31), "the snapshot still owns the block");

    // Dropping the snapshot releases everything the file ever held.
    let released = ns.delete_snapshot("/a", "s0").unwrap();
    blocks.apply(&released);
    assert!(!blocks.holds(31));
}

#[test]
fn recreated_child_stays_out_of_older_snapshots() {
    let mut ns = Namespace::default();
    let mut blocks = TestBlockMap::default();
    ns.mkdirs("/a", &perm(), 1).unwrap();
    ns.allow_snapshot("/a").unwrap();
    ns.create_snapshot("/a", "s0").unwrap();
    ns.create("/a/x", &file_opts(&[41], 100), 2, &mut blocks)
        .unwrap();
    ns.create_snapshot("/a", "s1").unwrap();
    let released = ns.delete("/a/x", 3).unwrap();
    blocks.apply(&released);
    ns.create("/a/x", &file_opts(&[42], 200), 4, &mut blocks)
        .unwrap();

    // Both read paths agree for every view: s0 saw no x at all, s1 saw
    // the first incarnation, the live tree holds the second.
    assert!(ns.lookup("/a/.snapshot/s0/x").unwrap().last_inode().is_none());
    assert!(ns.list_children("/a/.snapshot/s0").unwrap().is_empty());

    let in_s1 = ns.lookup("/a/.snapshot/s1/x").unwrap();
    let first = in_s1.last_inode().expect("s1 kept the first x");
    assert_eq!(ns.store().file_size(first, in_s1.path_snapshot()), 100);
    assert_eq!(ns.list_children("/a/.snapshot/s1").unwrap(), ["x"]);

    let live = ns.lookup("/a/x").unwrap().last_inode().unwrap();
    assert_eq!(ns.store().file_size(live, None), 200);
    assert_ne!(first, live);

    // Dropping s1 makes the first incarnation unreachable; the second
    // lives on untouched.
    let released = ns.delete_snapshot("/a", "s1").unwrap();
    blocks.apply(&released);
    assert!(!blocks.holds(41));
    assert!(blocks.holds(42));
    assert!(ns.lookup("/a/x").unwrap().last_inode().is_some());
}
