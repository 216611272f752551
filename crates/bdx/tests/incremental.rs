mod common;

use bdx::index::{index_binary_directory, CancelToken};
use bdx::store::StoreError;
use std::path::Path;

fn shard_dirs(store: &Path) -> Vec<String> {
    let mut out: Vec<String> = std::fs::read_dir(store)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("shard-"))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    out.sort();
    out
}

fn touch(path: &Path) {
    // rewriting bumps the mtime; the sleep keeps filesystems with coarse
    // timestamps honest
    std::thread::sleep(std::time::Duration::from_millis(20));
    let bytes = std::fs::read(path).unwrap();
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn reindex_without_changes_is_a_noop() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    common::index(&bindir, &store);
    let manifest_before = std::fs::read(store.join("manifest")).unwrap();
    let shards_before = shard_dirs(&store);

    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_indexed, 0);
    assert_eq!(stats.num_files_changed, 0);
    assert_eq!(stats.num_files_deleted, 0);

    // no new shard, manifest byte-identical
    assert_eq!(shard_dirs(&store), shards_before);
    assert_eq!(std::fs::read(store.join("manifest")).unwrap(), manifest_before);
}

#[test]
fn touched_file_is_reindexed_alone() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    common::index(&bindir, &store);
    let before = common::search_names(&store, "*:*");

    touch(&bindir.join("a.o"));
    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_changed, 1);
    assert_eq!(stats.num_files_indexed, 1);
    assert_eq!(stats.num_files_deleted, 0);

    // same content, same results
    assert_eq!(common::search_names(&store, "*:*"), before);
}

#[test]
fn removed_file_drops_out_of_results() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    common::index(&bindir, &store);
    assert_eq!(common::search_names(&store, "fullname:uses_c_function").len(), 1);

    std::fs::remove_file(bindir.join("b.o")).unwrap();
    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_deleted, 1);

    assert!(common::search_names(&store, "fullname:uses_c_function").is_empty());
    // the other files are untouched
    assert_eq!(common::search_names(&store, "fullname:c_function").len(), 1);
    assert_eq!(common::search_names(&store, "*:*").len(), 4);
}

#[test]
fn orphan_shard_is_recovered_from() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    common::index(&bindir, &store);
    let clean = common::search_names(&store, "*:*");

    // an interrupted writer leaves a shard directory the manifest never
    // references
    let orphan = store.join("shard-deadbeef");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("records.bin"), b"partial garbage").unwrap();

    common::index(&bindir, &store);
    assert!(!orphan.exists());
    assert_eq!(common::search_names(&store, "*:*"), clean);
}

#[test]
fn renamed_shard_is_rebuilt_on_reindex() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    common::index(&bindir, &store);
    let clean = common::search_names(&store, "*:*");

    // simulate a mid-run casualty: the committed shard disappears
    let shard = shard_dirs(&store).into_iter().next().unwrap();
    std::fs::rename(store.join(&shard), td.path().join("stolen")).unwrap();

    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_indexed, 3);
    assert_eq!(common::search_names(&store, "*:*"), clean);
}

#[test]
fn cancelled_run_commits_nothing() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = index_binary_directory(&bindir, &store, &common::index_options(), false, &cancel)
        .unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));

    // no commit: no manifest, no shard left behind
    assert!(!store.join("manifest").exists());
    assert!(shard_dirs(&store).is_empty());
}

#[test]
fn growing_fixture_keeps_old_records() {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");
    common::index(&bindir, &store);

    common::write_object(&bindir, "d.o", &[common::SymSpec::func("late_arrival")]);
    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_indexed, 1);

    assert_eq!(common::search_names(&store, "fullname:late_arrival").len(), 1);
    assert_eq!(common::search_names(&store, "*:*").len(), 6);
    // two committed shards now serve queries together
    assert!(shard_dirs(&store).len() >= 2);
}
