mod common;

use bdx::search::Searcher;
use bdx::store::Store;

fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
    let td = tempfile::tempdir().unwrap();
    let bindir = td.path().join("build");
    std::fs::create_dir_all(&bindir).unwrap();
    common::standard_fixture(&bindir);
    let store = td.path().join("store");
    let stats = common::index(&bindir, &store);
    assert_eq!(stats.num_files_indexed, 3);
    assert_eq!(stats.num_symbols_indexed, 5);
    (td, store)
}

#[test]
fn roundtrip_path_query_returns_file_symbols() {
    let (td, store) = fixture();
    let a_path = td.path().join("build/a.o");
    let names = common::search_names(&store, &format!("path:\"{}\"", a_path.display()));
    // exactly a.o's symbols, in (address, name) order
    assert_eq!(names, vec!["bar", "cxx_function", "CppCamelCaseSymbol"]);
}

#[test]
fn camel_case_token_search_is_case_folding() {
    let (_td, store) = fixture();
    assert_eq!(common::search_names(&store, "Camel"), vec!["CppCamelCaseSymbol"]);
    assert_eq!(common::search_names(&store, "camel"), vec!["CppCamelCaseSymbol"]);
    // output preserves the original case
    let records = common::search(&store, "camel");
    assert_eq!(records[0].name, "CppCamelCaseSymbol");
}

#[test]
fn fullname_is_exact() {
    let (_td, store) = fixture();
    let names = common::search_names(&store, "fullname:bar");
    assert_eq!(names, vec!["bar"]);
}

#[test]
fn relocation_search() {
    let (_td, store) = fixture();
    assert_eq!(
        common::search_names(&store, "relocations:c_function"),
        vec!["uses_c_function"]
    );
    assert!(common::search_names(&store, "relocations:memset").is_empty());
}

#[test]
fn type_and_section_filtering() {
    let (_td, store) = fixture();
    let names = common::search_names(&store, "type:FUNC AND section:.text");
    assert!(names.contains(&"cxx_function".to_string()));
    assert!(!names.contains(&"bar".to_string()));

    let objects = common::search_names(&store, "type:OBJECT");
    assert_eq!(objects, vec!["bar"]);
}

#[test]
fn deterministic_ordering() {
    let (_td, store) = fixture();
    let first = common::search_names(&store, "*:*");
    let second = common::search_names(&store, "*:*");
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
    // stable order is (path, address, name): a.o's symbols come first
    assert_eq!(&first[..3], &["bar", "cxx_function", "CppCamelCaseSymbol"]);
}

#[test]
fn boolean_equivalences() {
    let (_td, store) = fixture();
    assert_eq!(
        common::search_names(&store, "uses AND function"),
        common::search_names(&store, "uses function")
    );
    assert_eq!(
        common::search_names(&store, "NOT (uses OR camel)"),
        common::search_names(&store, "NOT uses AND NOT camel")
    );
}

#[test]
fn range_closure() {
    let (_td, store) = fixture();
    // bar is the only 8-byte symbol; functions are 16 bytes
    assert_eq!(common::search_names(&store, "size:8..16").len(), 5);
    assert_eq!(common::search_names(&store, "size:..8"), vec!["bar"]);
    assert_eq!(common::search_names(&store, "size:8..8"), vec!["bar"]);
    assert_eq!(common::search_names(&store, "size:17..").len(), 0);
    assert_eq!(common::search_names(&store, "size:16..16").len(), 4);
}

#[test]
fn count_and_limit() {
    let (_td, store) = fixture();
    let s = Store::open(&store).unwrap();
    let searcher = Searcher::new(&s);
    let plan = searcher.parse("*:*").unwrap();
    assert_eq!(searcher.count(&plan).unwrap(), 5);
    assert_eq!(searcher.search(&plan, Some(2)).unwrap().len(), 2);
}

#[test]
fn records_carry_elf_metadata() {
    let (td, store) = fixture();
    let records = common::search(&store, "fullname:uses_c_function");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.path, td.path().join("build/b.o").to_string_lossy());
    assert_eq!(record.section, ".text");
    assert_eq!(record.size, 16);
    assert!(record.mtime > 0);
    assert_eq!(record.relocations, vec!["c_function"]);
}
