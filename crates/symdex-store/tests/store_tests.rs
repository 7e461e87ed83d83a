use std::collections::BTreeSet;
use symdex_core::{CursorInfo, CursorKind, Location};
use symdex_store::{put_value, IndexStore, Table, WriteBatch};
use tempfile::TempDir;

#[test]
fn open_creates_four_table_directories() {
    let tmp = TempDir::new().unwrap();
    let _store = IndexStore::open(tmp.path()).unwrap();
    for table in Table::ALL {
        assert!(tmp.path().join(table.dir_name()).is_dir());
    }
}

#[test]
fn read_back_committed_value() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(tmp.path()).unwrap();

    let info = CursorInfo {
        kind: CursorKind::FunctionDecl,
        symbol_length: 3,
        target: None,
        references: BTreeSet::from([Location::new("/b.cpp", 12)]),
    };
    let key = Location::new("/a.cpp", 4).stable_key();

    let mut batch = WriteBatch::default();
    put_value(&mut batch, key.as_bytes(), &info).unwrap();
    store.commit(Table::Symbol, batch).unwrap();

    let got: Option<CursorInfo> = store.read(Table::Symbol, key.as_bytes()).unwrap();
    assert_eq!(got, Some(info));
    let miss: Option<CursorInfo> = store
        .read(Table::Symbol, b"/missing.cpp,000000000")
        .unwrap();
    assert!(miss.is_none());
}

#[test]
fn iteration_is_key_ordered() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(tmp.path()).unwrap();

    let locations = [
        Location::new("/dir/z.cpp", 5),
        Location::new("/dir/a.cpp", 100),
        Location::new("/dir/a.cpp", 7),
    ];
    let mut batch = WriteBatch::default();
    for loc in &locations {
        put_value(&mut batch, loc.stable_key().as_bytes(), &CursorInfo::default()).unwrap();
    }
    store.commit(Table::Symbol, batch).unwrap();

    let keys: Vec<String> = store
        .iter(Table::Symbol)
        .map(|item| String::from_utf8(item.unwrap().0.into_vec()).unwrap())
        .collect();
    assert_eq!(
        keys,
        vec![
            "/dir/a.cpp,000000007".to_string(),
            "/dir/a.cpp,000000100".to_string(),
            "/dir/z.cpp,000000005".to_string(),
        ]
    );
}

#[test]
fn batch_delete_applies_atomically() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(tmp.path()).unwrap();

    let mut batch = WriteBatch::default();
    put_value(&mut batch, b"/a.h", &BTreeSet::from(["/a.cpp".to_string()])).unwrap();
    put_value(&mut batch, b"/b.h", &BTreeSet::from(["/b.cpp".to_string()])).unwrap();
    store.commit(Table::Dependency, batch).unwrap();

    let mut batch = WriteBatch::default();
    batch.delete(b"/a.h");
    put_value(&mut batch, b"/c.h", &BTreeSet::from(["/c.cpp".to_string()])).unwrap();
    store.commit(Table::Dependency, batch).unwrap();

    let a: Option<BTreeSet<String>> = store.read(Table::Dependency, b"/a.h").unwrap();
    let c: Option<BTreeSet<String>> = store.read(Table::Dependency, b"/c.h").unwrap();
    assert!(a.is_none());
    assert_eq!(c, Some(BTreeSet::from(["/c.cpp".to_string()])));
}

#[test]
fn tables_are_independent() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::open(tmp.path()).unwrap();

    let mut batch = WriteBatch::default();
    put_value(&mut batch, b"shared-key", &42u32).unwrap();
    store.commit(Table::SymbolName, batch).unwrap();

    let other: Option<u32> = store.read(Table::Dependency, b"shared-key").unwrap();
    assert!(other.is_none());
}
