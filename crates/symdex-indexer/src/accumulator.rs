//! Shared in-memory merge buffers for the four tables, drained by a single
//! background flusher. Producers union their job outputs into the buffers
//! under one mutex; the flusher swaps the buffers out wholesale and performs
//! the read-modify-write against the store, so no per-key locking is needed
//! between producers and disk.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use symdex_core::{
    CursorInfo, DependencyMap, FileInformationMap, Location, Result, SymbolMap, SymbolNameMap,
    SymdexError,
};
use symdex_store::{put_value, IndexStore, Table, WriteBatch};
use tracing::{debug, warn};

#[derive(Default)]
pub(crate) struct Buffers {
    pub symbols: SymbolMap,
    pub symbol_names: SymbolNameMap,
    pub dependencies: DependencyMap,
    pub informations: FileInformationMap,
}

impl Buffers {
    fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.symbol_names.is_empty()
            && self.dependencies.is_empty()
            && self.informations.is_empty()
    }
}

struct AccumulatorState {
    buffers: Buffers,
    stopped: bool,
}

pub struct Accumulator {
    state: Mutex<AccumulatorState>,
    cond: Condvar,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AccumulatorState {
                buffers: Buffers::default(),
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn add_symbols(&self, symbols: SymbolMap) {
        let mut state = self.state.lock();
        for (location, info) in symbols {
            state
                .buffers
                .symbols
                .entry(location)
                .and_modify(|existing| {
                    existing.unite(&info);
                })
                .or_insert(info);
        }
    }

    pub fn add_symbol_names(&self, names: SymbolNameMap) {
        let mut state = self.state.lock();
        for (name, locations) in names {
            state
                .buffers
                .symbol_names
                .entry(name)
                .or_default()
                .extend(locations);
        }
    }

    pub fn add_dependencies(&self, dependencies: DependencyMap) {
        let mut state = self.state.lock();
        for (path, dependents) in dependencies {
            state
                .buffers
                .dependencies
                .entry(path)
                .or_default()
                .extend(dependents);
        }
    }

    /// Last writer wins per translation unit.
    pub fn add_file_information(&self, input: String, args: Vec<String>) {
        let mut state = self.state.lock();
        state.buffers.informations.insert(input, args);
    }

    /// Wake the flusher; called by the coordinator on drain and every
    /// sync-interval completions.
    pub fn notify(&self) {
        let _state = self.state.lock();
        self.cond.notify_one();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cond.notify_all();
    }

    /// Block until there is something to flush, returning a snapshot of the
    /// buffers. Returns `None` once stopped.
    fn take(&self, idle: Duration) -> Option<Buffers> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if !state.buffers.is_empty() {
                return Some(std::mem::take(&mut state.buffers));
            }
            self.cond.wait_for(&mut state, idle);
        }
    }
}

pub struct Flusher;

impl Flusher {
    pub fn spawn(
        accumulator: Arc<Accumulator>,
        store: Arc<IndexStore>,
        idle: Duration,
    ) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("symdex-flusher".to_string())
            .spawn(move || {
                while let Some(buffers) = accumulator.take(idle) {
                    flush(&accumulator, &store, buffers);
                }
            })
            .map_err(|e| SymdexError::Threading(e.to_string()))
    }
}

/// Apply one buffer snapshot to the store. A table whose commit fails keeps
/// its data pending by merging it back into the accumulator.
fn flush(accumulator: &Accumulator, store: &IndexStore, buffers: Buffers) {
    let Buffers {
        symbols,
        symbol_names,
        dependencies,
        informations,
    } = buffers;

    if !symbol_names.is_empty() {
        if let Err(e) = flush_symbol_names(store, &symbol_names) {
            warn!("symbol name flush failed, re-queueing: {e}");
            accumulator.add_symbol_names(symbol_names);
        }
    }
    if !symbols.is_empty() {
        if let Err(e) = flush_symbols(store, &symbols) {
            warn!("symbol flush failed, re-queueing: {e}");
            accumulator.add_symbols(symbols);
        }
    }
    if !dependencies.is_empty() {
        if let Err(e) = flush_dependencies(store, &dependencies) {
            warn!("dependency flush failed, re-queueing: {e}");
            accumulator.add_dependencies(dependencies);
        }
    }
    if !informations.is_empty() {
        if let Err(e) = flush_informations(store, &informations) {
            warn!("file information flush failed, re-queueing: {e}");
            let mut state = accumulator.state.lock();
            for (input, args) in informations {
                state.buffers.informations.entry(input).or_insert(args);
            }
        }
    }
}

fn flush_symbol_names(store: &IndexStore, names: &SymbolNameMap) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut changed = false;
    for (name, added) in names {
        let current: BTreeSet<Location> = store
            .read(Table::SymbolName, name.as_bytes())?
            .unwrap_or_default();
        let mut merged = current.clone();
        merged.extend(added.iter().cloned());
        if merged != current {
            changed = true;
            put_value(&mut batch, name.as_bytes(), &merged)?;
        }
    }
    if changed {
        store.commit(Table::SymbolName, batch)?;
        debug!("flushed {} symbol name entries", names.len());
    }
    Ok(())
}

fn flush_symbols(store: &IndexStore, symbols: &SymbolMap) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut changed = false;
    for (location, added) in symbols {
        let key = location.stable_key();
        let mut current: CursorInfo = store.read(Table::Symbol, key.as_bytes())?.unwrap_or_default();
        if current.unite(added) {
            changed = true;
            put_value(&mut batch, key.as_bytes(), &current)?;
        }
    }
    if changed {
        store.commit(Table::Symbol, batch)?;
        debug!("flushed {} symbol entries", symbols.len());
    }
    Ok(())
}

fn flush_dependencies(store: &IndexStore, dependencies: &DependencyMap) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut changed = false;
    for (path, added) in dependencies {
        let current: BTreeSet<String> = store
            .read(Table::Dependency, path.as_bytes())?
            .unwrap_or_default();
        let mut merged = current.clone();
        merged.extend(added.iter().cloned());
        if merged != current {
            changed = true;
            put_value(&mut batch, path.as_bytes(), &merged)?;
        }
    }
    if changed {
        store.commit(Table::Dependency, batch)?;
    }
    Ok(())
}

fn flush_informations(store: &IndexStore, informations: &FileInformationMap) -> Result<()> {
    let mut batch = WriteBatch::default();
    for (input, args) in informations {
        put_value(&mut batch, input.as_bytes(), args)?;
    }
    store.commit(Table::FileInformation, batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symdex_core::CursorKind;
    use tempfile::TempDir;

    fn loc(path: &str, offset: u32) -> Location {
        Location::new(path, offset)
    }

    fn info(length: u32, references: &[Location]) -> CursorInfo {
        CursorInfo {
            kind: CursorKind::FunctionDecl,
            symbol_length: length,
            target: None,
            references: references.iter().cloned().collect(),
        }
    }

    #[test]
    fn buffer_merges_are_unions_not_replacement() {
        let accumulator = Accumulator::new();
        accumulator.add_symbols(SymbolMap::from([(
            loc("/a.cpp", 4),
            info(3, &[loc("/a.cpp", 30)]),
        )]));
        accumulator.add_symbols(SymbolMap::from([(
            loc("/a.cpp", 4),
            info(3, &[loc("/b.cpp", 7)]),
        )]));
        accumulator.add_symbol_names(SymbolNameMap::from([(
            "foo".to_string(),
            BTreeSet::from([loc("/a.cpp", 4)]),
        )]));
        accumulator.add_symbol_names(SymbolNameMap::from([(
            "foo".to_string(),
            BTreeSet::from([loc("/b.cpp", 7)]),
        )]));
        accumulator.add_file_information("/a.cpp".to_string(), vec!["-x".into(), "c++".into()]);
        accumulator.add_file_information("/a.cpp".to_string(), vec!["-x".into(), "c".into()]);

        let state = accumulator.state.lock();
        let merged = &state.buffers.symbols[&loc("/a.cpp", 4)];
        assert_eq!(merged.references.len(), 2);
        assert_eq!(state.buffers.symbol_names["foo"].len(), 2);
        // FileInformation is last-writer-wins.
        assert_eq!(
            state.buffers.informations["/a.cpp"],
            vec!["-x".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn flush_merges_with_store_contents() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();

        let mut first = SymbolNameMap::new();
        first.insert("foo".to_string(), BTreeSet::from([loc("/a.cpp", 4)]));
        flush_symbol_names(&store, &first).unwrap();

        let mut second = SymbolNameMap::new();
        second.insert("foo".to_string(), BTreeSet::from([loc("/b.cpp", 9)]));
        flush_symbol_names(&store, &second).unwrap();

        let merged: BTreeSet<Location> = store.read(Table::SymbolName, b"foo").unwrap().unwrap();
        assert_eq!(merged, BTreeSet::from([loc("/a.cpp", 4), loc("/b.cpp", 9)]));
    }

    #[test]
    fn flush_symbols_unites_cursor_info() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        let location = loc("/a.cpp", 4);

        flush_symbols(
            &store,
            &SymbolMap::from([(location.clone(), info(3, &[loc("/a.cpp", 30)]))]),
        )
        .unwrap();
        flush_symbols(
            &store,
            &SymbolMap::from([(location.clone(), info(0, &[loc("/c.cpp", 2)]))]),
        )
        .unwrap();

        let stored: CursorInfo = store
            .read(Table::Symbol, location.stable_key().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(stored.symbol_length, 3);
        assert_eq!(stored.references.len(), 2);
    }

    #[test]
    fn empty_flush_leaves_store_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        flush_symbol_names(&store, &SymbolNameMap::new()).unwrap();
        flush_symbols(&store, &SymbolMap::new()).unwrap();
        flush_dependencies(&store, &DependencyMap::new()).unwrap();
        for table in Table::ALL {
            assert_eq!(store.iter(table).count(), 0);
        }
    }

    #[test]
    fn redundant_flush_stages_no_writes() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        let mut names = SymbolNameMap::new();
        names.insert("bar".to_string(), BTreeSet::from([loc("/a.cpp", 1)]));
        flush_symbol_names(&store, &names).unwrap();
        // Same delta again: the union does not grow, nothing is re-written.
        flush_symbol_names(&store, &names).unwrap();
        let stored: BTreeSet<Location> = store.read(Table::SymbolName, b"bar").unwrap().unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn stop_wakes_the_flusher() {
        let accumulator = Arc::new(Accumulator::new());
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open(tmp.path()).unwrap());
        let handle = Flusher::spawn(
            accumulator.clone(),
            store.clone(),
            Duration::from_secs(10),
        )
        .unwrap();
        accumulator.stop();
        handle.join().unwrap();
    }
}
