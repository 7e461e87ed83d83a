//! Invalidation: sweep the Symbol and SymbolName tables for entries touching
//! a set of dirty paths, delete or rewrite them, then requeue the affected
//! translation units, PCH producers first.

use crate::coordinator::{self, Inner};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use symdex_core::{codec, CursorInfo, Location, Result};
use symdex_store::{put_value, IndexStore, Table, WriteBatch};
use tracing::{debug, warn};

pub(crate) struct DirtyJob {
    dirty: HashSet<String>,
    to_index_pch: HashMap<String, Vec<String>>,
    to_index: HashMap<String, Vec<String>>,
}

impl DirtyJob {
    pub fn new(
        dirty: HashSet<String>,
        to_index_pch: HashMap<String, Vec<String>>,
        to_index: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            dirty,
            to_index_pch,
            to_index,
        }
    }

    pub fn run(self, inner: &Arc<Inner>) {
        debug!("dirty job over {} paths", self.dirty.len());
        if let Err(e) = sweep_symbols(&inner.store, &self.dirty) {
            warn!("symbol sweep aborted: {e}");
        }
        if let Err(e) = sweep_symbol_names(&inner.store, &self.dirty) {
            warn!("symbol name sweep aborted: {e}");
        }
        // PCH producers first so their artifacts exist again before any
        // consumer re-parses.
        for (input, args) in &self.to_index_pch {
            coordinator::submit(inner, input, args);
        }
        for (input, args) in &self.to_index {
            coordinator::submit(inner, input, args);
        }
    }
}

/// Remove every Symbol entry located in a dirty path and scrub dirty
/// locations out of the remaining records.
pub(crate) fn sweep_symbols(store: &IndexStore, dirty: &HashSet<String>) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut write = false;
    for item in store.iter(Table::Symbol) {
        let (key, value) = item?;
        let key_str = String::from_utf8_lossy(&key);
        let Some(path) = Location::path_of_key(&key_str) else {
            continue;
        };
        if dirty.contains(path) {
            batch.delete(&key);
            write = true;
            continue;
        }
        let mut info: CursorInfo = codec::from_bytes(&value)?;
        if info.dirty(dirty) {
            write = true;
            if info.is_empty() {
                batch.delete(&key);
            } else {
                put_value(&mut batch, &key, &info)?;
            }
        }
    }
    if write {
        store.commit(Table::Symbol, batch)?;
    }
    Ok(())
}

/// Scrub dirty locations out of every symbol-name entry, dropping entries
/// that end up empty.
pub(crate) fn sweep_symbol_names(store: &IndexStore, dirty: &HashSet<String>) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut write = false;
    for item in store.iter(Table::SymbolName) {
        let (key, value) = item?;
        let locations: BTreeSet<Location> = codec::from_bytes(&value)?;
        let kept: BTreeSet<Location> = locations
            .iter()
            .filter(|loc| !dirty.contains(&loc.path))
            .cloned()
            .collect();
        if kept.len() == locations.len() {
            continue;
        }
        write = true;
        if kept.is_empty() {
            batch.delete(&key);
        } else {
            put_value(&mut batch, &key, &kept)?;
        }
    }
    if write {
        store.commit(Table::SymbolName, batch)?;
    }
    Ok(())
}
