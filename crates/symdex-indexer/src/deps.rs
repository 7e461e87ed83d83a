//! In-memory dependency registry: which translation units include a given
//! file, plus the transitive header sets of produced PCHs. The persistent
//! Dependency table only ever receives the edges a commit actually added,
//! so it grows monotonically.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use symdex_core::DependencyMap;

#[derive(Default)]
pub struct DependencyRegistry {
    dependencies: Mutex<DependencyMap>,
    pch_dependencies: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `delta` into the global map and return only the edges that were
    /// not present before.
    pub fn commit(&self, delta: &DependencyMap) -> DependencyMap {
        let mut global = self.dependencies.lock();
        let mut added = DependencyMap::new();
        for (path, dependents) in delta {
            let entry = global.entry(path.clone()).or_default();
            let new: BTreeSet<String> = dependents.difference(entry).cloned().collect();
            if !new.is_empty() {
                entry.extend(new.iter().cloned());
                added.insert(path.clone(), new);
            }
        }
        added
    }

    /// Translation units whose parse pulled in `path`.
    pub fn dependents(&self, path: &str) -> Option<BTreeSet<String>> {
        self.dependencies.lock().get(path).cloned()
    }

    pub fn set_pch_dependencies(&self, header: &str, deps: BTreeSet<String>) {
        let mut map = self.pch_dependencies.write();
        if deps.is_empty() {
            map.remove(header);
        } else {
            map.insert(header.to_string(), deps);
        }
    }

    pub fn pch_dependencies(&self, header: &str) -> BTreeSet<String> {
        self.pch_dependencies
            .read()
            .get(header)
            .cloned()
            .unwrap_or_default()
    }
}
