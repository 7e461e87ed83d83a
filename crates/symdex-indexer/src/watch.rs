//! Per-directory change detection. The registry remembers, for every parent
//! directory of an indexed dependency, the files it cares about and their
//! last seen mtimes. A directory event compares the stored mtimes against
//! the filesystem and yields the set of files that changed or disappeared;
//! survivors are rearmed with freshly stat'd mtimes.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use symdex_core::paths;
use tracing::{debug, warn};

#[derive(Default)]
pub struct WatchRegistry {
    /// parent directory (with trailing slash) -> file name -> mtime millis.
    watched: Mutex<HashMap<String, HashMap<String, u64>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over the OS watcher whose events feed `directory_changed`.
    pub fn attach(&self, watcher: RecommendedWatcher) {
        *self.watcher.lock() = Some(watcher);
    }

    pub fn shutdown(&self) {
        *self.watcher.lock() = None;
    }

    /// Start tracking `paths`, subscribing to their parent directories the
    /// first time one is seen.
    pub fn register<I>(&self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut new_dirs = Vec::new();
        {
            let mut watched = self.watched.lock();
            for path in paths {
                let dir = paths::parent_dir(&path);
                let files = watched.entry(dir.clone()).or_insert_with(|| {
                    new_dirs.push(dir.clone());
                    HashMap::new()
                });
                files.insert(
                    paths::file_name(&path).to_string(),
                    paths::mtime_millis(&path).unwrap_or(0),
                );
            }
        }
        if new_dirs.is_empty() {
            return;
        }
        let mut watcher = self.watcher.lock();
        if let Some(watcher) = watcher.as_mut() {
            for dir in new_dirs {
                debug!("watching {dir}");
                if let Err(e) = watcher.watch(Path::new(&dir), RecursiveMode::NonRecursive) {
                    warn!("failed to watch {dir}: {e}");
                }
            }
        }
    }

    /// Process a change event for `dir`: returns the full paths of tracked
    /// files that are gone or have a different mtime, or `None` when the
    /// directory was never registered. Gone files are dropped from the set;
    /// changed ones are rearmed with their current mtime.
    pub fn scan_changed(&self, dir: &str) -> Option<Vec<String>> {
        let mut watched = self.watched.lock();
        let files = watched.get_mut(dir)?;
        let mut dirty = Vec::new();
        let names: Vec<String> = files.keys().cloned().collect();
        for name in names {
            let full = format!("{dir}{name}");
            match paths::mtime_millis(&full) {
                None => {
                    files.remove(&name);
                    dirty.push(full);
                }
                Some(mtime) if files[&name] != mtime => {
                    files.insert(name, mtime);
                    dirty.push(full);
                }
                Some(_) => {}
            }
        }
        Some(dirty)
    }

    #[cfg(test)]
    fn tracked(&self, dir: &str) -> Option<HashMap<String, u64>> {
        self.watched.lock().get(dir).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_directory_is_a_miss() {
        let registry = WatchRegistry::new();
        assert!(registry.scan_changed("/tmp/unused/").is_none());
    }

    #[test]
    fn detects_rewrites_and_removals() {
        let tmp = TempDir::new().unwrap();
        let keep = tmp.path().join("keep.h");
        let touch = tmp.path().join("touch.h");
        let gone = tmp.path().join("gone.h");
        for file in [&keep, &touch, &gone] {
            std::fs::write(file, "x").unwrap();
        }

        let registry = WatchRegistry::new();
        let as_str = |p: &std::path::Path| p.to_string_lossy().into_owned();
        registry.register([as_str(&keep), as_str(&touch), as_str(&gone)]);

        let dir = paths::parent_dir(&as_str(&keep));
        assert_eq!(registry.scan_changed(&dir), Some(vec![]));

        std::thread::sleep(std::time::Duration::from_millis(30));
        std::fs::write(&touch, "different contents").unwrap();
        std::fs::remove_file(&gone).unwrap();

        let mut dirty = registry.scan_changed(&dir).unwrap();
        dirty.sort();
        let mut expected = vec![as_str(&touch), as_str(&gone)];
        expected.sort();
        assert_eq!(dirty, expected);

        // Gone file dropped, touched file rearmed with the new mtime.
        let tracked = registry.tracked(&dir).unwrap();
        assert!(!tracked.contains_key("gone.h"));
        assert_eq!(registry.scan_changed(&dir), Some(vec![]));
    }
}
