use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the indexing pipeline. Only `storage_path` is required;
/// everything else defaults to the values the daemon ships with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Project storage directory: holds the four table databases and the
    /// PCH artifacts.
    pub storage_path: PathBuf,

    /// Size of the worker pool executing parse and dirty jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wake the flusher after this many job completions even while jobs are
    /// still in flight.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u32,

    /// How long the flusher idles on empty buffers before re-checking.
    #[serde(default = "default_flush_idle_ms")]
    pub flush_idle_ms: u64,
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_sync_interval() -> u32 {
    10
}

fn default_flush_idle_ms() -> u64 {
    10_000
}

impl IndexerConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            workers: default_workers(),
            sync_interval: default_sync_interval(),
            flush_idle_ms: default_flush_idle_ms(),
        }
    }

    pub fn flush_idle(&self) -> Duration {
        Duration::from_millis(self.flush_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_from_partial_config() {
        let config: IndexerConfig =
            serde_json::from_str(r#"{"storage_path": "/var/lib/symdex"}"#).unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/var/lib/symdex"));
        assert_eq!(config.sync_interval, 10);
        assert_eq!(config.flush_idle(), Duration::from_secs(10));
        assert!(config.workers >= 1);
    }
}
