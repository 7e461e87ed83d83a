pub mod accumulator;
pub mod config;
pub mod coordinator;
pub mod deps;
pub mod watch;

mod dirty_job;
mod parse_job;

pub use config::IndexerConfig;
pub use coordinator::{IndexEvent, Indexer};
