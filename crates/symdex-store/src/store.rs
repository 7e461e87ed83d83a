//! Typed read/write facade over the four index tables. Each table is its own
//! ordered RocksDB database under the project storage directory, opened once
//! at construction and shared across the flusher and sweeper threads.

use rocksdb::{DBCompressionType, DBWithThreadMode, IteratorMode, MultiThreaded, Options};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symdex_core::{codec, Result, SymdexError};
use tracing::debug;

pub use rocksdb::WriteBatch;

type Db = DBWithThreadMode<MultiThreaded>;

/// The four logical tables of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Symbol,
    SymbolName,
    Dependency,
    FileInformation,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Symbol,
        Table::SymbolName,
        Table::Dependency,
        Table::FileInformation,
    ];

    /// Subdirectory of the project storage holding this table.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Table::Symbol => "symbols",
            Table::SymbolName => "symbolnames",
            Table::Dependency => "dependencies",
            Table::FileInformation => "fileinformation",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Table::Symbol => 0,
            Table::SymbolName => 1,
            Table::Dependency => 2,
            Table::FileInformation => 3,
        }
    }
}

#[derive(Clone)]
pub struct IndexStore {
    dbs: [Arc<Db>; 4],
    root: PathBuf,
}

impl IndexStore {
    /// Open (creating as needed) the four databases under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(DBCompressionType::Lz4);

        let mut dbs = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let path = root.join(table.dir_name());
            let db = Db::open(&opts, &path).map_err(|e| {
                SymdexError::Database(format!("failed to open {}: {e}", table.dir_name()))
            })?;
            dbs.push(Arc::new(db));
        }
        let dbs: [Arc<Db>; 4] = dbs
            .try_into()
            .map_err(|_| SymdexError::Database("table set mismatch".to_string()))?;

        debug!("opened index store at {}", root.display());
        Ok(Self {
            dbs,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn db(&self, table: Table) -> &Db {
        &self.dbs[table.slot()]
    }

    /// Point lookup, decoding the stored value.
    pub fn read<T: bincode::Decode<()>>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let bytes = self
            .db(table)
            .get(key)
            .map_err(|e| SymdexError::Database(e.to_string()))?;
        match bytes {
            Some(bytes) => Ok(Some(codec::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ordered forward scan over the whole table.
    pub fn iter(
        &self,
        table: Table,
    ) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_ {
        self.db(table)
            .iterator(IteratorMode::Start)
            .map(|item| item.map_err(|e| SymdexError::Database(e.to_string())))
    }

    /// Atomically apply a batch of puts and deletes to one table.
    pub fn commit(&self, table: Table, batch: WriteBatch) -> Result<()> {
        self.db(table)
            .write(batch)
            .map_err(|e| SymdexError::Database(e.to_string()))
    }
}

/// Stage an encoded put into a batch.
pub fn put_value<T: bincode::Encode>(batch: &mut WriteBatch, key: &[u8], value: &T) -> Result<()> {
    batch.put(key, codec::to_bytes(value)?);
    Ok(())
}
