//! RocksDB backend with column families.
//!
//! Objects live in one column family; the committed root's identity is kept
//! in a metadata column family so a reopened database resumes at the revision
//! it was committed to.

use crate::backend::{Backend, Entry};
use crate::{Result, StateError};
use kestrel_types::Multihash;
use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Column family names
mod cf {
    /// Object entries, keyed by composite `(space, key)` bytes
    pub const OBJECTS: &str = "objects";
    /// Backend metadata: root id and revision
    pub const METADATA: &str = "metadata";

    /// All column families
    pub const ALL: &[&str] = &[OBJECTS, METADATA];
}

const ROOT_ID_KEY: &[u8] = b"root_id";
const ROOT_REVISION_KEY: &[u8] = b"root_revision";

/// RocksDB tuning configuration.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Path to the database directory
    pub path: String,
    /// Enable LZ4 compression
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/kestrel"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// A persistent backend over RocksDB.
pub struct RocksBackend {
    inner: DBWithThreadMode<MultiThreaded>,
    config: RocksConfig,
    // RocksDB reads count keys approximately; track exactly under this lock.
    len: RwLock<u64>,
}

impl RocksBackend {
    /// Opens or creates a database at the configured path.
    pub fn open(config: RocksConfig) -> Result<Self> {
        info!("opening state backend at {}", config.path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            Path::new(&config.path),
            cf_descriptors,
        )
        .map_err(|e| StateError::BackendFailure(e.to_string()))?;

        let backend = Self {
            inner: db,
            config,
            len: RwLock::new(0),
        };
        let count = backend.count_objects()?;
        *backend.len.write() = count;
        info!("state backend opened with {} objects", count);
        Ok(backend)
    }

    /// Opens with default configuration at the given path.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(RocksConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        })
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StateError::BackendFailure(format!("missing column family {name}")))
    }

    fn count_objects(&self) -> Result<u64> {
        let cf = self.cf_handle(cf::OBJECTS)?;
        let mut count = 0u64;
        for item in self.inner.iterator_cf(&cf, IteratorMode::Start) {
            item.map_err(|e| StateError::BackendFailure(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    fn seek(&self, mode: IteratorMode<'_>) -> Result<Option<Entry>> {
        let cf = self.cf_handle(cf::OBJECTS)?;
        match self.inner.iterator_cf(&cf, mode).next() {
            Some(Ok((key, value))) => Ok(Some((key.to_vec(), value.to_vec()))),
            Some(Err(e)) => Err(StateError::BackendFailure(e.to_string())),
            None => Ok(None),
        }
    }
}

impl Backend for RocksBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf::OBJECTS)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StateError::BackendFailure(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf::OBJECTS)?;
        let mut len = self.len.write();
        let existed = self
            .inner
            .get_cf(&cf, key)
            .map_err(|e| StateError::BackendFailure(e.to_string()))?
            .is_some();
        self.inner
            .put_cf(&cf, key, value)
            .map_err(|e| StateError::BackendFailure(e.to_string()))?;
        if !existed {
            *len += 1;
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf::OBJECTS)?;
        let mut len = self.len.write();
        let existed = self
            .inner
            .get_cf(&cf, key)
            .map_err(|e| StateError::BackendFailure(e.to_string()))?
            .is_some();
        if existed {
            self.inner
                .delete_cf(&cf, key)
                .map_err(|e| StateError::BackendFailure(e.to_string()))?;
            *len -= 1;
        }
        Ok(())
    }

    fn lower_bound(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.seek(IteratorMode::From(key, Direction::Forward))
    }

    fn prev_before(&self, key: &[u8]) -> Result<Option<Entry>> {
        // Reverse iteration from `key` starts at the last entry `<= key`;
        // skip past any entries `>= key` to get strictly-less semantics.
        let cf = self.cf_handle(cf::OBJECTS)?;
        for item in self
            .inner
            .iterator_cf(&cf, IteratorMode::From(key, Direction::Reverse))
        {
            let (found, value) = item.map_err(|e| StateError::BackendFailure(e.to_string()))?;
            if found.as_ref() < key {
                return Ok(Some((found.to_vec(), value.to_vec())));
            }
        }
        Ok(None)
    }

    fn first(&self) -> Result<Option<Entry>> {
        self.seek(IteratorMode::Start)
    }

    fn last(&self) -> Result<Option<Entry>> {
        self.seek(IteratorMode::End)
    }

    fn len(&self) -> Result<u64> {
        Ok(*self.len.read())
    }

    fn root_info(&self) -> Result<Option<(Multihash, u64)>> {
        let cf = self.cf_handle(cf::METADATA)?;
        let id = self
            .inner
            .get_cf(&cf, ROOT_ID_KEY)
            .map_err(|e| StateError::BackendFailure(e.to_string()))?;
        let revision = self
            .inner
            .get_cf(&cf, ROOT_REVISION_KEY)
            .map_err(|e| StateError::BackendFailure(e.to_string()))?;
        match (id, revision) {
            (Some(id), Some(revision)) if revision.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&revision);
                Ok(Some((Multihash::decode(&id)?, u64::from_be_bytes(raw))))
            }
            _ => Ok(None),
        }
    }

    fn set_root_info(&self, id: &Multihash, revision: u64) -> Result<()> {
        let cf = self.cf_handle(cf::METADATA)?;
        self.inner
            .put_cf(&cf, ROOT_ID_KEY, id.encode())
            .map_err(|e| StateError::BackendFailure(e.to_string()))?;
        self.inner
            .put_cf(&cf, ROOT_REVISION_KEY, revision.to_be_bytes())
            .map_err(|e| StateError::BackendFailure(e.to_string()))
    }
}

impl Drop for RocksBackend {
    fn drop(&mut self) {
        debug!("closing state backend at {}", self.config.path);
    }
}
