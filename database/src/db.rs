use crate::errors::{DbError, DbResult};
use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

/// Raw 512-byte block bodies, keyed by low hash.
pub const CF_BLOCKS: &str = "blocks";
/// Encoded `BlockInfo`, keyed by low hash.
pub const CF_INFO: &str = "info";
/// Main-chain index: big-endian height to low hash.
pub const CF_HEIGHTS: &str = "heights";
/// Chain metadata (schema version, network, genesis, tip).
pub const CF_META: &str = "meta";

/// Thin RocksDB wrapper. Writes going through [`Database::write_batch`] are
/// atomic; readers observe whole batches or nothing.
pub struct Database {
    db: Arc<DB>,
    is_closed: Arc<RwLock<bool>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(4096);
        opts.set_keep_log_file_num(10);
        opts.set_max_background_jobs(4);
        opts.set_bytes_per_sync(1_048_576);
        opts.increase_parallelism(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(64 * 1024 * 1024);

        let cf_descriptors: Vec<_> = [CF_BLOCKS, CF_INFO, CF_HEIGHTS, CF_META]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self {
            db: Arc::new(db),
            is_closed: Arc::new(RwLock::new(false)),
        })
    }

    fn check_closed(&self) -> DbResult<()> {
        if *self.is_closed.read() {
            return Err(DbError::DatabaseClosed);
        }
        Ok(())
    }

    fn cf_handle(&self, cf_name: &str) -> DbResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_name)
            .ok_or_else(|| DbError::ColumnFamilyNotFound(cf_name.to_string()))
    }

    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    pub fn get(&self, cf_name: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    pub fn delete(&self, cf_name: &str, key: &[u8]) -> DbResult<()> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }

    pub fn exists(&self, cf_name: &str, key: &[u8]) -> DbResult<bool> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    pub fn batch_put(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &[u8],
    ) -> DbResult<()> {
        let cf = self.cf_handle(cf_name)?;
        batch.put_cf(cf, key, value);
        Ok(())
    }

    pub fn batch_delete(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8]) -> DbResult<()> {
        let cf = self.cf_handle(cf_name)?;
        batch.delete_cf(cf, key);
        Ok(())
    }

    pub fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
        self.check_closed()?;
        self.db.write(batch)?;
        Ok(())
    }

    pub fn iterator(
        &self,
        cf_name: &str,
        mode: IteratorMode,
    ) -> DbResult<rocksdb::DBIteratorWithThreadMode<'_, DB>> {
        self.check_closed()?;
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.iterator_cf(cf, mode))
    }

    pub fn close(&self) {
        *self.is_closed.write() = true;
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            is_closed: self.is_closed.clone(),
        }
    }
}
