use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch, WriteOptions,
};

use crate::api::{StorageBackend, StorageReadView, StorageWriteBatch, TableName, TABLES};
use crate::config::BackendOptions;
use crate::error::StoreError;

type Db = DBWithThreadMode<MultiThreaded>;

/// Durable backend: one RocksDB column family per table, write batches for
/// atomicity, the WAL for crash consistency. `BackendOptions` are forwarded
/// to the engine untouched.
pub struct RocksDBBackend {
    db: Arc<Db>,
    sync_writes: bool,
}

impl RocksDBBackend {
    pub fn open(path: impl AsRef<Path>, options: &BackendOptions) -> Result<Self, StoreError> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        db_options.create_missing_column_families(true);
        db_options.set_max_background_jobs(options.max_background_jobs);

        let compression = if options.compression {
            DBCompressionType::Lz4
        } else {
            DBCompressionType::None
        };

        let descriptors = TABLES.iter().map(|table| {
            let mut cf_options = Options::default();
            cf_options.set_write_buffer_size(options.write_buffer_size);
            cf_options.set_compression_type(compression);
            ColumnFamilyDescriptor::new(*table, cf_options)
        });

        let db = Db::open_cf_descriptors(&db_options, path, descriptors)
            .map_err(|err| StoreError::Backend(err.into()))?;
        Ok(RocksDBBackend {
            db: Arc::new(db),
            sync_writes: options.sync_writes,
        })
    }
}

impl StorageBackend for RocksDBBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView>, StoreError> {
        Ok(Box::new(RocksDBReadView {
            db: self.db.clone(),
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch>, StoreError> {
        Ok(Box::new(RocksDBWriteBatch {
            db: self.db.clone(),
            batch: WriteBatch::default(),
            sync_writes: self.sync_writes,
        }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|err| StoreError::Backend(err.into()))
    }
}

struct RocksDBReadView {
    db: Arc<Db>,
}

impl StorageReadView for RocksDBReadView {
    fn get(&self, table: TableName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.db.cf_handle(table).ok_or(StoreError::MissingTable(table))?;
        self.db
            .get_cf(&cf, key)
            .map_err(|err| StoreError::Backend(err.into()))
    }
}

struct RocksDBWriteBatch {
    db: Arc<Db>,
    batch: WriteBatch,
    sync_writes: bool,
}

impl StorageWriteBatch for RocksDBWriteBatch {
    fn put(&mut self, table: TableName, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let cf = self.db.cf_handle(table).ok_or(StoreError::MissingTable(table))?;
        self.batch.put_cf(&cf, key, value);
        Ok(())
    }

    fn delete(&mut self, table: TableName, key: Vec<u8>) -> Result<(), StoreError> {
        let cf = self.db.cf_handle(table).ok_or(StoreError::MissingTable(table))?;
        self.batch.delete_cf(&cf, key);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut write_options = WriteOptions::default();
        write_options.set_sync(self.sync_writes);
        self.db
            .write_opt(self.batch, &write_options)
            .map_err(|err| StoreError::Backend(err.into()))
    }
}
