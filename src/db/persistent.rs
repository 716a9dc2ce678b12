use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// This is the version of the data on this current branch
/// This version *must* be bumped, and appropriate migrations
/// written on any changes to the persistent application data format
const LATEST_SCHEMA_VERSION: u32 = 0;

/// Key used to store the `LATEST_SCHEMA_VERSION` value in the `METADATA_COLUMN`
const DB_SCHEMA_VERSION_KEY: &[u8; 17] = b"db_schema_version";

/// A static length prefix is used on the `DATA_COLUMN`
const PREFIX_SIZE: usize = 10;
/// The sync checkpoint keyspace; the key suffix is the service name
const CHECKPOINT_PREFIX: &[u8; PREFIX_SIZE] = b"checkpt___";

/// Column family names
// All data is stored in `DATA_COLUMN` with a prefix for key spaces
const DATA_COLUMN: &str = "data";
// This column is just for schema version info. No prefix is used.
const METADATA_COLUMN: &str = "metadata";

/// Durable record of the highest block fully processed and published for a
/// named service. Created with a synthetic all-zero block hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_block: u64,
    pub last_block_hash: [u8; 32],
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: i64,
}

struct RocksDBKeyValueStore {
    /// Rocksdb database instance
    db: DB,
}

impl RocksDBKeyValueStore {
    fn open(db_path: &Path) -> Result<Self> {
        let is_existing_db = db_path.exists();

        // Use a prefix extractor on the data column
        let mut cfopts_for_prefix = Options::default();
        cfopts_for_prefix
            .set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_SIZE));

        let cfs = vec![
            ColumnFamilyDescriptor::new(METADATA_COLUMN, Options::default()),
            ColumnFamilyDescriptor::new(DATA_COLUMN, cfopts_for_prefix),
        ];

        let mut create_missing_db_and_cols_opts = Options::default();
        create_missing_db_and_cols_opts.create_missing_column_families(true);
        create_missing_db_and_cols_opts.create_if_missing(true);

        // Open the db or create a new one if it doesn't exist. A second
        // process holding the rocksdb lock surfaces here as a fatal error.
        let db = DB::open_cf_descriptors(&create_missing_db_and_cols_opts, db_path, cfs)
            .map_err(anyhow::Error::msg)
            .context(format!("Failed to open database at: {}", db_path.display()))?;

        if !is_existing_db {
            let mut batch = WriteBatch::default();
            batch.put_cf(
                get_metadata_column_handle(&db),
                DB_SCHEMA_VERSION_KEY,
                LATEST_SCHEMA_VERSION.to_be_bytes(),
            );
            db.write(batch).context("Failed to write metadata to new db")?;
        }

        check_schema_version(&db)?;

        Ok(RocksDBKeyValueStore { db })
    }

    // Writes are used as durable progress markers, so every put is synced to
    // disk before it is acknowledged.
    fn put_data<T: Serialize>(&self, prefix: &[u8], key: &[u8], value: &T) -> Result<()> {
        let key_with_prefix = [prefix, key].concat();
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(
                get_data_column_handle(&self.db),
                key_with_prefix,
                bincode::serialize(value).expect("Serialization is not expected to fail"),
                &write_opts,
            )
            .map_err(|e| anyhow!("Failed to write data to database. Error: {}", e))
    }

    fn get_data<T: DeserializeOwned>(&self, prefix: &[u8], key: &[u8]) -> Result<Option<T>> {
        let key_with_prefix = [prefix, key].concat();

        self.db
            .get_cf(get_data_column_handle(&self.db), key_with_prefix)?
            .map(|data| {
                bincode::deserialize(&data).map_err(|e| anyhow!("Deserialization failure: {}", e))
            })
            .transpose()
    }
}

/// Database for sync checkpoints and persistent metadata.
///
/// Logically single-writer: the synchronizer owns all mutations. That is a
/// contract on the caller, not enforced here.
pub struct PersistentStateDB {
    kv_db: RocksDBKeyValueStore,
}

impl PersistentStateDB {
    /// Open the database or create one if it doesn't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(PersistentStateDB {
            kv_db: RocksDBKeyValueStore::open(db_path)?,
        })
    }

    pub fn get_checkpoint(&self, service_name: &str) -> Result<Option<Checkpoint>> {
        self.kv_db
            .get_data(CHECKPOINT_PREFIX, service_name.as_bytes())
            .with_context(|| format!("Failed to load checkpoint for {}", service_name))
    }

    /// Loads the checkpoint for the service, creating one at `initial_block`
    /// with the synthetic zero hash if this is a first run.
    pub fn get_or_create_checkpoint(
        &self,
        service_name: &str,
        initial_block: u64,
    ) -> Result<Checkpoint> {
        match self.get_checkpoint(service_name)? {
            Some(checkpoint) => Ok(checkpoint),
            None => {
                let checkpoint = Checkpoint {
                    last_block: initial_block,
                    last_block_hash: [0u8; 32],
                    updated_at: chrono::Utc::now().timestamp(),
                };
                self.kv_db
                    .put_data(CHECKPOINT_PREFIX, service_name.as_bytes(), &checkpoint)
                    .with_context(|| {
                        format!("Failed to create checkpoint for {}", service_name)
                    })?;
                Ok(checkpoint)
            }
        }
    }

    /// Atomically advances the checkpoint for the service. The record must
    /// already exist.
    pub fn update_checkpoint_block(
        &self,
        service_name: &str,
        block: u64,
        block_hash: [u8; 32],
    ) -> Result<()> {
        let mut checkpoint = self
            .get_checkpoint(service_name)?
            .ok_or_else(|| anyhow!("No checkpoint exists for {}", service_name))?;
        checkpoint.last_block = block;
        checkpoint.last_block_hash = block_hash;
        checkpoint.updated_at = chrono::Utc::now().timestamp();
        self.kv_db
            .put_data(CHECKPOINT_PREFIX, service_name.as_bytes(), &checkpoint)
            .with_context(|| format!("Failed to update checkpoint for {}", service_name))
    }
}

fn get_metadata_column_handle(db: &DB) -> &ColumnFamily {
    get_column_handle(db, METADATA_COLUMN)
}

fn get_data_column_handle(db: &DB) -> &ColumnFamily {
    get_column_handle(db, DATA_COLUMN)
}

fn get_column_handle<'a>(db: &'a DB, column_name: &str) -> &'a ColumnFamily {
    db.cf_handle(column_name)
        .unwrap_or_else(|| panic!("Should get column family handle for {}", column_name))
}

/// Get the schema version from the metadata column in the db.
fn read_schema_version(db: &DB) -> Result<u32> {
    db.get_cf(get_metadata_column_handle(db), DB_SCHEMA_VERSION_KEY)
        .context("Failed to get metadata column")?
        .map(|version| {
            let version: [u8; 4] = version.try_into().expect("Version should be a u32");
            u32::from_be_bytes(version)
        })
        .ok_or_else(|| anyhow!("Could not find db schema version"))
}

fn check_schema_version(db: &DB) -> Result<()> {
    let version = read_schema_version(db).context("Failed to read schema version")?;
    match version.cmp(&LATEST_SCHEMA_VERSION) {
        std::cmp::Ordering::Equal => Ok(()),
        std::cmp::Ordering::Greater => {
            // We do not support backwards migrations
            bail!(
                "Database schema version {} is ahead of the latest schema version {}. Is your indexer up to date?",
                version,
                LATEST_SCHEMA_VERSION
            )
        }
        std::cmp::Ordering::Less => {
            bail!(
                "Database schema version {} requires a migration that this build does not carry",
                version
            )
        }
    }
}
