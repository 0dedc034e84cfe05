//! RocksDB-backed persistence for topic records.
//!
//! Column families:
//! - `topics`: one record per topic, key = 16-byte UUID, value = LZ4-compressed bincode
//! - `meta`  : store-wide values (`revision`: u64 big-endian)
//!
//! Every mutation is a single write batch carrying both the record change and
//! the new revision, so a topic and its answers appear or vanish atomically
//! and the revision never runs behind the data after a crash.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use tally_core::{Topic, TopicId};
use uuid::Uuid;

use super::StoreError;

/// Column family names.
const CF_TOPICS: &str = "topics";
const CF_META: &str = "meta";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_TOPICS, CF_META];

/// Key of the revision counter in `meta`.
const REVISION_KEY: &[u8] = b"revision";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tally_data"),
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl StoreConfig {
    /// Config rooted at `path` with defaults otherwise.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Durable topic records plus the store revision.
pub struct TopicDb {
    /// RocksDB instance (single-threaded mode, writers serialized by the owning store)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
}

impl TopicDb {
    /// Open the database at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened topic database at {}", config.path.display());
        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_TOPICS => {
                // Values are already LZ4 framed by us
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_META => {
                opts.set_max_write_buffer_number(2);
            }
            _ => {}
        }

        opts
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Insert or overwrite a topic record and advance the revision.
    pub fn put_topic(&self, topic: &Topic, revision: u64) -> Result<(), StoreError> {
        let cf_topics = self.cf(CF_TOPICS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_topics, topic.id.as_bytes(), encode_topic(topic)?);
        batch.put_cf(&cf_meta, REVISION_KEY, revision.to_be_bytes());
        self.write(batch)
    }

    /// Remove a topic record (answers included) and advance the revision.
    pub fn delete_topic(&self, id: TopicId, revision: u64) -> Result<(), StoreError> {
        let cf_topics = self.cf(CF_TOPICS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_topics, id.as_bytes());
        batch.put_cf(&cf_meta, REVISION_KEY, revision.to_be_bytes());
        self.write(batch)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────

    /// Load one topic.
    pub fn load_topic(&self, id: TopicId) -> Result<Topic, StoreError> {
        let cf = self.cf(CF_TOPICS)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => decode_topic(&bytes),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Load every topic record.
    pub fn load_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let cf = self.cf(CF_TOPICS)?;
        let mut topics = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            if key.len() != 16 {
                log::warn!("Skipping topic record with malformed key ({} bytes)", key.len());
                continue;
            }
            topics.push(decode_topic(&value)?);
        }

        Ok(topics)
    }

    /// Load the last committed revision (0 for a fresh database).
    pub fn load_revision(&self) -> Result<u64, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, REVISION_KEY)? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::DeserializationError("Invalid revision value".into())
                })?;
                Ok(u64::from_be_bytes(buf))
            }
            None => Ok(0),
        }
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

/// bincode-encode then LZ4-compress a topic.
fn encode_topic(topic: &Topic) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::serde::encode_to_vec(topic, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

fn decode_topic(bytes: &[u8]) -> Result<Topic, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (topic, _): (Topic, _) =
        bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Answer, NewTopic};

    fn sample_topic(title: &str) -> Topic {
        NewTopic {
            title: title.to_string(),
            answers: vec![Answer::new("Pizza"), Answer { text: "Sushi".into(), votes: 3 }],
            created_at: 1_700_000_000_000,
        }
        .into_topic(Uuid::new_v4())
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = TopicDb::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert!(db.path().exists());
        assert_eq!(db.load_revision().unwrap(), 0);
        assert!(db.load_topics().unwrap().is_empty());
    }

    #[test]
    fn test_put_load_topic() {
        let dir = tempfile::tempdir().unwrap();
        let db = TopicDb::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let topic = sample_topic("Lunch?");
        db.put_topic(&topic, 1).unwrap();

        assert_eq!(db.load_topic(topic.id).unwrap(), topic);
        assert_eq!(db.load_revision().unwrap(), 1);
    }

    #[test]
    fn test_load_missing_topic() {
        let dir = tempfile::tempdir().unwrap();
        let db = TopicDb::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let ghost = Uuid::new_v4();
        match db.load_topic(ghost) {
            Err(StoreError::NotFound(id)) => assert_eq!(id, ghost),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_topic_advances_revision() {
        let dir = tempfile::tempdir().unwrap();
        let db = TopicDb::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let keep = sample_topic("keep");
        let drop_me = sample_topic("drop");
        db.put_topic(&keep, 1).unwrap();
        db.put_topic(&drop_me, 2).unwrap();
        db.delete_topic(drop_me.id, 3).unwrap();

        let topics = db.load_topics().unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id, keep.id);
        assert_eq!(db.load_revision().unwrap(), 3);
    }

    #[test]
    fn test_reopen_recovers_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let topic = sample_topic("Lunch?");

        {
            let db = TopicDb::open(StoreConfig::for_testing(&path)).unwrap();
            db.put_topic(&topic, 7).unwrap();
            db.sync().unwrap();
        }

        let db = TopicDb::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(db.load_revision().unwrap(), 7);
        assert_eq!(db.load_topics().unwrap(), vec![topic]);
    }

    #[test]
    fn test_topic_encoding_compresses_repetitive_answers() {
        let mut topic = sample_topic("Big");
        topic.answers = (0..200).map(|_| Answer::new("same answer text")).collect();

        let encoded = encode_topic(&topic).unwrap();
        let raw = bincode::serde::encode_to_vec(&topic, bincode::config::standard()).unwrap();
        assert!(encoded.len() < raw.len());
        assert_eq!(decode_topic(&encoded).unwrap(), topic);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_topic(&[0xFF, 0xFE, 0xFD]).is_err());
    }
}
