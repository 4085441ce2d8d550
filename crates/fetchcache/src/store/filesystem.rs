use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{MemoryStore, ScanPage, SetOptions, Store, StoreResult};

/// A [`Store`] persisted to a single JSON file, meant for local development.
///
/// The file contains one JSON object mapping keys to their string values. It is read on
/// [`Store::connect`] and atomically rewritten after every mutation. Expiry set through
/// [`SetOptions`] is honored while the process runs, but is not persisted.
#[derive(Debug)]
pub struct FilesystemStore {
    path: PathBuf,
    memory: MemoryStore,
}

impl FilesystemStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: MemoryStore::new(),
        }
    }

    fn load(&self) -> StoreResult<()> {
        let contents = match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(
            path = %self.path.display(),
            "Loaded {} keys from store file",
            contents.len()
        );
        self.memory.replace(contents);
        Ok(())
    }

    fn persist(&self) -> StoreResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let temp_file = NamedTempFile::new_in(parent)?;
        let mut writer = BufWriter::new(temp_file);
        serde_json::to_writer_pretty(&mut writer, &self.memory.snapshot())?;
        writer.flush()?;
        let temp_file = writer.into_inner().map_err(|err| err.into_error())?;

        temp_file.persist(&self.path).map_err(|err| err.error)?;
        tracing::trace!(path = %self.path.display(), "Persisted store file");
        Ok(())
    }
}

#[async_trait]
impl Store for FilesystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn connect(&self) -> StoreResult<()> {
        self.load()
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.persist()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, value: &str, options: &SetOptions) -> StoreResult<()> {
        if self.memory.write(key, value, options) {
            self.persist()?;
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.memory.mget(keys).await
    }

    async fn mset(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        self.memory.write_many(pairs);
        self.persist()
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.memory.scan(cursor, pattern, count).await
    }

    async fn flush_db(&self) -> StoreResult<()> {
        self.memory.clear();
        self.persist()
    }
}
