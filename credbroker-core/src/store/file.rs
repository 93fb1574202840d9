//! File-backed credential store.
//!
//! Entries live in a single JSON document so that several processes on the
//! same host (CLI invocations, workers) can share cached tokens.
//!
//! # Storage Location
//!
//! By default the file is `tokens.json` in the platform data directory, e.g.
//! `~/.local/share/credbroker/tokens.json` on Linux. A sibling
//! `tokens.json.lock` file carries the cross-process write lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{CredentialStore, Secret, StoreError};

/// On-disk format.
#[derive(Debug, Serialize, Deserialize)]
struct FileStoreData {
    /// Version of the store format (for future migrations).
    version: u32,

    entries: BTreeMap<String, FileEntry>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

impl FileStoreData {
    fn parse(contents: &str) -> Result<Self, StoreError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(contents)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: Secret,
    expires_at: DateTime<Utc>,
}

/// JSON file credential store.
///
/// Every read goes back to disk, so a token written by one process is seen
/// by the next `get` in any other. Each `set` holds an exclusive advisory
/// lock on the sibling lock file for its whole read-modify-write cycle and
/// replaces the document through a private temp file and an atomic rename.
/// Readers therefore never see a partial document and concurrent writers,
/// in this process or any other, never lose each other's keys.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Get the default path of the token file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "credbroker", "credbroker")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("tokens.json"))
    }

    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path()?)
    }

    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// The file itself is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");

        Ok(Self {
            path,
            lock_path: PathBuf::from(lock_path),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<FileStoreData, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => FileStoreData::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileStoreData::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

/// Read-modify-write of the document under the cross-process lock.
///
/// Blocking; run on the blocking pool.
fn write_entry(
    path: &Path,
    lock_path: &Path,
    key: String,
    value: Secret,
    ttl: chrono::Duration,
) -> Result<(), StoreError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;
    FileExt::lock_exclusive(&lock_file)?;

    let mut data = match std::fs::read_to_string(path) {
        Ok(contents) => match FileStoreData::parse(&contents) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Discarding unreadable token cache {:?}: {}", path, e);
                FileStoreData::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileStoreData::default(),
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    data.entries.retain(|_, entry| entry.expires_at > now);
    data.entries.insert(
        key,
        FileEntry {
            value,
            expires_at: now + ttl,
        },
    );

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut temp, &data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    drop(lock_file);
    Ok(())
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let data = self.load().await?;
        let now = Utc::now();
        Ok(data
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &Secret, ttl: Duration) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::BackendError {
            message: format!("ttl out of range: {}", e),
        })?;

        // The file lock is per open file description; the async mutex keeps
        // this process's writers off the blocking pool while one holds it.
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        let key = key.to_string();
        let value = value.clone();
        tokio::task::spawn_blocking(move || write_entry(&path, &lock_path, key, value, ttl))
            .await
            .map_err(|e| StoreError::BackendError {
                message: format!("cache writer failed: {}", e),
            })?
    }
}
