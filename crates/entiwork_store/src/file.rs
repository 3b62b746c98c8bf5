//! File-directory map store.
//!
//! Layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                  # Advisory lock for single-process access
//! └─ <sha256(key)>.rec     # One file per record
//! ```
//!
//! Each record file holds the key followed by the value:
//!
//! ```text
//! | key_len: u32 LE | key: [u8; key_len] | value: [u8] |
//! ```
//!
//! Files are written to a temporary file in the same directory and renamed
//! over the target, so readers see either the old or the new value.

use crate::map::{MapChange, MapEntries, MapStore};
use entiwork_core::{EntityReference, StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

const LOCK_FILE: &str = "LOCK";
const RECORD_EXTENSION: &str = "rec";
const KEY_LEN_SIZE: usize = 4;

/// A [`MapStore`] keeping one file per entry in a directory.
///
/// The store holds an exclusive lock on the directory for its lifetime.
/// Opening a directory another store holds fails with
/// [`StoreError::Locked`].
#[derive(Debug)]
pub struct FileMapStore {
    path: PathBuf,
    _lock_file: File,
    write_lock: Mutex<()>,
}

impl FileMapStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another store holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("store directory does not exist: {}", path.display()),
                )));
            }
        }
        if !path.is_dir() {
            return Err(StoreError::Corrupted(format!(
                "store path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: path.to_path_buf(),
            });
        }

        debug!(path = %path.display(), "file map store opened");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// The store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, key: &EntityReference) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.path.join(format!("{digest:x}.{RECORD_EXTENSION}"))
    }

    fn write_atomic(&self, target: &Path, key: &EntityReference, bytes: &[u8]) -> StoreResult<()> {
        let mut file = NamedTempFile::new_in(&self.path)?;
        file.write_all(&encode_entry(key, bytes)?)?;
        file.as_file().sync_all()?;
        file.persist(target).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn encode_entry(key: &EntityReference, bytes: &[u8]) -> StoreResult<Vec<u8>> {
    let key = key.as_str().as_bytes();
    let key_len = u32::try_from(key.len())
        .map_err(|_| StoreError::Corrupted(format!("record key too long: {} bytes", key.len())))?;
    let mut buf = Vec::with_capacity(KEY_LEN_SIZE + key.len() + bytes.len());
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(bytes);
    Ok(buf)
}

fn decode_entry(path: &Path, data: &[u8]) -> StoreResult<(EntityReference, Vec<u8>)> {
    let corrupted = || StoreError::Corrupted(format!("truncated record file {}", path.display()));
    let header: [u8; KEY_LEN_SIZE] = data
        .get(..KEY_LEN_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(corrupted)?;
    let key_len = u32::from_le_bytes(header) as usize;
    let key_end = KEY_LEN_SIZE.checked_add(key_len).ok_or_else(corrupted)?;
    let key = data.get(KEY_LEN_SIZE..key_end).ok_or_else(corrupted)?;
    let key = std::str::from_utf8(key).map_err(|_| {
        StoreError::Corrupted(format!("record key is not UTF-8 in {}", path.display()))
    })?;
    Ok((EntityReference::new(key), data[key_end..].to_vec()))
}

fn read_entry(path: &Path) -> StoreResult<(EntityReference, Vec<u8>)> {
    let data = fs::read(path)?;
    decode_entry(path, &data)
}

impl MapStore for FileMapStore {
    fn get(&self, key: &EntityReference) -> StoreResult<Option<Vec<u8>>> {
        let path = self.record_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (stored_key, bytes) = decode_entry(&path, &data)?;
        if &stored_key != key {
            return Err(StoreError::Corrupted(format!(
                "{} holds {stored_key}, expected {key}",
                path.display()
            )));
        }
        Ok(Some(bytes))
    }

    fn apply_changes(&self, changes: Vec<MapChange>) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let count = changes.len();
        for change in changes {
            match change {
                MapChange::Put { key, bytes } => {
                    let target = self.record_path(&key);
                    self.write_atomic(&target, &key, &bytes)?;
                }
                MapChange::Remove { key } => match fs::remove_file(self.record_path(&key)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        self.sync_directory()?;
        trace!(path = %self.path.display(), changes = count, "file changes applied");
        Ok(())
    }

    fn entries(&self) -> StoreResult<MapEntries<'_>> {
        let dir = fs::read_dir(&self.path)?;
        Ok(Box::new(dir.filter_map(|entry| {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => return Some(Err(e.into())),
            };
            if path.extension() != Some(OsStr::new(RECORD_EXTENSION)) {
                return None;
            }
            Some(read_entry(&path))
        })))
    }
}
