//! Encrypted cache store
//!
//! One JSON document per file, encrypted with the active key from a shared
//! [`KeyHolder`]. Every operation holds the key lock from start to finish,
//! which is what makes rotation atomic with respect to reads and writes.
//!
//! On disk the file is hex text (see [`academy_crypto::cipher`]). A
//! zero-length file is an empty cache.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use academy_crypto::{cipher, ActiveKey, KeyHolder, KEY_SIZE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Outcome of a read. `Empty` and `Corrupt` are distinct.
#[derive(Debug)]
pub enum CacheRead {
    /// No file, or a zero-length file
    Empty,
    /// Present but unusable: unreadable, wrong key, tampered, or not JSON
    Corrupt(CacheError),
    Hit(Value),
}

impl CacheRead {
    pub fn is_empty(&self) -> bool {
        matches!(self, CacheRead::Empty)
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheRead::Corrupt(_))
    }

    /// The record, with `Empty` and `Corrupt` both collapsed to `{}`
    pub fn into_record(self) -> Value {
        match self {
            CacheRead::Hit(value) => value,
            CacheRead::Empty | CacheRead::Corrupt(_) => Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Generation of the key that is now active
    pub generation: u64,
    pub reencrypted: usize,
    /// Tracked files that were missing or empty
    pub skipped: usize,
    /// Files that could not be carried over and were truncated
    pub discarded: usize,
}

pub struct CacheStore {
    keys: Arc<KeyHolder>,
    cache_path: PathBuf,
    tracked: Mutex<BTreeSet<PathBuf>>,
}

impl CacheStore {
    pub fn new(keys: Arc<KeyHolder>, cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let tracked = Mutex::new(BTreeSet::from([file_identity(&cache_path)]));
        Self {
            keys,
            cache_path,
            tracked,
        }
    }

    /// Derive the initial key from the configured passphrase
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let keys = KeyHolder::from_passphrase(&config.secret, config.salt.as_bytes())?;
        Ok(Self::new(Arc::new(keys), config.cache_path.clone()))
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn key_generation(&self) -> u64 {
        self.keys.generation()
    }

    /// Load, decrypt, and parse the record at `path`
    pub fn read(&self, path: impl AsRef<Path>) -> CacheRead {
        let path = path.as_ref();
        let active = self.keys.lock();

        match open(active.bytes(), path).and_then(|plain| plain.map(|p| parse(&p)).transpose()) {
            Ok(None) => {
                debug!(path = %path.display(), "cache empty");
                CacheRead::Empty
            }
            Ok(Some(value)) => {
                debug!(path = %path.display(), generation = active.generation(), "cache hit");
                CacheRead::Hit(value)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache unreadable under active key");
                CacheRead::Corrupt(e)
            }
        }
    }

    /// Like [`CacheStore::read`], but anything other than a hit is `{}`
    pub fn read_or_empty(&self, path: impl AsRef<Path>) -> Value {
        self.read(path).into_record()
    }

    /// Encrypt `data` under the active key and atomically replace `path`
    pub fn write<T>(&self, data: &T, path: impl AsRef<Path>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let path = path.as_ref();
        let active = self.keys.lock();

        let result = seal(&active, data).and_then(|text| replace_file(path, text.as_bytes()));
        match &result {
            Ok(()) => {
                debug!(path = %path.display(), generation = active.generation(), "cache written");
                self.track(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cache write skipped"),
        }
        result
    }

    /// Whether `path` holds anything, without decrypting it
    pub fn state(&self, path: impl AsRef<Path>) -> CacheState {
        match fs::metadata(path.as_ref()) {
            Ok(meta) if meta.len() > 0 => CacheState::Populated,
            _ => CacheState::Empty,
        }
    }

    /// Truncate the primary cache file, keeping the file itself
    pub fn expire_cache(&self) -> Result<DateTime<Utc>> {
        let _active = self.keys.lock();
        truncate(&self.cache_path)?;

        let at = Utc::now();
        info!(path = %self.cache_path.display(), expired_at = %at.to_rfc3339(), "cache expired");
        Ok(at)
    }

    /// Replace the active key and re-encrypt every tracked file under it.
    ///
    /// All files are staged and verified under the new key before any of
    /// them is moved into place. If staging or committing fails, files
    /// already committed are restored, the old key stays active, and the
    /// error is returned.
    pub fn rotate_keys(&self) -> Result<RotationReport> {
        self.rotate_with(|staged, path| staged.persist(path).map(drop).map_err(|e| e.error))
    }

    fn rotate_with<P>(&self, persist: P) -> Result<RotationReport>
    where
        P: FnMut(NamedTempFile, &Path) -> io::Result<()>,
    {
        let mut active = self.keys.lock();
        let new_key = cipher::generate_key();

        let mut staged: Vec<StagedFile> = Vec::new();
        let mut discard: Vec<PathBuf> = Vec::new();
        let mut skipped = 0;

        for path in self.tracked_paths() {
            match stage_rotation(&active, &new_key, &path) {
                Ok(Staged::Ready(file)) => staged.push(file),
                Ok(Staged::Nothing) => skipped += 1,
                Ok(Staged::Unrecoverable(reason)) => {
                    warn!(path = %path.display(), error = %reason, "undecryptable cache will be discarded");
                    discard.push(path);
                }
                // Dropping `staged` removes every staged temp file.
                Err(e) => return Err(CacheError::Rotation(format!("{}: {}", path.display(), e))),
            }
        }

        let reencrypted = commit_rotation(staged, persist)?;

        let discarded = discard.len();
        for path in discard {
            if let Err(e) = truncate(&path) {
                error!(path = %path.display(), error = %e, "failed to discard cache");
            }
        }

        let generation = active.replace(new_key);
        info!(generation, reencrypted, skipped, discarded, "cache key rotated");

        Ok(RotationReport {
            generation,
            reencrypted,
            skipped,
            discarded,
        })
    }

    fn track(&self, path: &Path) {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_identity(path));
    }

    /// Tracked files, one entry per file on disk however it was spelled
    fn tracked_paths(&self) -> BTreeSet<PathBuf> {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|path| file_identity(path))
            .collect()
    }
}

/// `path` with its directory resolved, so aliases such as `a/../b.dat`
/// and `b.dat` map to the same entry. The file name itself is kept, so a
/// symlinked cache file is replaced rather than followed.
fn file_identity(path: &Path) -> PathBuf {
    let Some(name) = path.file_name() else {
        return path.to_path_buf();
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

struct StagedFile {
    path: PathBuf,
    staged: NamedTempFile,
    /// Old-key ciphertext, put back if the rotation has to be undone
    original: String,
}

enum Staged {
    Ready(StagedFile),
    Nothing,
    Unrecoverable(CacheError),
}

fn stage_rotation(
    active: &ActiveKey,
    new_key: &Zeroizing<[u8; KEY_SIZE]>,
    path: &Path,
) -> Result<Staged> {
    let original = match read_text(path) {
        Ok(Some(text)) => text,
        Ok(None) => return Ok(Staged::Nothing),
        Err(e @ CacheError::Io { .. }) => return Err(e),
        Err(e) => return Ok(Staged::Unrecoverable(e)),
    };
    let plain = match active.decrypt_hex(&original) {
        Ok(plain) => plain,
        Err(e) => return Ok(Staged::Unrecoverable(e.into())),
    };
    if let Err(e) = parse(&plain) {
        return Ok(Staged::Unrecoverable(e));
    }

    let text = cipher::seal_hex(&new_key[..], &plain)?;
    let check = cipher::open_hex(&new_key[..], &text)?;
    if check.as_slice() != plain.as_slice() {
        return Err(CacheError::Rotation("re-encrypted content did not verify".to_string()));
    }

    Ok(Staged::Ready(StagedFile {
        path: path.to_path_buf(),
        staged: stage_file(path, text.as_bytes())?,
        original,
    }))
}

/// Move every staged file into place. On the first failure, files already
/// moved get their old-key ciphertext back and the rest are dropped.
fn commit_rotation<P>(staged: Vec<StagedFile>, mut persist: P) -> Result<usize>
where
    P: FnMut(NamedTempFile, &Path) -> io::Result<()>,
{
    let mut committed: Vec<(PathBuf, String)> = Vec::with_capacity(staged.len());

    for file in staged {
        if let Err(e) = persist(file.staged, &file.path) {
            error!(path = %file.path.display(), error = %e, "failed to commit re-encrypted cache, rolling back");
            for (path, original) in &committed {
                if let Err(e) = replace_file(path, original.as_bytes()) {
                    error!(path = %path.display(), error = %e, "failed to restore cache during rollback");
                }
            }
            return Err(CacheError::Rotation(format!("{}: {}", file.path.display(), e)));
        }
        committed.push((file.path, file.original));
    }

    Ok(committed.len())
}

/// Raw file text, or `None` if there is nothing there
fn read_text(path: &Path) -> Result<Option<String>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    let text = String::from_utf8(raw).map_err(|_| CacheError::NotText)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(text))
}

/// Decrypted bytes at `path`, or `None` if there is nothing there
fn open(key: &[u8], path: &Path) -> Result<Option<Zeroizing<Vec<u8>>>> {
    match read_text(path)? {
        Some(text) => Ok(Some(cipher::open_hex(key, &text)?)),
        None => Ok(None),
    }
}

fn parse(plain: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(plain)?)
}

fn seal<T>(active: &ActiveKey, data: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let plain = Zeroizing::new(serde_json::to_vec(data)?);
    Ok(active.encrypt_hex(&plain)?)
}

/// Write `contents` to a uniquely named, fsynced temp file in the same
/// directory as `path`. The temp file is removed if it is dropped unpersisted.
fn stage_file(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let mut staged = tempfile::Builder::new()
        .prefix(".academy-cache")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| CacheError::io(dir, e))?;
    staged
        .write_all(contents)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| CacheError::io(staged.path(), e))?;
    Ok(staged)
}

/// Temp file + rename, so a crash never leaves `path` half-written
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    stage_file(path, contents)?
        .persist(path)
        .map(drop)
        .map_err(|e| CacheError::io(path, e.error))
}

fn truncate(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .and_then(|file| file.sync_all())
        .map_err(|e| CacheError::io(path, e))
}
