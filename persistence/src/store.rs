//! On-disk key/value store for cache entries
//!
//! Each key lives in its own file inside a directory namespaced by the
//! repository root. Writes go to a temporary file in the same directory and
//! are renamed over the target, so a reader sees either the previous entry or
//! the complete new one.
//!
//! Entry layout:
//!
//! ```text
//! "TSCP" | version: u16 LE | key_len: u32 LE | key | payload_len: u32 LE | zstd(payload)
//! ```

use crate::FORMAT_VERSION;
use crate::TSCP_MAGIC;
use crate::compression::CompressionLevel;
use crate::compression::Compressor;
use crate::error::PersistenceError;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Digest;
use sha2::Sha256;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

const ENTRY_EXTENSION: &str = "tsc";
const HEADER_LEN: usize = 6;

/// File-backed cache store for one repository root.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    compressor: Compressor,
}

impl CacheStore {
    /// Open (creating if needed) the store for `repo_root` under `base_dir`.
    pub fn open(base_dir: &Path, repo_root: &Path, level: CompressionLevel) -> Result<Self> {
        let dir = base_dir.join(namespace_for(repo_root));
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "opened cache store");
        Ok(Self {
            dir,
            compressor: Compressor::new(level),
        })
    }

    /// Default location for cache stores (`<user cache dir>/typescope`).
    pub fn default_base_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|p| p.join("typescope"))
            .unwrap_or_else(|| PathBuf::from(".typescope_cache"))
    }

    /// Directory holding this repository's entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}.{ENTRY_EXTENSION}"))
    }

    /// Read the raw bytes stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let payload = decode_entry(key, &bytes)?;
        self.compressor.decompress(payload).map(Some)
    }

    /// Atomically replace the bytes stored under `key`.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let compressed = self.compressor.compress(value)?;
        let framed = encode_entry(key, &compressed)?;

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&framed)?;
        temp.as_file().sync_all()?;
        temp.persist(self.entry_path(key))
            .map_err(|e| PersistenceError::PersistFailed {
                key: key.to_string(),
                message: e.error.to_string(),
            })?;
        Ok(())
    }

    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };
        let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(Some(value))
    }

    pub fn put_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
        self.put(key, &bytes)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    /// Remove the entry under `key`; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry of this store; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Directory name for a repository root: a short digest of its canonical path.
fn namespace_for(repo_root: &Path) -> String {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

fn encode_entry(key: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| PersistenceError::CorruptData("key too long".to_string()))?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| PersistenceError::CorruptData("payload too large".to_string()))?;

    let mut framed = Vec::with_capacity(HEADER_LEN + 8 + key.len() + payload.len());
    framed.extend_from_slice(TSCP_MAGIC);
    framed.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    framed.extend_from_slice(&key_len.to_le_bytes());
    framed.extend_from_slice(key.as_bytes());
    framed.extend_from_slice(&payload_len.to_le_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Validate the frame of an entry and return its (still compressed) payload.
fn decode_entry<'a>(key: &str, bytes: &'a [u8]) -> Result<&'a [u8]> {
    if bytes.len() < HEADER_LEN {
        return Err(PersistenceError::CorruptData("entry too small".to_string()));
    }
    if &bytes[0..4] != TSCP_MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version, FORMAT_VERSION));
    }

    let (stored_key, rest) = read_chunk(&bytes[HEADER_LEN..])?;
    if stored_key != key.as_bytes() {
        return Err(PersistenceError::CorruptData(format!(
            "entry does not belong to key {key}"
        )));
    }
    let (payload, rest) = read_chunk(rest)?;
    if !rest.is_empty() {
        return Err(PersistenceError::CorruptData(
            "trailing bytes after payload".to_string(),
        ));
    }
    Ok(payload)
}

/// Split a `len: u32 LE | bytes` chunk off the front of `bytes`.
fn read_chunk(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let Some((len, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(PersistenceError::CorruptData("truncated length".to_string()));
    };
    let len = u32::from_le_bytes(*len) as usize;
    if rest.len() < len {
        return Err(PersistenceError::CorruptData("truncated chunk".to_string()));
    }
    Ok(rest.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    fn store(base: &TempDir) -> CacheStore {
        CacheStore::open(base.path(), Path::new("/repo/a"), CompressionLevel::Fast).unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let base = TempDir::new().unwrap();
        let store = store(&base);

        assert_eq!(store.get("fingerprint").unwrap(), None);
        store.put("fingerprint", b"abc123").unwrap();
        assert_eq!(store.get("fingerprint").unwrap(), Some(b"abc123".to_vec()));
        assert!(store.contains("fingerprint"));

        store.put("fingerprint", b"def456").unwrap();
        assert_eq!(store.get("fingerprint").unwrap(), Some(b"def456".to_vec()));
    }

    #[test]
    fn test_typed_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Entry {
            hash: String,
            names: Vec<String>,
        }

        let base = TempDir::new().unwrap();
        let store = store(&base);
        let entry = Entry {
            hash: "0f".to_string(),
            names: vec!["module.foo".to_string()],
        };
        store.put_value("repo/names", &entry).unwrap();
        assert_eq!(store.get_value::<Entry>("repo/names").unwrap(), Some(entry));
    }

    #[test]
    fn test_writes_leave_no_temporary_files() {
        let base = TempDir::new().unwrap();
        let store = store(&base);
        for i in 0..5 {
            store.put(&format!("key-{i}"), b"value").unwrap();
        }
        let files: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 5);
        assert!(
            files
                .iter()
                .all(|path| path.extension().unwrap() == ENTRY_EXTENSION)
        );
    }

    #[test]
    fn test_corrupt_entry_is_reported_as_corruption() {
        let base = TempDir::new().unwrap();
        let store = store(&base);
        store.put("types", b"payload").unwrap();
        fs::write(store.entry_path("types"), b"TSCP\x01\x00garbage").unwrap();

        let err = store.get("types").unwrap_err();
        assert!(err.is_corruption(), "{err}");

        fs::write(store.entry_path("types"), b"nope").unwrap();
        assert!(store.get("types").unwrap_err().is_corruption());
    }

    #[test]
    fn test_repositories_are_namespaced() {
        let base = TempDir::new().unwrap();
        let a = CacheStore::open(base.path(), Path::new("/repo/a"), CompressionLevel::Fast).unwrap();
        let b = CacheStore::open(base.path(), Path::new("/repo/b"), CompressionLevel::Fast).unwrap();
        assert_ne!(a.dir(), b.dir());

        a.put("fingerprint", b"a").unwrap();
        assert_eq!(b.get("fingerprint").unwrap(), None);
    }

    #[test]
    fn test_remove_and_clear() {
        let base = TempDir::new().unwrap();
        let store = store(&base);
        store.put("one", b"1").unwrap();
        store.put("two", b"2").unwrap();

        assert!(store.remove("one").unwrap());
        assert!(!store.remove("one").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.get("two").unwrap(), None);
    }
}
