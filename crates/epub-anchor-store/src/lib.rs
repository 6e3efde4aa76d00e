//! File-backed [`KeyValueStore`] for `epub-anchor` caches.
//!
//! Each entry lives at `<root>/<namespace>/<storage-key>.json` inside a small
//! JSON envelope carrying a schema version, the key it was written for, and
//! the base64 payload. Writes go to a temp file first and are renamed into
//! place, so readers never observe a half-written entry.

#![cfg_attr(
    not(test),
    deny(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented
    )
)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use epub_anchor::{CacheKey, KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};

const STORE_SCHEMA_VERSION: u8 = 1;
const DEFAULT_MAX_FILE_BYTES: usize = 8 * 1024 * 1024;
static WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    key: String,
    payload: String,
}

/// Directory-rooted store with a per-file size cap.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
    max_file_bytes: usize,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Set the maximum envelope size in bytes. `0` is treated as `1`.
    pub fn with_max_file_bytes(mut self, max_file_bytes: usize) -> Self {
        self.max_file_bytes = max_file_bytes.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    /// Deterministic path for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.namespace.as_str())
            .join(format!("{}.json", key.storage_key()))
    }

    fn read_capped(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if len > self.max_file_bytes as u64 {
            return Err(StoreError::TooLarge {
                actual: usize::try_from(len).unwrap_or(usize::MAX),
                limit: self.max_file_bytes,
            });
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut reader = file.take(self.max_file_bytes as u64 + 1);
        let mut bytes = Vec::with_capacity(len as usize);
        reader.read_to_end(&mut bytes)?;
        if bytes.len() > self.max_file_bytes {
            return Err(StoreError::TooLarge {
                actual: bytes.len(),
                limit: self.max_file_bytes,
            });
        }
        Ok(Some(bytes))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(bytes) = self.read_capped(&self.entry_path(key))? else {
            return Ok(None);
        };
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if envelope.version != STORE_SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "schema version {} (expected {})",
                envelope.version, STORE_SCHEMA_VERSION
            )));
        }
        let expected = key.storage_key();
        if envelope.key != expected {
            return Err(StoreError::Corrupt(format!(
                "entry written for {}, read as {}",
                envelope.key, expected
            )));
        }
        BASE64
            .decode(envelope.payload.as_bytes())
            .map(Some)
            .map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    fn set(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError> {
        let final_path = self.entry_path(key);
        let Some(parent) = final_path.parent() else {
            return Err(StoreError::Io(format!(
                "no parent directory for {}",
                final_path.display()
            )));
        };
        fs::create_dir_all(parent)?;

        let envelope = Envelope {
            version: STORE_SCHEMA_VERSION,
            key: key.storage_key(),
            payload: BASE64.encode(value),
        };
        let encoded =
            serde_json::to_vec(&envelope).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if encoded.len() > self.max_file_bytes {
            return Err(StoreError::TooLarge {
                actual: encoded.len(),
                limit: self.max_file_bytes,
            });
        }

        let nonce = WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let temp_path = parent.join(format!(
            "{}.json.tmp-{}-{}",
            envelope.key,
            std::process::id(),
            nonce
        ));
        if let Err(err) = write_synced(&temp_path, &encoded) {
            remove_file_quiet(&temp_path);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&temp_path, &final_path) {
            remove_file_quiet(&temp_path);
            return Err(err.into());
        }
        sync_directory(parent);
        log::debug!("stored {} ({} bytes)", envelope.key, value.len());
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()
}

fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

fn sync_directory(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epub_anchor::{
        BookSource, CacheNamespace, LocationIndexCache, LocationIndexOptions, Section, TextNode,
    };

    fn temp_root(label: &str) -> PathBuf {
        let nonce = WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "epub-anchor-store-{label}-{}-{nonce}",
            std::process::id()
        ))
    }

    fn key(book: &str) -> CacheKey {
        CacheKey::new(CacheNamespace::LocationIndex, "reader@example.com", book)
    }

    #[test]
    fn set_get_delete_round_trip() {
        let root = temp_root("roundtrip");
        let store = FileStore::new(&root);
        let key = key("book/1");
        assert_eq!(store.get(&key).unwrap(), None);

        store.set(&key, &[0, 159, 146, 150, 255]).unwrap();
        assert!(store.entry_path(&key).starts_with(root.join("locations")));
        assert_eq!(store.get(&key).unwrap(), Some(vec![0, 159, 146, 150, 255]));

        store.set(&key, b"second").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"second".to_vec()));

        store.delete(&key).unwrap();
        store.delete(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);

        let leftovers: Vec<_> = fs::read_dir(root.join("locations"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn size_cap_applies_to_reads_and_writes() {
        let root = temp_root("cap");
        let tiny = FileStore::new(&root).with_max_file_bytes(64);
        let key = key("big");
        let err = tiny.set(&key, &[7u8; 256]).unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { limit: 64, .. }));
        assert!(!tiny.entry_path(&key).exists());

        FileStore::new(&root).set(&key, &[7u8; 256]).unwrap();
        assert!(matches!(tiny.get(&key), Err(StoreError::TooLarge { .. })));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn damaged_entries_report_corrupt() {
        let root = temp_root("corrupt");
        let store = FileStore::new(&root);
        let key = key("b");
        store.set(&key, b"payload").unwrap();
        fs::write(store.entry_path(&key), b"{\"version\":1,").unwrap();
        assert!(matches!(store.get(&key), Err(StoreError::Corrupt(_))));

        let other = CacheKey::new(CacheNamespace::LocationIndex, "someone-else", "b");
        store.set(&other, b"payload").unwrap();
        fs::copy(store.entry_path(&other), store.entry_path(&key)).unwrap();
        assert!(matches!(store.get(&key), Err(StoreError::Corrupt(_))));
        let _ = fs::remove_dir_all(root);
    }

    struct Book;

    impl BookSource for Book {
        fn is_ready(&self) -> bool {
            true
        }

        fn section_count(&self) -> usize {
            1
        }

        fn section(&self, _index: usize) -> Result<Section, epub_anchor::AnchorError> {
            Ok(Section {
                href: "c.xhtml".into(),
                cfi_base: "/6/2".into(),
                nodes: vec![TextNode::new("w".repeat(5000), 0).with_steps(&[4, 1])],
            })
        }
    }

    #[test]
    fn backs_location_index_cache_across_instances() {
        let root = temp_root("index");
        let key = key("moby");
        let options = LocationIndexOptions::default();

        let first = LocationIndexCache::new(FileStore::new(&root), options.clone())
            .load_or_generate(&key, &Book)
            .unwrap();
        assert!(FileStore::new(&root).entry_path(&key).exists());

        let second = LocationIndexCache::new(FileStore::new(&root), options)
            .load_or_generate(&key, &Book)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.total(), 4);
        let _ = fs::remove_dir_all(root);
    }
}
