//! Injected key-value repositories for persisted reader state.
//!
//! Location index blobs, chapter bundles and the progress backup record all
//! live behind [`KeyValueStore`]. Entries are overwrite-only: readers validate
//! what they get back and delete entries that fail validation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::StoreError;

/// Which component owns an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheNamespace {
    /// Serialized [`crate::LocationIndex`] blobs.
    LocationIndex,
    /// Per-chapter description and image bundles.
    ChapterBundle,
    /// Last successfully persisted progress record.
    ProgressBackup,
}

impl CacheNamespace {
    /// Stable short name used in storage keys and paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocationIndex => "locations",
            Self::ChapterBundle => "chapters",
            Self::ProgressBackup => "progress",
        }
    }
}

/// Fully-qualified cache key: `(namespace, user, book[, chapter])`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub namespace: CacheNamespace,
    pub user: String,
    pub book: String,
    pub chapter: Option<u32>,
}

impl CacheKey {
    pub fn new(
        namespace: CacheNamespace,
        user: impl Into<String>,
        book: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            user: user.into(),
            book: book.into(),
            chapter: None,
        }
    }

    /// Same key scoped to one chapter.
    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    /// Flat string form, safe for use as a file name component.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are percent-escaped so distinct keys
    /// never collide.
    pub fn storage_key(&self) -> String {
        let mut out = String::with_capacity(self.user.len() + self.book.len() + 24);
        out.push_str(self.namespace.as_str());
        out.push('_');
        escape_component(&self.user, &mut out);
        out.push('_');
        escape_component(&self.book, &mut out);
        if let Some(chapter) = self.chapter {
            out.push_str("_ch");
            out.push_str(&chapter.to_string());
        }
        out
    }
}

fn escape_component(value: &str, out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
    }
}

/// Storage hooks for reader caches.
///
/// Methods take `&self`; implementations that mutate use interior mutability so
/// one store can be shared between components by reference.
pub trait KeyValueStore {
    /// Fetch the raw payload for `key`.
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite the payload for `key`.
    fn set(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &CacheKey) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Rc<T> {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}

/// In-process store, useful for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<CacheKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Whether `key` currently has a payload.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.borrow().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError> {
        self.entries.borrow_mut().insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}
