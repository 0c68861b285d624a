//! Best-effort key/value cache for fetched schema and translation payloads.
//!
//! A cache miss is always safe: every failure (storage disabled, quota
//! exceeded, corrupt entry, another process evicting a key) degrades to a
//! miss and the caller recomputes the value.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Cache key of the OpenAPI schema document.
pub const OPENAPI_CACHE_KEY: &str = "openapi";
/// Cache key of the OpenAPI schema document for anonymous sessions.
pub const OPENAPI_ANON_CACHE_KEY: &str = "openapi-anon";
/// Cache key of the list of available languages.
pub const LANGUAGES_CACHE_KEY: &str = "languages";
/// Default namespace prefix of [`StorageCache`].
pub const DEFAULT_CACHE_PREFIX: &str = "cache_";

const PROBE_KEY: &str = "test";

/// Cache key of the translations of one language.
pub fn translations_cache_key(lang: &str) -> String {
    format!("translations.{}", lang)
}

/// Physical key/value store shared by one or more caches.
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove_item(&self, key: &str) -> Result<(), CacheError>;
    fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// Several caches may share one physical storage.
impl<S: Storage + ?Sized> Storage for Rc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), CacheError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        (**self).keys()
    }
}

/// Logical cache of string values.
pub trait Cache {
    /// Returns the stored value, or `None` on a miss.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores a value. Failures are swallowed.
    fn set(&self, key: &str, value: &str);

    fn delete(&self, key: &str);

    /// Removes every entry owned by this cache and nothing else.
    fn clear(&self);

    /// Returns the stored value parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupt` if the stored value is not valid JSON;
    /// callers treat it as a miss.
    fn get_value(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.get_json(key)
    }
}

/// Typed JSON access for any [`Cache`].
pub trait CacheExt: Cache {
    /// Returns the stored value deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupt` if the stored value does not parse.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key) {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| CacheError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// Cache that stores nothing. Used when no storage is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyCache;

impl Cache for DummyCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) {}

    fn delete(&self, _key: &str) {}

    fn clear(&self) {}
}

/// Cache namespaced by a key prefix inside a shared [`Storage`].
#[derive(Debug)]
pub struct StorageCache<S> {
    storage: S,
    prefix: String,
}

impl<S: Storage> StorageCache<S> {
    pub fn new(storage: S) -> Self {
        Self::with_prefix(storage, DEFAULT_CACHE_PREFIX)
    }

    pub fn with_prefix(storage: S, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl<S: Storage> Cache for StorageCache<S> {
    fn get(&self, key: &str) -> Option<String> {
        match self.storage.get_item(&self.storage_key(key)) {
            Ok(value) => {
                if value.is_none() {
                    debug!(key, "cache miss");
                }
                value
            }
            Err(e) => {
                debug!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set_item(&self.storage_key(key), value) {
            warn!(key, error = %e, "can not set cache value");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.storage.remove_item(&self.storage_key(key)) {
            warn!(key, error = %e, "can not delete cache value");
        }
    }

    fn clear(&self) {
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "can not list cache keys");
                return;
            }
        };
        for key in keys.iter().filter(|k| k.starts_with(&self.prefix)) {
            if let Err(e) = self.storage.remove_item(key) {
                warn!(key = %key, error = %e, "can not delete cache value");
            }
        }
    }
}

/// In-memory [`Storage`], lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), CacheError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.items.borrow().keys().cloned().collect())
    }
}

/// [`Storage`] persisted as one JSON object in a file.
///
/// Every operation re-reads the file, so several processes can share it.
/// Writes are last-write-wins; there is no locking.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, CacheError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(storage_error)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        // A damaged store file is dropped rather than failing every read.
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    fn write(&self, items: &BTreeMap<String, String>) -> Result<(), CacheError> {
        let content = serde_json::to_string(items).map_err(storage_error)?;
        fs::write(&self.path, content).map_err(storage_error)
    }
}

fn storage_error(e: impl std::fmt::Display) -> CacheError {
    CacheError::Storage {
        message: e.to_string(),
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut items = self.read()?;
        items.insert(key.to_string(), value.to_string());
        self.write(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), CacheError> {
        let mut items = self.read()?;
        if items.remove(key).is_some() {
            self.write(&items)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.read()?.into_keys().collect())
    }
}

/// Check that a storage accepts a trivial write and delete.
pub fn probe_storage<S: Storage + ?Sized>(storage: &S) -> bool {
    storage.set_item(PROBE_KEY, PROBE_KEY).is_ok() && storage.remove_item(PROBE_KEY).is_ok()
}

/// Choose the cache implementation for this process.
///
/// Returns a [`StorageCache`] when the storage passes [`probe_storage`], and a
/// [`DummyCache`] otherwise (or when no storage is given).
pub fn select_cache<S: Storage + 'static>(storage: Option<S>, prefix: &str) -> Box<dyn Cache> {
    match storage {
        Some(storage) if probe_storage(&storage) => {
            Box::new(StorageCache::with_prefix(storage, prefix))
        }
        Some(_) => {
            warn!("storage is not available, caching disabled");
            Box::new(DummyCache)
        }
        None => Box::new(DummyCache),
    }
}

/// Read-through helper: return the cached JSON value of `key`, or call
/// `fetch`, store its result and return it.
///
/// A corrupt entry counts as a miss. Errors from `fetch` propagate.
pub fn cached_json<C, F, E>(cache: &C, key: &str, fetch: F) -> Result<Value, E>
where
    C: Cache + ?Sized,
    F: FnOnce() -> Result<Value, E>,
{
    match cache.get_value(key) {
        Ok(Some(value)) => return Ok(value),
        Ok(None) => {}
        Err(e) => debug!(key, error = %e, "ignoring corrupt cache entry"),
    }

    let value = fetch()?;
    match serde_json::to_string(&value) {
        Ok(raw) => cache.set(key, &raw),
        Err(e) => warn!(key, error = %e, "can not serialize value for cache"),
    }
    Ok(value)
}
