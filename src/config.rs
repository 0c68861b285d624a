//! Application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_PREFIX;
use crate::error::LoadError;
use crate::loader::load_schema;

/// Options of one application instance.
///
/// Every key is optional in a configuration file:
///
/// ```json
/// { "cache_prefix": "app_", "cache_file": ".cache.json", "language": "de" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Namespace of this application's cache keys.
    pub cache_prefix: String,
    /// File backing the persistent cache. No persistent cache when unset.
    pub cache_file: Option<PathBuf>,
    pub language: String,
    /// Anonymous session: the schema is cached under `openapi-anon`.
    pub anon: bool,
    /// Schema source, a path or URL.
    pub schema: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_file: None,
            language: "en".to_string(),
            anon: false,
            schema: None,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::FileNotFound`/`ReadError` for IO failures and
    /// `LoadError::InvalidJson` if the file does not describe an `AppConfig`.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let value = load_schema(path)?;
        serde_json::from_value(value).map_err(|source| LoadError::InvalidJson { source })
    }

    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn anon(mut self, anon: bool) -> Self {
        self.anon = anon;
        self
    }

    pub fn schema(mut self, source: impl Into<String>) -> Self {
        self.schema = Some(source.into());
        self
    }
}
