//! Schema loading from various sources.
//!
//! Handles loading schemas from files, strings, and HTTP URLs, optionally
//! read through a [`Cache`].

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::cache::{cached_json, Cache, OPENAPI_ANON_CACHE_KEY, OPENAPI_CACHE_KEY};
use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a schema from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_schema_str(&content)
}

/// Load a schema from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a schema from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails,
/// `LoadError::HttpStatus` for a non-success status,
/// or `LoadError::InvalidJson` if the response isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_schema_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client.get(url).send().map_err(network)?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().map_err(network)?;
    load_schema_str(&body)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/User").
///
/// Returns the value at the given JSON Pointer path within the document.
/// The fragment should start with '#'.
///
/// # Errors
///
/// Returns `LoadError::FragmentNotFound` if a segment is missing.
pub fn navigate_fragment(document: &Value, fragment: &str) -> Result<Value, LoadError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(document.clone());
    }

    let mut current = document;
    for part in path.split('/') {
        // JSON Pointer escapes: ~1 is /, ~0 is ~
        let key = part.replace("~1", "/").replace("~0", "~");
        let next = match current {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            other => other.get(&key),
        };
        current = next.ok_or_else(|| LoadError::FragmentNotFound {
            fragment: fragment.to_string(),
        })?;
    }
    Ok(current.clone())
}

/// Load a schema from a file path or URL.
///
/// Automatically detects whether the source is a URL or file path.
/// URL loading requires the `remote` feature.
///
/// # Errors
///
/// Returns appropriate errors based on the source type.
pub fn load_schema_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_schema_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_schema(Path::new(source))
    }
}

/// Loads the OpenAPI document through a cache.
///
/// A cached document is returned without touching the source; otherwise the
/// source is loaded and written back under `openapi` (or `openapi-anon` for
/// anonymous sessions).
pub struct OpenApiLoader<'a> {
    cache: &'a dyn Cache,
    anon: bool,
}

impl<'a> OpenApiLoader<'a> {
    pub fn new(cache: &'a dyn Cache) -> Self {
        Self { cache, anon: false }
    }

    /// Use the cache key of anonymous sessions.
    pub fn anon(mut self, anon: bool) -> Self {
        self.anon = anon;
        self
    }

    pub fn cache_key(&self) -> &'static str {
        if self.anon {
            OPENAPI_ANON_CACHE_KEY
        } else {
            OPENAPI_CACHE_KEY
        }
    }

    /// # Errors
    ///
    /// Returns the error loading the source on a cache miss.
    pub fn load(&self, source: &str) -> Result<Value, LoadError> {
        let key = self.cache_key();
        cached_json(self.cache, key, || {
            debug!(source, key, "schema not cached, loading");
            load_schema_auto(source)
        })
    }
}
