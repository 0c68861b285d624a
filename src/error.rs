//! Error types for schema loading, model compilation and validation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors while loading a schema document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("fragment not found: {fragment}")]
    FragmentNotFound { fragment: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } | LoadError::HttpStatus { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while compiling models and resolving fields.
///
/// Compilation errors abort the call that requested the model or field.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no field registered for type \"{data_type}\"{}", format_suffix(.format))]
    FormatNotFound {
        data_type: String,
        format: Option<String>,
    },

    #[error("Cannot find model {model} for path {path}")]
    ModelNotFound { model: String, path: String },

    #[error("invalid model ref {reference}")]
    InvalidReference { reference: String },

    #[error("model {model} declares field \"{field}\" more than once")]
    DuplicateField { model: String, field: String },

    #[error("name for field {definition} is not provided")]
    MissingFieldName { definition: String },

    #[error("field \"{field}\": {message}")]
    InvalidField { field: String, message: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}

fn format_suffix(format: &Option<String>) -> String {
    match format {
        Some(format) => format!(" and format \"{}\"", format),
        None => String::new(),
    }
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Validation failure of a single field value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("Field is empty.")]
    Empty,

    #[error("Maximum length is {0}.")]
    MaxLength(u64),

    #[error("Minimum length is {0}.")]
    MinLength(u64),

    #[error("Maximum value is {0}.")]
    Maximum(f64),

    #[error("Minimum value is {0}.")]
    Minimum(f64),

    #[error("Maximum number of items is {0}.")]
    MaxItems(u64),

    #[error("Minimum number of items is {0}.")]
    MinItems(u64),

    #[error("{0}")]
    Invalid(String),

    #[error("{}", join_nested(.0))]
    Nested(Vec<(String, FieldError)>),

    #[error("{}", join_items(.0))]
    Items(Vec<(usize, FieldError)>),
}

fn join_nested(errors: &[(String, FieldError)]) -> String {
    errors
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_items(errors: &[(usize, FieldError)]) -> String {
    errors
        .iter()
        .map(|(idx, e)| format!("[{}]: {}", idx, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Field errors collected while validating a record against a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelValidationError {
    pub model: String,
    pub errors: Vec<(String, FieldError)>,
}

impl ModelValidationError {
    /// Returns the error for a field, if that field failed.
    pub fn field(&self, name: &str) -> Option<&FieldError> {
        self.errors
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, e)| e)
    }
}

impl fmt::Display for ModelValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is invalid: {}", self.model, join_nested(&self.errors))
    }
}

impl std::error::Error for ModelValidationError {}

/// Errors raised by the cache layer. Callers treat every variant as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("corrupt cache entry {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors during payload validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Model(ModelValidationError),

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Resolve(e) => e.exit_code(),
            ValidateError::Model(_) | ValidateError::Invalid { .. } => 1,
        }
    }
}

/// Single JSON-Schema validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
