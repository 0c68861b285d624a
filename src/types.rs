//! Core types shared by the compiler, the field registry and the views.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One record of data: field name to value, in declaration order.
pub type Record = Map<String, Value>;

/// Schema key holding per-field extension options.
pub const X_OPTIONS: &str = "x-options";

/// Schema key of a JSON reference.
pub const REF_PROPERTY: &str = "$ref";

/// Schema key naming a field format when `format` is taken by the wire type.
pub const X_FORMAT: &str = "x-format";

/// Data type of a schema property (the `type` keyword).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    File,
}

impl DataType {
    /// All data types, in the order formats are searched when guessing a type.
    pub const ALL: [DataType; 7] = [
        DataType::String,
        DataType::Number,
        DataType::Integer,
        DataType::Boolean,
        DataType::Array,
        DataType::Object,
        DataType::File,
    ];

    /// Parse a schema `type` value.
    ///
    /// Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(DataType::String),
            "number" => Some(DataType::Number),
            "integer" => Some(DataType::Integer),
            "boolean" => Some(DataType::Boolean),
            "array" => Some(DataType::Array),
            "object" => Some(DataType::Object),
            "file" => Some(DataType::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::File => "file",
        }
    }

    /// Types whose `enum` keyword turns a field into a choices field.
    pub fn supports_enum(&self) -> bool {
        matches!(
            self,
            DataType::String | DataType::Number | DataType::Integer
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout strategy of a model (`x-display-mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayMode {
    #[default]
    Default,
    Step,
}

impl DisplayMode {
    pub const SUPPORTED: &'static [&'static str] = &["DEFAULT", "STEP"];

    /// Parse a display mode, returning `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEFAULT" => Some(DisplayMode::Default),
            "STEP" => Some(DisplayMode::Step),
            _ => None,
        }
    }

    /// Resolve the `x-display-mode` of a model schema.
    ///
    /// Unknown modes fall back to [`DisplayMode::Default`] with a warning.
    pub fn from_schema(model: &str, value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return DisplayMode::Default;
        };
        match value.as_str().and_then(DisplayMode::parse) {
            Some(mode) => mode,
            None => {
                warn!(
                    model,
                    mode = %value,
                    supported = ?DisplayMode::SUPPORTED,
                    "unsupported display mode, using DEFAULT"
                );
                DisplayMode::Default
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Default => "DEFAULT",
            DisplayMode::Step => "STEP",
        }
    }
}

/// Turn a field name into a human title: `first_name` becomes `First name`.
pub fn name_to_title(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
