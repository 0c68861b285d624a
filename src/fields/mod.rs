//! Fields: the compiled, typed representation of one schema property.
//!
//! A field converts a record value between its wire form (`to_inner`) and its
//! display form (`to_represent`) and validates it (`validate_value`). Every
//! operation receives the whole record, because some fields (dynamic ones)
//! decide what they are from sibling or ancestor values.

mod base;
mod dynamic;
mod fk;
mod nested;
mod registry;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{FieldError, ResolveError};
use crate::models::ModelsResolver;
use crate::types::{name_to_title, DataType, Record, X_OPTIONS};
use crate::views::ViewsTree;

pub use base::{
    validate_base, BaseField, BooleanField, ChoicesField, JsonField, NumberField, StringField,
    TextCheck,
};
pub use dynamic::{DependFromFkField, DependSource, DynamicCallback, DynamicField, FkOptionsCallback};
pub use fk::FkField;
pub use nested::{ArrayField, ArrayItems, ModelSlot, NestedObjectField};
pub use registry::{add_default_fields, FieldConstructor, FieldsResolver};

/// Options every field is constructed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    pub name: String,
    pub data_type: DataType,
    pub format: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub required: bool,
    pub read_only: bool,
    pub nullable: bool,
    pub hidden: bool,
    pub default: Option<Value>,
    /// The `x-options` extension object.
    pub x_options: Map<String, Value>,
    /// The (normalized) property schema the field was built from.
    pub schema: Map<String, Value>,
}

impl FieldOptions {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            title: name_to_title(&name),
            name,
            data_type,
            ..Self::default()
        }
    }

    /// Build options from a normalized property schema.
    pub fn from_schema(name: &str, data_type: DataType, schema: &Map<String, Value>) -> Self {
        let flag = |key: &str| schema.get(key).and_then(Value::as_bool).unwrap_or(false);

        Self {
            name: name.to_string(),
            data_type,
            format: schema
                .get("format")
                .and_then(Value::as_str)
                .map(String::from),
            title: schema
                .get("title")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| name_to_title(name)),
            description: schema
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            required: flag("required"),
            read_only: flag("readOnly"),
            nullable: flag("x-nullable") || flag("nullable"),
            hidden: flag("x-hidden") || flag("hidden"),
            default: schema.get("default").cloned(),
            x_options: schema
                .get(X_OPTIONS)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            schema: schema.clone(),
        }
    }

    pub fn x_option(&self, key: &str) -> Option<&Value> {
        self.x_options.get(key)
    }

    pub fn x_option_str(&self, key: &str) -> Option<&str> {
        self.x_options.get(key).and_then(Value::as_str)
    }

    pub fn schema_u64(&self, key: &str) -> Option<u64> {
        self.schema.get(key).and_then(Value::as_u64)
    }

    pub fn schema_f64(&self, key: &str) -> Option<f64> {
        self.schema.get(key).and_then(Value::as_f64)
    }
}

/// Definition a field can be resolved from.
#[derive(Debug, Clone)]
pub enum FieldDefinition {
    /// A property schema object.
    Schema(Map<String, Value>),
    /// A bare type name (`"integer"`) or registered format (`"color"`).
    Name(String),
    /// A ready field, used as is.
    Field(Rc<dyn Field>),
}

impl FieldDefinition {
    /// Interpret a JSON value as a definition.
    ///
    /// Returns `None` for values that are neither strings nor objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FieldDefinition::Name(s.clone())),
            Value::Object(map) => Some(FieldDefinition::Schema(map.clone())),
            _ => None,
        }
    }

    /// The schema object, if this is a schema definition.
    pub fn schema_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            FieldDefinition::Schema(map) => Some(map),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FieldDefinition::Schema(map) => Value::Object(map.clone()).to_string(),
            FieldDefinition::Name(name) => format!("\"{}\"", name),
            FieldDefinition::Field(field) => format!("<{} {}>", field.kind(), field.name()),
        }
    }
}

impl From<Map<String, Value>> for FieldDefinition {
    fn from(map: Map<String, Value>) -> Self {
        FieldDefinition::Schema(map)
    }
}

impl From<&str> for FieldDefinition {
    fn from(name: &str) -> Self {
        FieldDefinition::Name(name.to_string())
    }
}

impl From<Rc<dyn Field>> for FieldDefinition {
    fn from(field: Rc<dyn Field>) -> Self {
        FieldDefinition::Field(field)
    }
}

/// Everything a field may consult while handling a record.
///
/// Passed down explicitly instead of living in a global, so several
/// applications can coexist in one process.
#[derive(Clone)]
pub struct FieldContext<'a> {
    models: &'a ModelsResolver,
    views: Option<&'a ViewsTree>,
    page: Option<&'a str>,
    parents: Vec<&'a Record>,
}

impl fmt::Debug for FieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldContext")
            .field("page", &self.page)
            .field("parents", &self.parents.len())
            .finish()
    }
}

impl<'a> FieldContext<'a> {
    pub fn new(models: &'a ModelsResolver) -> Self {
        Self {
            models,
            views: None,
            page: None,
            parents: Vec::new(),
        }
    }

    pub fn with_views(mut self, views: &'a ViewsTree) -> Self {
        self.views = Some(views);
        self
    }

    /// Mark `path` as the active page.
    pub fn on_page(mut self, path: &'a str) -> Self {
        self.page = Some(path);
        self
    }

    /// Context for the fields of a record nested inside `record`.
    pub fn with_parent<'b>(&'b self, record: &'b Record) -> FieldContext<'b>
    where
        'a: 'b,
    {
        FieldContext {
            models: self.models,
            views: self.views,
            page: self.page,
            parents: self
                .parents
                .iter()
                .copied()
                .chain(std::iter::once(record))
                .collect(),
        }
    }

    pub fn models(&self) -> &'a ModelsResolver {
        self.models
    }

    pub fn fields(&self) -> &'a FieldsResolver {
        self.models.fields_resolver()
    }

    pub fn views(&self) -> Option<&'a ViewsTree> {
        self.views
    }

    pub fn page(&self) -> Option<&'a str> {
        self.page
    }

    /// Enclosing record `level` steps up: 1 is the parent, 2 the grandparent.
    pub fn ancestor(&self, level: usize) -> Option<&'a Record> {
        if level == 0 || level > self.parents.len() {
            return None;
        }
        self.parents.get(self.parents.len() - level).copied()
    }
}

/// One compiled property of a model.
pub trait Field: fmt::Debug {
    fn options(&self) -> &FieldOptions;

    /// Identifier of the implementation, e.g. `"string"`, `"color"`, `"fk"`.
    fn kind(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &str {
        &self.options().name
    }

    fn title(&self) -> &str {
        &self.options().title
    }

    fn data_type(&self) -> DataType {
        self.options().data_type
    }

    fn format(&self) -> Option<&str> {
        self.options().format.as_deref()
    }

    fn is_required(&self) -> bool {
        self.options().required
    }

    fn is_read_only(&self) -> bool {
        self.options().read_only
    }

    fn is_nullable(&self) -> bool {
        self.options().nullable
    }

    /// Raw value of this field in `data`; `None` when absent.
    fn value(&self, data: &Record) -> Option<Value> {
        data.get(self.name()).cloned()
    }

    /// Convert the display value into its wire form.
    fn to_inner(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data)
    }

    /// Convert the wire value into its display form.
    fn to_represent(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data)
    }

    /// Validate the display value, returning the accepted value.
    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        validate_base(self.options(), self.value(data))
    }

    /// Prepare the field for use on the view at `path`.
    ///
    /// Called once models, views and routes exist.
    fn prepare_for_view(&self, _path: &str, _ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        Ok(())
    }
}

/// Record holding a single value under `name`.
pub(crate) fn single_value_record(name: &str, value: Value) -> Record {
    let mut record = Map::new();
    record.insert(name.to_string(), value);
    record
}
