//! Fields whose real type is resolved from other values at read time.
//!
//! Nothing is memoized: every `to_inner`, `to_represent` and
//! `validate_value` call resolves the real field again, because the values
//! it depends on may have changed since the last call.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Field, FieldContext, FieldDefinition, FieldOptions, FieldsResolver};
use crate::error::{FieldError, ResolveError};
use crate::types::Record;

/// Derives a field definition from the watched values.
pub type DynamicCallback = Rc<dyn Fn(&Record) -> Option<FieldDefinition>>;

/// Derives extra construction options from the record.
pub type FkOptionsCallback = Rc<dyn Fn(&Record) -> Map<String, Value>>;

const PARENT_MARKER: &str = "<<parent>>";

/// Record the watched values are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependSource {
    /// The record holding the field itself.
    Sibling,
    /// An enclosing record, `n` levels up.
    Ancestor(usize),
}

impl DependSource {
    /// Parse `x-options.source_view`: `<<parent>>`, `<<parent>>.<<parent>>` ...
    pub fn parse(field: &str, source_view: Option<&str>) -> Self {
        let Some(source_view) = source_view else {
            return DependSource::Sibling;
        };
        let parts: Vec<&str> = source_view.split('.').collect();
        if parts.iter().all(|p| *p == PARENT_MARKER) {
            return DependSource::Ancestor(parts.len());
        }
        warn!(field, source_view, "only <<parent>> source views are supported, using sibling values");
        DependSource::Sibling
    }

    fn record<'a>(&self, data: &'a Record, ctx: &FieldContext<'a>) -> Option<&'a Record> {
        match self {
            DependSource::Sibling => Some(data),
            DependSource::Ancestor(level) => ctx.ancestor(*level),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

fn lookup_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Copy title, required and read-only flags of the owner into a definition.
fn inherit(
    owner: &FieldOptions,
    definition: FieldDefinition,
    resolver: &FieldsResolver,
) -> FieldDefinition {
    let mut schema = match definition {
        FieldDefinition::Field(field) => return FieldDefinition::Field(field),
        FieldDefinition::Name(name) => resolver.schema_for_name(&name),
        FieldDefinition::Schema(schema) => schema,
    };
    schema
        .entry("title")
        .or_insert_with(|| Value::String(owner.title.clone()));
    if owner.required {
        schema.insert("required".into(), Value::Bool(true));
    }
    if owner.read_only {
        schema.entry("readOnly").or_insert(Value::Bool(true));
    }
    if owner.nullable {
        schema.entry("x-nullable").or_insert(Value::Bool(true));
    }
    FieldDefinition::Schema(schema)
}

fn resolve_inherited(
    owner: &FieldOptions,
    definition: FieldDefinition,
    resolver: &FieldsResolver,
) -> Result<Rc<dyn Field>, ResolveError> {
    resolver.resolve_field(inherit(owner, definition, resolver), &owner.name)
}

fn prepared(field: Rc<dyn Field>, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError> {
    if let Some(page) = ctx.page() {
        field.prepare_for_view(page, ctx)?;
    }
    Ok(field)
}

/// Shared behavior of dynamic fields: resolve, then delegate.
trait Resolving: Field {
    fn real_field(&self, data: &Record, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError>;

    fn delegate(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
        op: impl FnOnce(&dyn Field) -> Option<Value>,
    ) -> Option<Value> {
        match self.real_field(data, ctx) {
            Ok(field) => op(field.as_ref()),
            Err(e) => {
                warn!(field = %self.name(), error = %e, "cannot resolve real field");
                self.value(data)
            }
        }
    }

    fn delegate_validation(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let field = self
            .real_field(data, ctx)
            .map_err(|e| FieldError::Invalid(e.to_string()))?;
        field.validate_value(data, ctx)
    }
}

/// Field whose type follows the value of other fields.
///
/// Configured through `x-options`:
/// - `field`: name (or names) of the watched fields
/// - `types`: watched value to field definition
/// - `choices`: watched value to list of choices
/// - `source_view`: `<<parent>>` chains read an enclosing record instead
///
/// Resolution order is types, callback, choices, the watched value itself
/// (as a definition), then a plain string field.
pub struct DynamicField {
    options: FieldOptions,
    fields: Vec<String>,
    types: Map<String, Value>,
    choices: Map<String, Value>,
    callback: Option<DynamicCallback>,
    source: DependSource,
    used_on_views: RefCell<BTreeSet<String>>,
}

impl fmt::Debug for DynamicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicField")
            .field("name", &self.options.name)
            .field("fields", &self.fields)
            .field("types", &self.types)
            .field("choices", &self.choices)
            .field("callback", &self.callback.is_some())
            .field("source", &self.source)
            .finish()
    }
}

impl DynamicField {
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidField` if `x-options.field` is neither a
    /// string nor a list of strings.
    pub fn new(options: FieldOptions) -> Result<Self, ResolveError> {
        let fields = match options.x_option("field") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| n.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| ResolveError::InvalidField {
                    field: options.name.clone(),
                    message: "x-options.field must list field names".to_string(),
                })?,
            Some(_) => {
                return Err(ResolveError::InvalidField {
                    field: options.name.clone(),
                    message: "x-options.field must be a field name".to_string(),
                })
            }
        };
        let object = |key: &str| {
            options
                .x_option(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        let types = object("types");
        let choices = object("choices");
        let source = DependSource::parse(&options.name, options.x_option_str("source_view"));

        Ok(Self {
            options,
            fields,
            types,
            choices,
            callback: None,
            source,
            used_on_views: RefCell::new(BTreeSet::new()),
        })
    }

    /// Attach a host callback consulted after `types`.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Record) -> Option<FieldDefinition> + 'static,
    {
        self.callback = Some(Rc::new(callback));
        self
    }

    pub fn watched_fields(&self) -> &[String] {
        &self.fields
    }

    pub fn source(&self) -> DependSource {
        self.source
    }

    /// Paths of the views the field was prepared for.
    pub fn used_on_views(&self) -> Vec<String> {
        self.used_on_views.borrow().iter().cloned().collect()
    }

    /// Values of the watched fields. Empty when the source record is not loaded.
    pub fn parent_values(&self, data: &Record, ctx: &FieldContext<'_>) -> Record {
        let mut values = Map::new();
        if let Some(source) = self.source.record(data, ctx) {
            for name in &self.fields {
                if let Some(value) = source.get(name) {
                    values.insert(name.clone(), value.clone());
                }
            }
        }
        values
    }

    fn from_types(&self, values: &Record, resolver: &FieldsResolver) -> Result<Option<Rc<dyn Field>>, ResolveError> {
        for value in values.values() {
            let definition = lookup_key(value)
                .and_then(|key| self.types.get(&key))
                .and_then(FieldDefinition::from_value);
            if let Some(definition) = definition {
                return resolve_inherited(&self.options, definition, resolver).map(Some);
            }
        }
        Ok(None)
    }

    fn from_callback(&self, values: &Record, resolver: &FieldsResolver) -> Result<Option<Rc<dyn Field>>, ResolveError> {
        match self.callback.as_ref().and_then(|callback| callback(values)) {
            Some(definition) => resolve_inherited(&self.options, definition, resolver).map(Some),
            None => Ok(None),
        }
    }

    fn from_choices(&self, values: &Record, resolver: &FieldsResolver) -> Result<Option<Rc<dyn Field>>, ResolveError> {
        for value in values.values() {
            let Some(Value::Array(items)) = lookup_key(value).and_then(|key| self.choices.get(&key)) else {
                continue;
            };
            let mut schema = Map::new();
            if items.iter().any(Value::is_boolean) {
                schema.insert("type".into(), "boolean".into());
            } else {
                schema.insert("format".into(), "choices".into());
                schema.insert("enum".into(), Value::Array(items.clone()));
            }
            return resolve_inherited(&self.options, FieldDefinition::Schema(schema), resolver).map(Some);
        }
        Ok(None)
    }

    /// Use the single watched value itself as a definition.
    ///
    /// Errors are swallowed: a value that is not a usable definition just
    /// falls through to the default.
    fn from_value(&self, values: &Record, resolver: &FieldsResolver) -> Option<Rc<dyn Field>> {
        let [name] = self.fields.as_slice() else {
            return None;
        };
        let value = values.get(name).filter(|v| is_truthy(v))?;
        let definition = FieldDefinition::from_value(value)?;
        match resolve_inherited(&self.options, definition, resolver) {
            Ok(field) => Some(field),
            Err(e) => {
                debug!(field = %self.options.name, error = %e, "watched value is not a field definition");
                None
            }
        }
    }
}

impl Resolving for DynamicField {
    fn real_field(&self, data: &Record, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError> {
        let values = self.parent_values(data, ctx);
        let resolver = ctx.fields();

        let field = if let Some(field) = self.from_types(&values, resolver)? {
            field
        } else if let Some(field) = self.from_callback(&values, resolver)? {
            field
        } else if let Some(field) = self.from_choices(&values, resolver)? {
            field
        } else if let Some(field) = self.from_value(&values, resolver) {
            field
        } else {
            resolve_inherited(&self.options, FieldDefinition::Name("string".into()), resolver)?
        };
        prepared(field, ctx)
    }
}

impl Field for DynamicField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "dynamic"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.delegate(data, ctx, |field| field.to_inner(data, ctx))
    }

    fn to_represent(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.delegate(data, ctx, |field| field.to_represent(data, ctx))
    }

    fn validate_value(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        self.delegate_validation(data, ctx)
    }

    /// Remembers the path and prepares every field declared in `types`.
    fn prepare_for_view(&self, path: &str, ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        self.used_on_views.borrow_mut().insert(path.to_string());
        for definition in self.types.values().filter_map(FieldDefinition::from_value) {
            resolve_inherited(&self.options, definition, ctx.fields())?.prepare_for_view(path, ctx)?;
        }
        Ok(())
    }
}

/// Field whose format is an attribute of a related (FK) instance.
///
/// `x-options.field` names the related field and `field_attribute` the
/// attribute path (dotted) in its value. A missing value means `string`.
/// An attribute holding an object is used as the field definition itself.
pub struct DependFromFkField {
    options: FieldOptions,
    depend_field: String,
    attribute: Vec<String>,
    types: Map<String, Value>,
    callback: Option<FkOptionsCallback>,
    source: DependSource,
}

impl fmt::Debug for DependFromFkField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependFromFkField")
            .field("name", &self.options.name)
            .field("depend_field", &self.depend_field)
            .field("attribute", &self.attribute.join("."))
            .field("callback", &self.callback.is_some())
            .field("source", &self.source)
            .finish()
    }
}

impl DependFromFkField {
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidField` when `field` or
    /// `field_attribute` is missing.
    pub fn new(options: FieldOptions) -> Result<Self, ResolveError> {
        let required = |key: &str| {
            options
                .x_option_str(key)
                .map(String::from)
                .ok_or_else(|| ResolveError::InvalidField {
                    field: options.name.clone(),
                    message: format!("x-options.{} is required", key),
                })
        };
        let depend_field = required("field")?;
        let attribute = required("field_attribute")?
            .split('.')
            .map(String::from)
            .collect();
        let types = options
            .x_option("types")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let source = DependSource::parse(&options.name, options.x_option_str("source_view"));

        Ok(Self {
            options,
            depend_field,
            attribute,
            types,
            callback: None,
            source,
        })
    }

    /// Attach a callback whose options are merged into the resolved definition.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Record) -> Map<String, Value> + 'static,
    {
        self.callback = Some(Rc::new(callback));
        self
    }

    pub fn depend_field(&self) -> &str {
        &self.depend_field
    }

    /// Attribute of the related value, `"string"` when absent.
    pub fn depend_value(&self, data: &Record, ctx: &FieldContext<'_>) -> Value {
        let related = self
            .source
            .record(data, ctx)
            .and_then(|record| record.get(&self.depend_field));
        let value = related.and_then(|related| {
            self.attribute
                .iter()
                .try_fold(related, |value, key| value.get(key))
        });
        match value {
            Some(value) if is_truthy(value) => value.clone(),
            _ => Value::String("string".into()),
        }
    }
}

impl Resolving for DependFromFkField {
    fn real_field(&self, data: &Record, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError> {
        let resolver = ctx.fields();
        let value = self.depend_value(data, ctx);

        let typed = lookup_key(&value)
            .and_then(|key| self.types.get(&key))
            .and_then(FieldDefinition::from_value);
        let definition = match (typed, value) {
            (Some(definition), _) => definition,
            (None, Value::Object(schema)) => FieldDefinition::Schema(schema),
            (None, other) => {
                let mut schema = Map::new();
                schema.insert("format".into(), other);
                FieldDefinition::Schema(schema)
            }
        };

        let definition = match (definition, &self.callback) {
            (FieldDefinition::Schema(mut schema), Some(callback)) => {
                schema.extend(callback(data));
                FieldDefinition::Schema(schema)
            }
            (definition, _) => definition,
        };

        prepared(resolve_inherited(&self.options, definition, resolver)?, ctx)
    }
}

impl Field for DependFromFkField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "dynamic_fk"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.delegate(data, ctx, |field| field.to_inner(data, ctx))
    }

    fn to_represent(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.delegate(data, ctx, |field| field.to_represent(data, ctx))
    }

    fn validate_value(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        self.delegate_validation(data, ctx)
    }
}

impl DynamicField {
    /// Resolve the field this one currently stands for.
    ///
    /// # Errors
    ///
    /// Returns the error of the registry or of preparing the field for the
    /// active page.
    pub fn resolve(&self, data: &Record, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError> {
        self.real_field(data, ctx)
    }
}

impl DependFromFkField {
    /// Resolve the field this one currently stands for.
    ///
    /// # Errors
    ///
    /// Returns the error of the registry or of preparing the field for the
    /// active page.
    pub fn resolve(&self, data: &Record, ctx: &FieldContext<'_>) -> Result<Rc<dyn Field>, ResolveError> {
        self.real_field(data, ctx)
    }
}
