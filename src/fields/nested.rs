//! Fields holding nested records: objects with their own model and arrays.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::warn;

use super::{single_value_record, validate_base, Field, FieldContext, FieldDefinition, FieldOptions};
use crate::error::{FieldError, ResolveError};
use crate::fields::FieldsResolver;
use crate::loader::navigate_fragment;
use crate::models::{Model, ModelsResolver};
use crate::types::{DataType, Record, REF_PROPERTY};

/// Where a nested model comes from.
#[derive(Debug, Clone)]
pub enum ModelSlot {
    /// Already compiled (inline schemas compiled with the owner).
    Compiled(Rc<Model>),
    /// A `$ref`, looked up on each use so cycles stay lazy.
    Reference(String),
    /// An inline schema compiled on first use.
    Schema(Map<String, Value>),
}

impl ModelSlot {
    /// Detect a model-shaped schema: a `$ref` to a model definition of
    /// `document`, or an object with `properties` and no explicit format.
    pub fn detect(schema: &Map<String, Value>, document: &Value) -> Option<ModelSlot> {
        if let Some(reference) = schema.get(REF_PROPERTY).and_then(Value::as_str) {
            let is_model = reference.starts_with("#/definitions/")
                && navigate_fragment(document, reference)
                    .ok()
                    .as_ref()
                    .and_then(Value::as_object)
                    .is_some_and(is_model_schema);
            return is_model.then(|| ModelSlot::Reference(reference.to_string()));
        }
        let has_format = schema.contains_key("format") || schema.contains_key("x-format");
        (is_model_schema(schema) && !has_format).then(|| ModelSlot::Schema(schema.clone()))
    }

    /// Compile inline schemas now.
    pub fn compile(self, models: &ModelsResolver) -> Result<ModelSlot, ResolveError> {
        match self {
            ModelSlot::Schema(schema) => Ok(ModelSlot::Compiled(models.by_schema_object(&schema)?)),
            other => Ok(other),
        }
    }

    pub fn resolve(&self, models: &ModelsResolver) -> Result<Rc<Model>, ResolveError> {
        match self {
            ModelSlot::Compiled(model) => Ok(Rc::clone(model)),
            ModelSlot::Reference(reference) => models.by_reference_path(reference),
            ModelSlot::Schema(schema) => models.by_schema_object(schema),
        }
    }

    /// Model name when known without compiling.
    pub fn name(&self) -> Option<&str> {
        match self {
            ModelSlot::Compiled(model) => Some(model.name()),
            ModelSlot::Reference(reference) => reference.rsplit('/').next(),
            ModelSlot::Schema(_) => None,
        }
    }
}

fn is_model_schema(schema: &Map<String, Value>) -> bool {
    let is_object = match schema.get("type").and_then(Value::as_str) {
        Some(t) => t == DataType::Object.as_str(),
        None => true,
    };
    is_object && schema.get("properties").is_some_and(Value::is_object)
}

fn nested_model(slot: &ModelSlot, field: &str, ctx: &FieldContext<'_>) -> Option<Rc<Model>> {
    match slot.resolve(ctx.models()) {
        Ok(model) => Some(model),
        Err(e) => {
            warn!(field, error = %e, "cannot resolve nested model");
            None
        }
    }
}

/// Prepare the fields of a nested model once per view path.
///
/// The path is marked before recursing so models reaching themselves stop.
fn prepare_nested(
    slot: &ModelSlot,
    prepared: &RefCell<HashSet<String>>,
    path: &str,
    ctx: &FieldContext<'_>,
) -> Result<(), ResolveError> {
    if !prepared.borrow_mut().insert(path.to_string()) {
        return Ok(());
    }
    slot.resolve(ctx.models())?.prepare_for_view(path, ctx)
}

/// Field whose value is a record of another model.
#[derive(Debug)]
pub struct NestedObjectField {
    options: FieldOptions,
    model: ModelSlot,
    prepared: RefCell<HashSet<String>>,
}

impl NestedObjectField {
    pub fn new(options: FieldOptions, model: ModelSlot) -> Self {
        Self {
            options,
            model,
            prepared: RefCell::new(HashSet::new()),
        }
    }

    pub fn model_slot(&self) -> &ModelSlot {
        &self.model
    }

    /// # Errors
    ///
    /// Returns the error compiling the nested model.
    pub fn nested_model(&self, models: &ModelsResolver) -> Result<Rc<Model>, ResolveError> {
        self.model.resolve(models)
    }

    fn convert(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
        op: impl Fn(&Model, &Record, &FieldContext<'_>) -> Record,
    ) -> Option<Value> {
        let value = self.value(data)?;
        let Value::Object(record) = &value else {
            return Some(value);
        };
        match nested_model(&self.model, &self.options.name, ctx) {
            Some(model) => Some(Value::Object(op(&model, record, &ctx.with_parent(data)))),
            None => Some(value),
        }
    }
}

impl Field for NestedObjectField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "nested_object"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.convert(data, ctx, Model::to_inner)
    }

    fn to_represent(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        self.convert(data, ctx, Model::to_represent)
    }

    fn validate_value(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data))?;
        let Some(Value::Object(record)) = &value else {
            return Ok(value);
        };
        let model = self
            .model
            .resolve(ctx.models())
            .map_err(|e| FieldError::Invalid(e.to_string()))?;
        model
            .validate(record, &ctx.with_parent(data))
            .map(|record| Some(Value::Object(record)))
            .map_err(|e| FieldError::Nested(e.errors))
    }

    fn prepare_for_view(&self, path: &str, ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        prepare_nested(&self.model, &self.prepared, path, ctx)
    }
}

/// Items of an array field.
#[derive(Debug, Clone)]
pub enum ArrayItems {
    Field(Rc<dyn Field>),
    Model(ModelSlot),
}

/// Array field. Items are plain fields or records of a model.
///
/// With `collectionFormat` (`csv`, `ssv`, `tsv`, `pipes`) the wire form is a
/// joined string.
#[derive(Debug)]
pub struct ArrayField {
    options: FieldOptions,
    items: ArrayItems,
    separator: Option<&'static str>,
    prepared: RefCell<HashSet<String>>,
}

fn separator_for(format: &str) -> Option<&'static str> {
    match format {
        "csv" => Some(","),
        "ssv" => Some(" "),
        "tsv" => Some("\t"),
        "pipes" => Some("|"),
        _ => None,
    }
}

impl ArrayField {
    pub fn new(options: FieldOptions, items: ArrayItems) -> Self {
        let separator = options
            .schema
            .get("collectionFormat")
            .or_else(|| options.schema.get("x-collectionFormat"))
            .and_then(Value::as_str)
            .and_then(separator_for);
        Self {
            options,
            items,
            separator,
            prepared: RefCell::new(HashSet::new()),
        }
    }

    /// Build the item field from the `items` schema.
    ///
    /// # Errors
    ///
    /// Returns the error resolving the item field.
    pub fn from_items(options: FieldOptions, resolver: &FieldsResolver) -> Result<Self, ResolveError> {
        let items = match options.schema.get("items") {
            Some(Value::Object(items)) => match ModelSlot::detect(items, resolver.document()) {
                Some(slot) => ArrayItems::Model(slot),
                None => ArrayItems::Field(
                    resolver.resolve_field(FieldDefinition::Schema(items.clone()), &options.name)?,
                ),
            },
            Some(Value::String(definition)) => {
                ArrayItems::Field(resolver.resolve_field(definition.as_str(), &options.name)?)
            }
            _ => {
                warn!(field = %options.name, "array field has no items schema, using strings");
                ArrayItems::Field(resolver.resolve_field("string", &options.name)?)
            }
        };
        Ok(Self::new(options, items))
    }

    pub fn items(&self) -> &ArrayItems {
        &self.items
    }

    fn elements(&self, data: &Record) -> Option<Result<Vec<Value>, Value>> {
        match self.value(data)? {
            Value::Array(items) => Some(Ok(items)),
            Value::String(s) if self.separator.is_some() => {
                let separator = self.separator.unwrap_or(",");
                if s.is_empty() {
                    return Some(Ok(Vec::new()));
                }
                Some(Ok(s.split(separator).map(|p| Value::String(p.to_string())).collect()))
            }
            other => Some(Err(other)),
        }
    }

    fn map_items(
        &self,
        items: Vec<Value>,
        data: &Record,
        ctx: &FieldContext<'_>,
        inner: bool,
    ) -> Vec<Value> {
        match &self.items {
            ArrayItems::Field(field) => items
                .into_iter()
                .map(|item| {
                    let record = single_value_record(&self.options.name, item);
                    let converted = if inner {
                        field.to_inner(&record, ctx)
                    } else {
                        field.to_represent(&record, ctx)
                    };
                    converted.unwrap_or(Value::Null)
                })
                .collect(),
            ArrayItems::Model(slot) => {
                let Some(model) = nested_model(slot, &self.options.name, ctx) else {
                    return items;
                };
                let nested = ctx.with_parent(data);
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(record) if inner => Value::Object(model.to_inner(&record, &nested)),
                        Value::Object(record) => Value::Object(model.to_represent(&record, &nested)),
                        other => other,
                    })
                    .collect()
            }
        }
    }
}

fn join(items: &[Value], separator: &str) -> Value {
    let parts: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Value::String(parts.join(separator))
}

impl Field for ArrayField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "array"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        match self.elements(data)? {
            Ok(items) => {
                let converted = self.map_items(items, data, ctx, true);
                match self.separator {
                    Some(separator) => Some(join(&converted, separator)),
                    None => Some(Value::Array(converted)),
                }
            }
            Err(other) => Some(other),
        }
    }

    fn to_represent(&self, data: &Record, ctx: &FieldContext<'_>) -> Option<Value> {
        match self.elements(data)? {
            Ok(items) => Some(Value::Array(self.map_items(items, data, ctx, false))),
            Err(other) => Some(other),
        }
    }

    fn validate_value(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data))?;
        let items = match self.elements(data) {
            Some(Ok(items)) => items,
            Some(Err(Value::Null)) | None => return Ok(value),
            Some(Err(_)) => return Err(FieldError::Invalid("Value must be a list.".to_string())),
        };

        let count = items.len() as u64;
        if let Some(max) = self.options.schema_u64("maxItems") {
            if count > max {
                return Err(FieldError::MaxItems(max));
            }
        }
        if let Some(min) = self.options.schema_u64("minItems") {
            if count < min {
                return Err(FieldError::MinItems(min));
            }
        }
        if self.options.schema.get("uniqueItems").and_then(Value::as_bool) == Some(true)
            && items.iter().enumerate().any(|(idx, item)| items[..idx].contains(item))
        {
            return Err(FieldError::Invalid("Items must be unique.".to_string()));
        }

        let mut errors = Vec::new();
        let mut accepted = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let result = match &self.items {
                ArrayItems::Field(field) => field
                    .validate_value(&single_value_record(&self.options.name, item.clone()), ctx)
                    .map(|v| v.unwrap_or(Value::Null)),
                ArrayItems::Model(slot) => match &item {
                    Value::Object(record) => slot
                        .resolve(ctx.models())
                        .map_err(|e| FieldError::Invalid(e.to_string()))
                        .and_then(|model| {
                            model
                                .validate(record, &ctx.with_parent(data))
                                .map(Value::Object)
                                .map_err(|e| FieldError::Nested(e.errors))
                        }),
                    _ => Err(FieldError::Invalid("Item must be an object.".to_string())),
                },
            };
            match result {
                Ok(item) => accepted.push(item),
                Err(e) => errors.push((idx, e)),
            }
        }

        if errors.is_empty() {
            Ok(Some(Value::Array(accepted)))
        } else {
            Err(FieldError::Items(errors))
        }
    }

    fn prepare_for_view(&self, path: &str, ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        match &self.items {
            ArrayItems::Field(field) => field.prepare_for_view(path, ctx),
            ArrayItems::Model(slot) => prepare_nested(slot, &self.prepared, path, ctx),
        }
    }
}
