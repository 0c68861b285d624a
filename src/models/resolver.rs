//! Model compiler: definitions and inline schema objects to [`Model`]s.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::debug;

use super::Model;
use crate::error::ResolveError;
use crate::fields::{
    ArrayField, ArrayItems, Field, FieldDefinition, FieldOptions, FieldsResolver, ModelSlot,
    NestedObjectField,
};
use crate::signals::{model_created, model_fields_before_init, Signals, SCHEMA_MODELS_CREATED};
use crate::types::{DataType, REF_PROPERTY, X_FORMAT};

/// Name of the field validating `additionalProperties` values.
pub const ADDITIONAL_PROPERTIES_FIELD_NAME: &str = "additionalProperties";

const DEFINITIONS_PREFIX: &str = "#/definitions/";
const ANONYMOUS_MODEL_PREFIX: &str = "NoNameModel";

/// Ordered field definitions of a model, handed to
/// `models[<Name>].fields.beforeInit` handlers before fields are built.
#[derive(Debug, Clone, Default)]
pub struct FieldsMapping {
    entries: Vec<(String, FieldDefinition)>,
}

impl FieldsMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing an existing one in place.
    pub fn insert(&mut self, name: impl Into<String>, definition: impl Into<FieldDefinition>) {
        let name = name.into();
        let definition = definition.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = definition,
            None => self.entries.push((name, definition)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldDefinition> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Rename a field keeping its position. Returns `Ok(false)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::DuplicateField` if `to` is already taken.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<bool, ResolveError> {
        if from != to && self.contains(to) {
            return Err(ResolveError::DuplicateField {
                model: String::new(),
                field: to.to_string(),
            });
        }
        match self.entries.iter_mut().find(|(n, _)| n == from) {
            Some(entry) => {
                entry.0 = to.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set the title of a schema-defined field. Returns `false` otherwise.
    pub fn set_title(&mut self, name: &str, title: &str) -> bool {
        match self.get_mut(name).and_then(FieldDefinition::schema_mut) {
            Some(schema) => {
                schema.insert("title".into(), title.into());
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldDefinition> {
        self.entries.iter_mut().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }
}

/// Compiles schema objects into models and caches them.
///
/// Definitions are cached by name, anonymous inline schemas by their
/// canonical JSON. A model is cached as a placeholder before its fields are
/// built, so a request for a model that is still compiling returns the same
/// descriptor instead of a second one.
pub struct ModelsResolver {
    fields: Rc<FieldsResolver>,
    signals: Rc<Signals>,
    by_name: RefCell<HashMap<String, Rc<Model>>>,
    by_signature: RefCell<HashMap<String, Rc<Model>>>,
    order: RefCell<Vec<String>>,
    anonymous_seq: Cell<usize>,
}

impl fmt::Debug for ModelsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelsResolver")
            .field("models", &self.order.borrow())
            .finish()
    }
}

impl ModelsResolver {
    pub fn new(fields: Rc<FieldsResolver>, signals: Rc<Signals>) -> Self {
        Self {
            fields,
            signals,
            by_name: RefCell::new(HashMap::new()),
            by_signature: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            anonymous_seq: Cell::new(0),
        }
    }

    pub fn fields_resolver(&self) -> &FieldsResolver {
        &self.fields
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn document(&self) -> &Value {
        self.fields.document()
    }

    fn definitions(&self) -> Option<&Map<String, Value>> {
        self.document().get("definitions").and_then(Value::as_object)
    }

    /// Cached model by name, compiling a definition on first request.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidReference` if no definition has that
    /// name, or the error compiling it.
    pub fn get(&self, name: &str) -> Result<Rc<Model>, ResolveError> {
        if let Some(model) = self.by_name.borrow().get(name) {
            return Ok(Rc::clone(model));
        }
        let schema = self
            .definitions()
            .and_then(|definitions| definitions.get(name))
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ResolveError::InvalidReference {
                reference: format!("{}{}", DEFINITIONS_PREFIX, name),
            })?;
        self.compile(name, &schema, None)
    }

    /// Resolve a `#/definitions/<Name>` reference.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidReference` for references outside
    /// `definitions` or to missing definitions.
    pub fn by_reference_path(&self, reference: &str) -> Result<Rc<Model>, ResolveError> {
        let name = reference
            .strip_prefix(DEFINITIONS_PREFIX)
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .ok_or_else(|| ResolveError::InvalidReference {
                reference: reference.to_string(),
            })?;
        self.get(name).map_err(|e| match e {
            ResolveError::InvalidReference { .. } => ResolveError::InvalidReference {
                reference: reference.to_string(),
            },
            other => other,
        })
    }

    /// Compile a schema object, or return its cached model.
    ///
    /// Objects holding a `$ref` resolve the reference. Anonymous objects are
    /// cached by structure and named `NoNameModel<N>`.
    ///
    /// # Errors
    ///
    /// Returns the error resolving the reference or building a field.
    pub fn by_schema_object(&self, schema: &Map<String, Value>) -> Result<Rc<Model>, ResolveError> {
        if let Some(reference) = schema.get(REF_PROPERTY) {
            let reference = reference.as_str().ok_or_else(|| ResolveError::InvalidReference {
                reference: reference.to_string(),
            })?;
            return self.by_reference_path(reference);
        }

        let signature = signature(&Value::Object(schema.clone()));
        if let Some(model) = self.by_signature.borrow().get(&signature) {
            return Ok(Rc::clone(model));
        }
        let seq = self.anonymous_seq.get() + 1;
        self.anonymous_seq.set(seq);
        let name = format!("{}{}", ANONYMOUS_MODEL_PREFIX, seq);
        self.compile(&name, schema, Some(signature))
    }

    /// Compile every object definition, then emit `allModels.created`.
    ///
    /// # Errors
    ///
    /// Stops at the first definition that fails to compile.
    pub fn compile_all(&self) -> Result<Vec<Rc<Model>>, ResolveError> {
        let names: Vec<String> = self
            .definitions()
            .map(|definitions| {
                definitions
                    .iter()
                    .filter(|(_, schema)| is_object_definition(schema))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut models = Vec::with_capacity(names.len());
        for name in &names {
            models.push(self.get(name)?);
        }
        debug!(count = models.len(), "compiled all models");
        self.signals.emit_sticky(SCHEMA_MODELS_CREATED, &mut models);
        Ok(models)
    }

    /// Named models in compilation order (anonymous ones excluded).
    pub fn models(&self) -> Vec<Rc<Model>> {
        let by_name = self.by_name.borrow();
        self.order
            .borrow()
            .iter()
            .filter_map(|name| by_name.get(name).cloned())
            .collect()
    }

    fn compile(
        &self,
        name: &str,
        schema: &Map<String, Value>,
        signature: Option<String>,
    ) -> Result<Rc<Model>, ResolveError> {
        debug!(model = name, "compiling model");
        let model = Rc::new(Model::placeholder(name, schema));
        match &signature {
            Some(signature) => {
                self.by_signature
                    .borrow_mut()
                    .insert(signature.clone(), Rc::clone(&model));
            }
            None => {
                self.by_name
                    .borrow_mut()
                    .insert(name.to_string(), Rc::clone(&model));
                self.order.borrow_mut().push(name.to_string());
            }
        }

        match self.build_fields(name, schema) {
            Ok((fields, additional)) => {
                model.set_fields(fields, additional);
            }
            Err(e) => {
                self.forget(name, signature.as_deref());
                return Err(e);
            }
        }

        let mut created = Rc::clone(&model);
        self.signals.emit(&model_created(name), &mut created);
        Ok(model)
    }

    fn forget(&self, name: &str, signature: Option<&str>) {
        match signature {
            Some(signature) => {
                self.by_signature.borrow_mut().remove(signature);
            }
            None => {
                self.by_name.borrow_mut().remove(name);
                self.order.borrow_mut().retain(|n| n != name);
            }
        }
    }

    fn build_fields(
        &self,
        model: &str,
        schema: &Map<String, Value>,
    ) -> Result<(Vec<Rc<dyn Field>>, Option<Rc<dyn Field>>), ResolveError> {
        let mut mapping = field_definitions(model, schema)?;
        self.signals
            .emit(&model_fields_before_init(model), &mut mapping);

        let mut fields: Vec<Rc<dyn Field>> = Vec::with_capacity(mapping.len());
        for (name, definition) in mapping.entries {
            let field = self.build_field(&name, definition)?;
            if fields.iter().any(|f| f.name() == field.name()) {
                return Err(ResolveError::DuplicateField {
                    model: model.to_string(),
                    field: field.name().to_string(),
                });
            }
            fields.push(field);
        }

        let additional = match schema.get("additionalProperties") {
            Some(Value::Object(extra)) => Some(self.build_field(
                ADDITIONAL_PROPERTIES_FIELD_NAME,
                FieldDefinition::Schema(extra.clone()),
            )?),
            _ => None,
        };

        Ok((fields, additional))
    }

    /// Build one field. Object properties and arrays of objects that look
    /// like models become nested fields; everything else goes through the
    /// field registry.
    fn build_field(
        &self,
        name: &str,
        definition: FieldDefinition,
    ) -> Result<Rc<dyn Field>, ResolveError> {
        let FieldDefinition::Schema(schema) = definition else {
            return self.fields.resolve_field(definition, name);
        };
        if schema.contains_key("format") || schema.contains_key(X_FORMAT) {
            return self.fields.resolve_field(schema, name);
        }

        if let Some(slot) = ModelSlot::detect(&schema, self.document()) {
            let options = FieldOptions::from_schema(name, DataType::Object, &schema);
            return Ok(Rc::new(NestedObjectField::new(options, slot.compile(self)?)));
        }

        let is_array = schema.get("type").and_then(Value::as_str) == Some(DataType::Array.as_str());
        let item_slot = schema
            .get("items")
            .and_then(Value::as_object)
            .filter(|items| !items.contains_key("format") && !items.contains_key(X_FORMAT))
            .and_then(|items| ModelSlot::detect(items, self.document()));
        if let (true, Some(slot)) = (is_array, item_slot) {
            let options = FieldOptions::from_schema(name, DataType::Array, &schema);
            let items = ArrayItems::Model(slot.compile(self)?);
            return Ok(Rc::new(ArrayField::new(options, items)));
        }

        self.fields.resolve_field(schema, name)
    }
}

/// Property definitions of a schema object, with the object's `required`
/// list applied to each property.
fn field_definitions(
    model: &str,
    schema: &Map<String, Value>,
) -> Result<FieldsMapping, ResolveError> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut mapping = FieldsMapping::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(mapping);
    };

    for (name, property) in properties {
        let definition = match property {
            Value::Object(property) => {
                let mut property = property.clone();
                let is_list = property.get("required").is_some_and(Value::is_array);
                if required.contains(&name.as_str()) && !is_list {
                    property.insert("required".into(), Value::Bool(true));
                }
                FieldDefinition::Schema(property)
            }
            Value::String(definition) => FieldDefinition::Name(definition.clone()),
            other => {
                return Err(ResolveError::InvalidSchema {
                    message: format!(
                        "property {}.{} must be a schema object, got {}",
                        model, name, other
                    ),
                })
            }
        };
        mapping.insert(name.clone(), definition);
    }
    Ok(mapping)
}

fn is_object_definition(schema: &Value) -> bool {
    match schema.get("type").and_then(Value::as_str) {
        Some(t) => t == DataType::Object.as_str(),
        None => schema.get("properties").is_some_and(Value::is_object),
    }
}

/// Canonical JSON of a schema: object keys sorted at every level.
fn signature(value: &Value) -> String {
    fn canonical(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    sorted.insert(key.clone(), canonical(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }
    canonical(value).to_string()
}
