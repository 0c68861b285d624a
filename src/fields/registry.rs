//! Field type registry: (type, format) to field constructor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    ArrayField, BaseField, BooleanField, ChoicesField, DependFromFkField, DynamicField, Field,
    FieldDefinition, FieldOptions, FkField, JsonField, NumberField, StringField,
};
use crate::error::ResolveError;
use crate::loader::navigate_fragment;
use crate::types::{DataType, REF_PROPERTY, X_FORMAT};

/// Builds a field from its options.
///
/// The registry is passed along so constructors can resolve inner fields
/// (array items, for instance).
pub type FieldConstructor =
    Rc<dyn Fn(FieldOptions, &FieldsResolver) -> Result<Rc<dyn Field>, ResolveError>>;

type FormatTable = HashMap<Option<String>, FieldConstructor>;

/// Lookup table of field constructors keyed by data type and format.
///
/// `None` as format is the default constructor of a type. Registering the
/// same key again replaces the previous constructor.
pub struct FieldsResolver {
    document: Rc<Value>,
    types: RefCell<HashMap<DataType, FormatTable>>,
}

impl fmt::Debug for FieldsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.types.borrow();
        let mut formats: Vec<String> = types
            .iter()
            .flat_map(|(t, table)| {
                table.keys().map(move |format| match format {
                    Some(format) => format!("{}:{}", t, format),
                    None => t.to_string(),
                })
            })
            .collect();
        formats.sort();
        f.debug_struct("FieldsResolver")
            .field("formats", &formats)
            .finish()
    }
}

impl FieldsResolver {
    /// Create an empty registry. `document` is the schema `$ref`s point into.
    pub fn new(document: Rc<Value>) -> Self {
        Self {
            document,
            types: RefCell::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in fields registered.
    pub fn with_defaults(document: Rc<Value>) -> Self {
        let resolver = Self::new(document);
        add_default_fields(&resolver);
        resolver
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Register a constructor for `(data_type, format)`. Last registration wins.
    pub fn register_field<F>(&self, data_type: DataType, format: &str, constructor: F)
    where
        F: Fn(FieldOptions, &FieldsResolver) -> Result<Rc<dyn Field>, ResolveError> + 'static,
    {
        self.insert(data_type, Some(format.to_string()), Rc::new(constructor));
    }

    /// Register the constructor used when a type has no matching format.
    pub fn register_default_for_type<F>(&self, data_type: DataType, constructor: F)
    where
        F: Fn(FieldOptions, &FieldsResolver) -> Result<Rc<dyn Field>, ResolveError> + 'static,
    {
        self.insert(data_type, None, Rc::new(constructor));
    }

    fn insert(&self, data_type: DataType, format: Option<String>, constructor: FieldConstructor) {
        self.types
            .borrow_mut()
            .entry(data_type)
            .or_default()
            .insert(format, constructor);
    }

    pub fn has_format(&self, data_type: DataType, format: &str) -> bool {
        self.types
            .borrow()
            .get(&data_type)
            .is_some_and(|table| table.contains_key(&Some(format.to_string())))
    }

    /// Registered formats of a type, sorted.
    pub fn formats(&self, data_type: DataType) -> Vec<String> {
        let mut formats: Vec<String> = self
            .types
            .borrow()
            .get(&data_type)
            .map(|table| table.keys().flatten().cloned().collect())
            .unwrap_or_default();
        formats.sort();
        formats
    }

    /// First data type (in [`DataType::ALL`] order) registering `format`.
    fn type_for_format(&self, format: &str) -> Option<DataType> {
        DataType::ALL
            .into_iter()
            .find(|t| self.has_format(*t, format))
    }

    fn constructor(&self, data_type: DataType, format: Option<&str>) -> Option<FieldConstructor> {
        let types = self.types.borrow();
        let table = types.get(&data_type)?;
        if let Some(format) = format {
            if let Some(constructor) = table.get(&Some(format.to_string())) {
                return Some(Rc::clone(constructor));
            }
        }
        table.get(&None).cloned()
    }

    /// Create a field from a definition.
    ///
    /// Field instances are returned as is. Strings name a data type or a
    /// registered format. Schema objects may carry a `$ref`, which is merged
    /// in (local keys win). An empty `name` is taken from the schema's
    /// `name` key.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::FormatNotFound` if the type is unknown or
    /// neither the format nor a default is registered for it, and
    /// `ResolveError::MissingFieldName` if no name is available.
    pub fn resolve_field(
        &self,
        definition: impl Into<FieldDefinition>,
        name: &str,
    ) -> Result<Rc<dyn Field>, ResolveError> {
        let schema = match definition.into() {
            FieldDefinition::Field(field) => return Ok(field),
            FieldDefinition::Name(name) => self.schema_for_name(&name),
            FieldDefinition::Schema(schema) => schema,
        };

        let name = if name.is_empty() {
            match schema.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    return Err(ResolveError::MissingFieldName {
                        definition: Value::Object(schema).to_string(),
                    })
                }
            }
        } else {
            name.to_string()
        };

        let schema = self.normalize(schema)?;
        let type_name = schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(DataType::String.as_str())
            .to_string();
        let format = schema
            .get("format")
            .and_then(Value::as_str)
            .map(String::from);

        let Some(data_type) = DataType::parse(&type_name) else {
            return Err(ResolveError::FormatNotFound {
                data_type: type_name,
                format,
            });
        };

        let Some(constructor) = self.constructor(data_type, format.as_deref()) else {
            return Err(ResolveError::FormatNotFound {
                data_type: type_name,
                format,
            });
        };
        if let Some(format) = &format {
            if !self.has_format(data_type, format) {
                warn!(field = %name, %data_type, format = %format, "unknown format, using default field");
            }
        }

        debug!(field = %name, %data_type, format = ?format, "resolving field");
        let options = FieldOptions::from_schema(&name, data_type, &schema);
        constructor(options, self)
    }

    /// Schema for a bare type name or format.
    pub(crate) fn schema_for_name(&self, name: &str) -> Map<String, Value> {
        let mut schema = Map::new();
        if let Some(data_type) = DataType::parse(name) {
            schema.insert("type".into(), data_type.as_str().into());
        } else if let Some(data_type) = self.type_for_format(name) {
            schema.insert("type".into(), data_type.as_str().into());
            schema.insert("format".into(), name.into());
        } else {
            warn!(definition = name, "cannot detect field from string, using string field");
            schema.insert("type".into(), DataType::String.as_str().into());
        }
        schema
    }

    /// Merge `$ref`, apply `x-format`, guess the type and detect choices.
    fn normalize(&self, mut schema: Map<String, Value>) -> Result<Map<String, Value>, ResolveError> {
        if let Some(reference) = schema.remove(REF_PROPERTY) {
            let reference = reference.as_str().ok_or_else(|| ResolveError::InvalidReference {
                reference: reference.to_string(),
            })?;
            if let Value::Object(target) = navigate_fragment(&self.document, reference)? {
                for (key, value) in target {
                    schema.entry(key).or_insert(value);
                }
            }
        }

        if !schema.contains_key("format") {
            let x_format = schema
                .get(X_FORMAT)
                .or_else(|| schema.get("items").and_then(|items| items.get(X_FORMAT)))
                .cloned();
            if let Some(format) = x_format {
                schema.insert("format".into(), format);
            }
        }

        if !schema.contains_key("type") {
            if let Some(format) = schema.get("format").and_then(Value::as_str).map(String::from) {
                if let Some(data_type) = DataType::parse(&format) {
                    schema.insert("type".into(), data_type.as_str().into());
                    schema.remove("format");
                } else if let Some(data_type) = self.type_for_format(&format) {
                    schema.insert("type".into(), data_type.as_str().into());
                }
            }
        }

        let enum_type = schema
            .get("type")
            .and_then(Value::as_str)
            .and_then(DataType::parse)
            .is_some_and(|t| t.supports_enum());
        if enum_type && !schema.contains_key("format") && schema.contains_key("enum") {
            schema.insert("format".into(), "choices".into());
        }

        Ok(schema)
    }
}

fn shared<F: Field + 'static>(field: F) -> Result<Rc<dyn Field>, ResolveError> {
    Ok(Rc::new(field))
}

/// Register the built-in fields.
pub fn add_default_fields(resolver: &FieldsResolver) {
    use crate::types::DataType::*;

    resolver.register_default_for_type(String, |o, _| shared(StringField::new(o)));
    for kind in ["text", "textarea", "html", "password"] {
        resolver.register_field(String, kind, move |o, _| {
            shared(StringField::with_kind(o, kind))
        });
    }
    resolver.register_field(String, "email", |o, _| shared(StringField::email(o)));
    resolver.register_field(String, "color", |o, _| shared(StringField::color(o)));
    resolver.register_field(String, "uri", |o, _| shared(StringField::uri(o)));
    resolver.register_field(String, "uuid", |o, _| shared(StringField::uuid(o)));
    resolver.register_field(String, "phone", |o, _| shared(StringField::phone(o)));
    resolver.register_field(String, "date", |o, _| shared(StringField::date(o)));
    resolver.register_field(String, "date-time", |o, _| shared(StringField::date_time(o)));
    resolver.register_field(String, "json", |o, _| shared(JsonField::new(o)));

    resolver.register_default_for_type(Number, |o, _| shared(NumberField::new(o)));
    resolver.register_field(Number, "rating", |o, _| shared(NumberField::rating(o)));
    resolver.register_default_for_type(Integer, |o, _| shared(NumberField::new(o)));
    resolver.register_field(Integer, "rating", |o, _| shared(NumberField::rating(o)));

    for data_type in [String, Number, Integer] {
        resolver.register_field(data_type, "choices", |o, _| shared(ChoicesField::new(o)));
        resolver.register_field(data_type, "fk", |o, _| shared(FkField::new(o)?));
    }

    resolver.register_default_for_type(Boolean, |o, _| shared(BooleanField::new(o)));
    resolver.register_default_for_type(Object, |o, _| shared(JsonField::new(o)));
    resolver.register_field(Object, "json", |o, _| shared(JsonField::new(o)));
    resolver.register_default_for_type(Array, |o, r| shared(ArrayField::from_items(o, r)?));
    resolver.register_default_for_type(File, |o, _| shared(BaseField::new(o, "file")));

    for data_type in DataType::ALL {
        resolver.register_field(data_type, "dynamic", |o, _| shared(DynamicField::new(o)?));
        resolver.register_field(data_type, "dynamic_fk", |o, _| {
            shared(DependFromFkField::new(o)?)
        });
    }
}
