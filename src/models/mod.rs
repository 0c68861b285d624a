//! Model descriptors compiled from schema objects.

mod resolver;

use std::cell::OnceCell;
use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ModelValidationError, ResolveError};
use crate::fields::{single_value_record, Field, FieldContext};
use crate::types::{DisplayMode, Record};

pub use resolver::{FieldsMapping, ModelsResolver, ADDITIONAL_PROPERTIES_FIELD_NAME};

/// Named group of fields, used to lay out forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldsGroup {
    pub title: String,
    pub fields: Vec<String>,
}

/// Compiled representation of a schema object.
///
/// A model is created as a placeholder and registered in the resolver
/// caches before its fields are built, so references back to it (direct or
/// through other models) find it instead of compiling it again. Its fields
/// are set exactly once.
#[derive(Debug)]
pub struct Model {
    name: String,
    schema: Map<String, Value>,
    fields: OnceCell<Vec<Rc<dyn Field>>>,
    additional_properties: OnceCell<Option<Rc<dyn Field>>>,
    groups: OnceCell<Vec<FieldsGroup>>,
    display_mode: DisplayMode,
    view_field_name: Option<String>,
    pk_field_name: Option<String>,
    non_bulk_methods: Vec<String>,
    translate_model: Option<String>,
    hide_not_required: bool,
    visibility_data_field_name: Option<String>,
}

fn extension_str(schema: &Map<String, Value>, key: &str) -> Option<String> {
    schema.get(key).and_then(Value::as_str).map(String::from)
}

impl Model {
    /// Create a model without fields.
    pub(crate) fn placeholder(name: &str, schema: &Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            display_mode: DisplayMode::from_schema(name, schema.get("x-display-mode")),
            view_field_name: extension_str(schema, "x-view-field-name"),
            pk_field_name: extension_str(schema, "x-pk-field-name"),
            non_bulk_methods: schema
                .get("x-non-bulk-methods")
                .and_then(Value::as_array)
                .map(|methods| {
                    methods
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            translate_model: extension_str(schema, "x-translate-model"),
            hide_not_required: schema
                .get("x-hide-not-required")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            visibility_data_field_name: extension_str(schema, "x-visibility-data-field-name"),
            schema: schema.clone(),
            fields: OnceCell::new(),
            additional_properties: OnceCell::new(),
            groups: OnceCell::new(),
        }
    }

    /// Freeze the field list. Returns `false` if fields were already set.
    pub(crate) fn set_fields(
        &self,
        fields: Vec<Rc<dyn Field>>,
        additional_properties: Option<Rc<dyn Field>>,
    ) -> bool {
        let set = self.fields.set(fields).is_ok();
        let _ = self.additional_properties.set(additional_properties);
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema object the model was compiled from.
    pub fn schema(&self) -> &Map<String, Value> {
        &self.schema
    }

    /// Whether the field list is built (placeholders are not).
    pub fn is_ready(&self) -> bool {
        self.fields.get().is_some()
    }

    /// Fields in declaration order. Empty while the model is a placeholder.
    pub fn fields(&self) -> &[Rc<dyn Field>] {
        self.fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field(&self, name: &str) -> Option<&Rc<dyn Field>> {
        self.fields().iter().find(|f| f.name() == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields().iter().map(|f| f.name()).collect()
    }

    /// Field validating values of undeclared keys (`additionalProperties`).
    pub fn additional_properties(&self) -> Option<&Rc<dyn Field>> {
        self.additional_properties.get().and_then(Option::as_ref)
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Primary key field: `x-pk-field-name`, else `id` or `pk`, else the first field.
    pub fn pk_field_name(&self) -> Option<&str> {
        if let Some(name) = &self.pk_field_name {
            return Some(name);
        }
        ["id", "pk"]
            .into_iter()
            .find_map(|name| self.field(name).map(|f| f.name()))
            .or_else(|| self.fields().first().map(|f| f.name()))
    }

    /// Field naming an instance: `x-view-field-name`, else `name`, else the pk.
    pub fn view_field_name(&self) -> Option<&str> {
        if let Some(name) = &self.view_field_name {
            return Some(name);
        }
        match self.field("name") {
            Some(field) => Some(field.name()),
            None => self.pk_field_name(),
        }
    }

    pub fn non_bulk_methods(&self) -> &[String] {
        &self.non_bulk_methods
    }

    pub fn translate_model(&self) -> Option<&str> {
        self.translate_model.as_deref()
    }

    pub fn hide_not_required(&self) -> bool {
        self.hide_not_required
    }

    pub fn visibility_data_field_name(&self) -> Option<&str> {
        self.visibility_data_field_name.as_deref()
    }

    /// Fields grouped by `x-properties-groups`, or by each field's `x-group`.
    ///
    /// Computed on first call. Fields without a group land in a group with
    /// an empty title.
    pub fn fields_groups(&self) -> &[FieldsGroup] {
        self.groups.get_or_init(|| self.compute_groups())
    }

    fn compute_groups(&self) -> Vec<FieldsGroup> {
        if let Some(declared) = self.schema.get("x-properties-groups").and_then(Value::as_object) {
            return declared
                .iter()
                .map(|(title, names)| FieldsGroup {
                    title: title.clone(),
                    fields: names
                        .as_array()
                        .map(|names| {
                            names
                                .iter()
                                .filter_map(Value::as_str)
                                .filter(|name| self.field(name).is_some())
                                .map(String::from)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect();
        }

        let mut groups: Vec<FieldsGroup> = Vec::new();
        for field in self.fields() {
            let title = field
                .options()
                .schema
                .get("x-group")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match groups.iter_mut().find(|g| g.title == title) {
                Some(group) => group.fields.push(field.name().to_string()),
                None => groups.push(FieldsGroup {
                    title: title.to_string(),
                    fields: vec![field.name().to_string()],
                }),
            }
        }
        groups
    }

    fn is_declared(&self, key: &str) -> bool {
        self.field(key).is_some()
    }

    fn convert(&self, data: &Record, op: impl Fn(&dyn Field, &Record) -> Option<Value>) -> Record {
        let mut out = Map::new();
        for field in self.fields() {
            if let Some(value) = op(field.as_ref(), data) {
                out.insert(field.name().to_string(), value);
            }
        }
        if let Some(extra) = self.additional_properties() {
            for (key, value) in data.iter().filter(|(k, _)| !self.is_declared(k)) {
                let record = single_value_record(extra.name(), value.clone());
                if let Some(value) = op(extra.as_ref(), &record) {
                    out.insert(key.clone(), value);
                }
            }
        }
        out
    }

    /// Convert a display record into its wire form.
    pub fn to_inner(&self, data: &Record, ctx: &FieldContext<'_>) -> Record {
        self.convert(data, |field, record| field.to_inner(record, ctx))
    }

    /// Convert a wire record into its display form.
    pub fn to_represent(&self, data: &Record, ctx: &FieldContext<'_>) -> Record {
        self.convert(data, |field, record| field.to_represent(record, ctx))
    }

    /// Validate a display record field by field.
    ///
    /// # Errors
    ///
    /// Returns every failing field in a [`ModelValidationError`].
    pub fn validate(
        &self,
        data: &Record,
        ctx: &FieldContext<'_>,
    ) -> Result<Record, ModelValidationError> {
        let mut accepted = Map::new();
        let mut errors = Vec::new();

        for field in self.fields() {
            match field.validate_value(data, ctx) {
                Ok(Some(value)) => {
                    accepted.insert(field.name().to_string(), value);
                }
                Ok(None) => {}
                Err(e) => errors.push((field.name().to_string(), e)),
            }
        }
        if let Some(extra) = self.additional_properties() {
            for (key, value) in data.iter().filter(|(k, _)| !self.is_declared(k)) {
                let record = single_value_record(extra.name(), value.clone());
                match extra.validate_value(&record, ctx) {
                    Ok(Some(value)) => {
                        accepted.insert(key.clone(), value);
                    }
                    Ok(None) => {}
                    Err(e) => errors.push((key.clone(), e)),
                }
            }
        }

        if errors.is_empty() {
            Ok(accepted)
        } else {
            Err(ModelValidationError {
                model: self.name.clone(),
                errors,
            })
        }
    }

    /// Prepare every field for the view at `path`.
    ///
    /// # Errors
    ///
    /// Returns the first field error, e.g. `ResolveError::ModelNotFound`
    /// for a foreign key without a list view.
    pub fn prepare_for_view(&self, path: &str, ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        for field in self.fields() {
            field.prepare_for_view(path, ctx)?;
        }
        Ok(())
    }
}
