//! Foreign key field.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{Field, FieldContext, FieldOptions};
use crate::error::ResolveError;
use crate::models::Model;
use crate::types::{Record, REF_PROPERTY};

const DEFAULT_VALUE_FIELD: &str = "id";

/// Field pointing at an instance of another model.
///
/// The target model is declared in `x-options.model` (usually a `$ref`) and
/// is looked up on first use, so it may be defined after the field. Before
/// the field is used on a view, [`Field::prepare_for_view`] finds the list
/// view the related instances are fetched from.
pub struct FkField {
    options: FieldOptions,
    value_field: String,
    view_field: String,
    model: Option<Map<String, Value>>,
    list_paths: Option<Vec<String>>,
    querysets: RefCell<HashMap<String, Vec<String>>>,
}

impl std::fmt::Debug for FkField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FkField")
            .field("name", &self.options.name)
            .field("value_field", &self.value_field)
            .field("view_field", &self.view_field)
            .field("model", &self.model_reference())
            .finish()
    }
}

impl FkField {
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidField` if `x-options.model` is not an
    /// object or `list_paths` is not a list of strings.
    pub fn new(options: FieldOptions) -> Result<Self, ResolveError> {
        let invalid = |message: &str| ResolveError::InvalidField {
            field: options.name.clone(),
            message: message.to_string(),
        };

        let value_field = options
            .x_option_str("value_field")
            .unwrap_or(DEFAULT_VALUE_FIELD)
            .to_string();
        let view_field = options
            .x_option_str("view_field")
            .map(String::from)
            .unwrap_or_else(|| value_field.clone());

        let model = match options.x_option("model") {
            None | Some(Value::Null) => None,
            Some(Value::Object(model)) => Some(model.clone()),
            Some(_) => return Err(invalid("x-options.model must be a schema object")),
        };

        let list_paths = match options.x_option("list_paths") {
            None | Some(Value::Null) => None,
            Some(Value::Array(paths)) => Some(
                paths
                    .iter()
                    .map(|p| p.as_str().map(String::from))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| invalid("x-options.list_paths must be a list of paths"))?,
            ),
            Some(_) => return Err(invalid("x-options.list_paths must be a list of paths")),
        };

        if model.is_none() && list_paths.is_none() {
            return Err(invalid("either x-options.model or x-options.list_paths is required"));
        }

        Ok(Self {
            options,
            value_field,
            view_field,
            model,
            list_paths,
            querysets: RefCell::new(HashMap::new()),
        })
    }

    pub fn value_field(&self) -> &str {
        &self.value_field
    }

    pub fn view_field(&self) -> &str {
        &self.view_field
    }

    /// The declared `$ref` of the target model, if any.
    pub fn model_reference(&self) -> Option<&str> {
        self.model
            .as_ref()
            .and_then(|m| m.get(REF_PROPERTY))
            .and_then(Value::as_str)
    }

    /// Resolve the target model.
    ///
    /// # Errors
    ///
    /// Fails if the declared model cannot be compiled, or when only
    /// `list_paths` are declared and no list view serves them yet.
    pub fn fk_model(&self, ctx: &FieldContext<'_>) -> Result<Rc<Model>, ResolveError> {
        if let Some(model) = &self.model {
            return ctx.models().by_schema_object(model);
        }
        let list_model = self
            .list_paths
            .as_ref()
            .and_then(|paths| paths.first())
            .and_then(|path| ctx.views()?.get(path))
            .and_then(|view| view.list_model());
        match list_model {
            Some(model) => Ok(Rc::clone(model)),
            None => Err(ResolveError::InvalidField {
                field: self.options.name.clone(),
                message: "FK model is not initialized".to_string(),
            }),
        }
    }

    /// List views prepared for `path`.
    pub fn list_paths_for(&self, path: &str) -> Option<Vec<String>> {
        self.querysets.borrow().get(path).cloned()
    }

    /// The display value of a related instance (or the raw value).
    pub fn view_field_value(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Object(instance) => instance.get(&self.view_field).cloned(),
            other => Some(other.clone()),
        }
    }

    fn reduce(&self, value: Value) -> Value {
        match value {
            Value::Object(instance) => instance
                .get(&self.value_field)
                .cloned()
                .unwrap_or(Value::Null),
            other => other,
        }
    }
}

impl Field for FkField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "fk"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data).map(|v| self.reduce(v))
    }

    fn prepare_for_view(&self, path: &str, ctx: &FieldContext<'_>) -> Result<(), ResolveError> {
        if self.querysets.borrow().contains_key(path) {
            return Ok(());
        }
        let views = ctx.views().ok_or_else(|| ResolveError::InvalidSchema {
            message: format!("views are not built, cannot prepare field {}", self.options.name),
        })?;

        let found = match &self.list_paths {
            Some(paths) => {
                for list_path in paths {
                    if views.get(list_path).is_none() {
                        return Err(ResolveError::InvalidField {
                            field: self.options.name.clone(),
                            message: format!("list path {} does not exist", list_path),
                        });
                    }
                }
                paths.clone()
            }
            None => {
                let model = self.fk_model(ctx)?;
                let view = views.find_list_view(model.name(), path)?;
                vec![view.path().to_string()]
            }
        };

        debug!(field = %self.options.name, path, lists = ?found, "prepared fk field");
        self.querysets.borrow_mut().insert(path.to_string(), found);
        Ok(())
    }
}
