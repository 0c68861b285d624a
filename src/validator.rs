//! Payload validation: field-level through a model, and JSON Schema.

use serde_json::{Map, Value};

use crate::app::App;
use crate::error::{ResolveError, SchemaError, ValidateError};
use crate::types::Record;

/// Formats whose declared `type` does not constrain the value.
const UNTYPED_FORMATS: [&str; 2] = ["dynamic", "dynamic_fk"];

/// Validate a payload against a model of `app`.
///
/// The payload is first validated field by field (the same checks forms
/// run), then against the model's JSON Schema with the document's
/// `definitions` in scope. Returns the accepted record.
///
/// # Errors
///
/// Returns `ValidateError::Resolve` for unknown models,
/// `ValidateError::Model` for field errors, or
/// `ValidateError::Invalid` if the payload doesn't match the schema.
pub fn validate_record(app: &App, model: &str, payload: &Value) -> Result<Record, ValidateError> {
    let model = app.model(model)?;
    let Value::Object(record) = payload else {
        return Err(ValidateError::Invalid {
            errors: vec![SchemaError {
                path: String::new(),
                message: format!("{} payload must be an object", model.name()),
            }],
        });
    };

    let accepted = model
        .validate(record, &app.context())
        .map_err(ValidateError::Model)?;

    let mut schema = json_schema_for(model.schema());
    if let Some(definitions) = app.document().get("definitions") {
        if let Value::Object(schema) = &mut schema {
            schema.insert("definitions".into(), definitions.clone());
        }
    }
    validate_against_schema(&schema, payload)?;
    Ok(accepted)
}

/// JSON Schema of a model: dynamic properties accept anything and
/// `x-nullable` properties accept null.
fn json_schema_for(schema: &Map<String, Value>) -> Value {
    let mut schema = schema.clone();
    if let Some(Value::Object(properties)) = schema.get_mut("properties") {
        for property in properties.values_mut() {
            let Value::Object(prop) = property else {
                continue;
            };
            let format = prop.get("format").and_then(Value::as_str);
            if format.is_some_and(|f| UNTYPED_FORMATS.contains(&f)) {
                *property = Value::Object(Map::new());
                continue;
            }
            let nullable = prop.get("x-nullable").and_then(Value::as_bool).unwrap_or(false);
            if let (true, Some(Value::String(t))) = (nullable, prop.get("type")) {
                let types = Value::Array(vec![Value::String(t.clone()), "null".into()]);
                prop.insert("type".into(), types);
            }
        }
    }
    Value::Object(schema)
}

/// Validate a payload against a JSON Schema.
///
/// Use this when you already hold the schema and want to validate
/// multiple payloads against it.
///
/// # Errors
///
/// Returns `ValidateError::Resolve` if the schema itself is invalid, or
/// `ValidateError::Invalid` with every violation otherwise.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        ValidateError::Resolve(ResolveError::InvalidSchema {
            message: e.to_string(),
        })
    })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(payload)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}
