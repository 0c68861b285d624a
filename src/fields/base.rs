//! Scalar fields: text, numbers, booleans, choices and JSON.

use std::any::Any;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use url::Url;
use uuid::Uuid;

use super::{Field, FieldContext, FieldOptions};
use crate::error::FieldError;
use crate::types::{DataType, Record};

/// Common validation shared by every field.
///
/// Checks length bounds of strings, value bounds of numbers and emptiness.
/// A missing value of a required string counts as an empty string.
///
/// # Errors
///
/// Returns the first [`FieldError`] the value violates.
pub fn validate_base(
    options: &FieldOptions,
    value: Option<Value>,
) -> Result<Option<Value>, FieldError> {
    let mut value = value;
    if value.is_none() && options.required && options.data_type == DataType::String {
        value = Some(Value::String(String::new()));
    }

    match &value {
        Some(Value::String(s)) => {
            let len = s.chars().count() as u64;
            if let Some(max) = options.schema_u64("maxLength") {
                if len > max {
                    return Err(FieldError::MaxLength(max));
                }
            }
            if let Some(min) = options.schema_u64("minLength") {
                if len == 0 {
                    if !options.required {
                        return Ok(value);
                    }
                    return Err(FieldError::Empty);
                }
                if len < min {
                    return Err(FieldError::MinLength(min));
                }
            }
        }
        Some(Value::Number(n)) => {
            if let Some(n) = n.as_f64() {
                check_bounds(
                    n,
                    options.schema_f64("minimum"),
                    options.schema_f64("maximum"),
                )?;
            }
        }
        _ => {}
    }

    let missing = value.is_none() && options.required && options.default.is_none();
    let null = matches!(value, Some(Value::Null)) && !options.nullable;
    if missing || null {
        return Err(FieldError::Empty);
    }
    Ok(value)
}

fn check_bounds(value: f64, minimum: Option<f64>, maximum: Option<f64>) -> Result<(), FieldError> {
    if let Some(max) = maximum {
        if value > max {
            return Err(FieldError::Maximum(max));
        }
    }
    if let Some(min) = minimum {
        if value < min {
            return Err(FieldError::Minimum(min));
        }
    }
    Ok(())
}

/// Field without any conversion, used for files and unknown kinds.
#[derive(Debug)]
pub struct BaseField {
    options: FieldOptions,
    kind: &'static str,
}

impl BaseField {
    pub fn new(options: FieldOptions, kind: &'static str) -> Self {
        Self { options, kind }
    }
}

impl Field for BaseField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shape check applied to non-empty string values.
pub type TextCheck = fn(&str) -> Result<(), String>;

/// String field, optionally constrained by a shape check.
#[derive(Debug)]
pub struct StringField {
    options: FieldOptions,
    kind: &'static str,
    check: Option<TextCheck>,
}

impl StringField {
    pub fn new(options: FieldOptions) -> Self {
        Self {
            options,
            kind: "string",
            check: None,
        }
    }

    /// A string field of another kind (`"textarea"`, `"password"`...).
    pub fn with_kind(options: FieldOptions, kind: &'static str) -> Self {
        Self {
            options,
            kind,
            check: None,
        }
    }

    pub fn checked(options: FieldOptions, kind: &'static str, check: TextCheck) -> Self {
        Self {
            options,
            kind,
            check: Some(check),
        }
    }

    pub fn email(options: FieldOptions) -> Self {
        Self::checked(options, "email", check_email)
    }

    pub fn color(options: FieldOptions) -> Self {
        Self::checked(options, "color", check_color)
    }

    pub fn uri(options: FieldOptions) -> Self {
        Self::checked(options, "uri", check_uri)
    }

    pub fn uuid(options: FieldOptions) -> Self {
        Self::checked(options, "uuid", check_uuid)
    }

    pub fn phone(options: FieldOptions) -> Self {
        Self::checked(options, "phone", check_phone)
    }

    pub fn date(options: FieldOptions) -> Self {
        Self::checked(options, "date", check_date)
    }

    pub fn date_time(options: FieldOptions) -> Self {
        Self::checked(options, "date-time", check_date_time)
    }
}

impl Field for StringField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data))?;
        if let (Some(check), Some(Value::String(s))) = (self.check, &value) {
            if !s.is_empty() {
                check(s).map_err(FieldError::Invalid)?;
            }
        }
        Ok(value)
    }
}

fn check_email(s: &str) -> Result<(), String> {
    let valid = match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err("Enter a valid email address.".to_string())
    }
}

fn check_color(s: &str) -> Result<(), String> {
    let valid = s
        .strip_prefix('#')
        .map(|hex| (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(format!("\"{}\" is not a valid color.", s))
    }
}

fn check_uri(s: &str) -> Result<(), String> {
    Url::parse(s)
        .map(|_| ())
        .map_err(|_| "Enter a valid URL.".to_string())
}

fn check_uuid(s: &str) -> Result<(), String> {
    Uuid::parse_str(s)
        .map(|_| ())
        .map_err(|_| "Enter a valid UUID.".to_string())
}

fn check_phone(s: &str) -> Result<(), String> {
    let body = s.strip_prefix('+').unwrap_or(s);
    let digits = body.chars().filter(char::is_ascii_digit).count();
    let valid = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
        && (5..=20).contains(&digits);
    if valid {
        Ok(())
    } else {
        Err("Enter a valid phone number.".to_string())
    }
}

fn check_date(s: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| "Enter a valid date (YYYY-MM-DD).".to_string())
}

/// RFC 3339 timestamps, or a local time without offset.
fn check_date_time(s: &str) -> Result<(), String> {
    const LOCAL_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    let valid = DateTime::parse_from_rfc3339(s).is_ok()
        || LOCAL_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(s, format).is_ok());
    if valid {
        Ok(())
    } else {
        Err("Enter a valid date and time.".to_string())
    }
}

/// Integer and number fields.
///
/// Numeric strings are converted to numbers in both directions.
#[derive(Debug)]
pub struct NumberField {
    options: FieldOptions,
    kind: &'static str,
    bounds: (Option<f64>, Option<f64>),
}

impl NumberField {
    pub fn new(options: FieldOptions) -> Self {
        let kind = match options.data_type {
            DataType::Integer => "integer",
            _ => "number",
        };
        Self {
            options,
            kind,
            bounds: (None, None),
        }
    }

    /// Rating field: bounded by `x-options.min_value` and `max_value` (0 to 5 by default).
    pub fn rating(options: FieldOptions) -> Self {
        let min = options
            .x_option("min_value")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let max = options
            .x_option("max_value")
            .and_then(Value::as_f64)
            .unwrap_or(5.0);
        Self {
            options,
            kind: "rating",
            bounds: (Some(min), Some(max)),
        }
    }

    fn convert(&self, value: Value) -> Value {
        match value {
            Value::String(s) => parse_number(s.trim(), self.options.data_type).unwrap_or(Value::String(s)),
            other => other,
        }
    }
}

fn parse_number(s: &str, data_type: DataType) -> Option<Value> {
    if data_type == DataType::Integer {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

impl Field for NumberField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data).map(|v| self.convert(v))
    }

    fn to_represent(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data).map(|v| self.convert(v))
    }

    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = self.value(data).map(|v| self.convert(v));
        let value = validate_base(&self.options, value)?;
        match &value {
            Some(Value::String(s)) if !s.is_empty() => {
                return Err(FieldError::Invalid("Value must be a number.".to_string()));
            }
            Some(Value::Number(n)) => {
                if self.options.data_type == DataType::Integer && !(n.is_i64() || n.is_u64()) {
                    return Err(FieldError::Invalid("Value must be an integer.".to_string()));
                }
                if let Some(n) = n.as_f64() {
                    check_bounds(n, self.bounds.0, self.bounds.1)?;
                }
            }
            _ => {}
        }
        Ok(value)
    }
}

/// Boolean field; accepts `"true"` and `"false"` strings.
#[derive(Debug)]
pub struct BooleanField {
    options: FieldOptions,
}

impl BooleanField {
    pub fn new(options: FieldOptions) -> Self {
        Self { options }
    }

    fn convert(value: Value) -> Value {
        match &value {
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => value,
        }
    }
}

impl Field for BooleanField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "boolean"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data).map(Self::convert)
    }

    fn to_represent(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        self.value(data).map(Self::convert)
    }

    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data).map(Self::convert))?;
        match &value {
            None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(value),
            Some(_) => Err(FieldError::Invalid("Value must be a boolean.".to_string())),
        }
    }
}

/// Field restricted to a fixed list of values.
///
/// Choices come from the `enum` keyword or `x-options.enum`.
#[derive(Debug)]
pub struct ChoicesField {
    options: FieldOptions,
    choices: Vec<Value>,
}

impl ChoicesField {
    pub fn new(options: FieldOptions) -> Self {
        let choices = options
            .schema
            .get("enum")
            .or_else(|| options.x_option("enum"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Self { options, choices }
    }

    pub fn choices(&self) -> &[Value] {
        &self.choices
    }
}

impl Field for ChoicesField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "choices"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data))?;
        match &value {
            None | Some(Value::Null) => Ok(value),
            Some(Value::String(s)) if s.is_empty() => Ok(value),
            Some(v) if self.choices.is_empty() || self.choices.contains(v) => Ok(value),
            Some(v) => {
                let allowed: Vec<String> = self
                    .choices
                    .iter()
                    .map(|c| c.as_str().map(String::from).unwrap_or_else(|| c.to_string()))
                    .collect();
                Err(FieldError::Invalid(format!(
                    "{} is not one of: {}.",
                    v,
                    allowed.join(", ")
                )))
            }
        }
    }
}

/// Free-form JSON field.
///
/// On string-typed properties the wire form is serialized JSON text.
#[derive(Debug)]
pub struct JsonField {
    options: FieldOptions,
}

impl JsonField {
    pub fn new(options: FieldOptions) -> Self {
        Self { options }
    }
}

impl Field for JsonField {
    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn kind(&self) -> &str {
        "json"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_inner(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        let value = self.value(data)?;
        if self.options.data_type == DataType::String && !value.is_string() && !value.is_null() {
            return Some(Value::String(value.to_string()));
        }
        Some(value)
    }

    fn to_represent(&self, data: &Record, _ctx: &FieldContext<'_>) -> Option<Value> {
        match self.value(data)? {
            Value::String(s) => Some(serde_json::from_str(&s).unwrap_or(Value::String(s))),
            other => Some(other),
        }
    }

    fn validate_value(
        &self,
        data: &Record,
        _ctx: &FieldContext<'_>,
    ) -> Result<Option<Value>, FieldError> {
        let value = validate_base(&self.options, self.value(data))?;
        if let Some(Value::String(s)) = &value {
            if !s.is_empty() && serde_json::from_str::<Value>(s).is_err() {
                return Err(FieldError::Invalid("Enter valid JSON.".to_string()));
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(name: &str, data_type: DataType, schema: Value) -> FieldOptions {
        FieldOptions::from_schema(name, data_type, schema.as_object().unwrap())
    }

    #[test]
    fn required_string_missing_is_empty() {
        let opts = options("name", DataType::String, json!({"required": true, "minLength": 1}));
        assert_eq!(validate_base(&opts, None), Err(FieldError::Empty));
    }

    #[test]
    fn required_string_without_min_length_accepts_blank() {
        let opts = options("name", DataType::String, json!({"required": true}));
        assert_eq!(validate_base(&opts, None), Ok(Some(json!(""))));
    }

    #[test]
    fn optional_missing_is_fine() {
        let opts = options("size", DataType::Integer, json!({}));
        assert_eq!(validate_base(&opts, None), Ok(None));
    }

    #[test]
    fn required_with_default_is_fine() {
        let opts = options("size", DataType::Integer, json!({"required": true, "default": 3}));
        assert_eq!(validate_base(&opts, None), Ok(None));
    }

    #[test]
    fn null_requires_nullable() {
        let opts = options("size", DataType::Integer, json!({}));
        assert_eq!(validate_base(&opts, Some(Value::Null)), Err(FieldError::Empty));

        let opts = options("size", DataType::Integer, json!({"x-nullable": true}));
        assert_eq!(validate_base(&opts, Some(Value::Null)), Ok(Some(Value::Null)));
    }

    #[test]
    fn length_bounds() {
        let opts = options("name", DataType::String, json!({"maxLength": 3, "minLength": 2}));
        assert_eq!(
            validate_base(&opts, Some(json!("abcd"))),
            Err(FieldError::MaxLength(3))
        );
        assert_eq!(
            validate_base(&opts, Some(json!("a"))),
            Err(FieldError::MinLength(2))
        );
        assert_eq!(validate_base(&opts, Some(json!("ab"))), Ok(Some(json!("ab"))));
    }

    #[test]
    fn value_bounds() {
        let opts = options("size", DataType::Integer, json!({"maximum": 10, "minimum": 1}));
        assert_eq!(validate_base(&opts, Some(json!(11))), Err(FieldError::Maximum(10.0)));
        assert_eq!(validate_base(&opts, Some(json!(0))), Err(FieldError::Minimum(1.0)));
    }

    #[test]
    fn shape_checks() {
        assert!(check_email("admin@example.com").is_ok());
        assert!(check_email("admin@example").is_err());
        assert!(check_color("#fff").is_ok());
        assert!(check_color("#a1b2c3").is_ok());
        assert!(check_color("red").is_err());
        assert!(check_uri("https://example.com/a").is_ok());
        assert!(check_uri("example").is_err());
        assert!(check_uuid("123e4567-e89b-12d3-a456-426614174000").is_ok());
        assert!(check_uuid("123e4567").is_err());
        assert!(check_phone("+1 (555) 123-4567").is_ok());
        assert!(check_phone("call me").is_err());
        assert!(check_date("2024-02-29").is_ok());
        assert!(check_date("2024-13-01").is_err());
        assert!(check_date_time("2024-02-29T10:00:00Z").is_ok());
        assert!(check_date_time("2024-02-29").is_err());
    }

    #[test]
    fn calendar_aware_dates() {
        assert!(check_date("2023-02-31").is_err());
        assert!(check_date("2024-04-31").is_err());
        assert!(check_date("2023-02-29").is_err());
        assert!(check_date("2024-2-29x").is_err());
        assert!(check_date_time("2024-02-29T9").is_err());
        assert!(check_date_time("2024-02-29T99:99:99garbage").is_err());
        assert!(check_date_time("2023-02-31T10:30:00Z").is_err());
        assert!(check_date_time("2024-02-29T10:30:00Z").is_ok());
        assert!(check_date_time("2024-02-29T10:30:00+03:00").is_ok());
        assert!(check_date_time("2024-02-29T10:30").is_ok());
        assert!(check_date_time("2024-02-29 10:30:15.250").is_ok());
        assert!(check_uuid("123e4567-e89b-12d3-a456-42661417400g").is_err());
        assert!(check_uri("https://exa mple.com").is_err());
    }

    #[test]
    fn number_conversion() {
        let field = NumberField::new(options("size", DataType::Integer, json!({})));
        assert_eq!(field.convert(json!("42")), json!(42));
        assert_eq!(field.convert(json!("nope")), json!("nope"));

        let field = NumberField::new(options("ratio", DataType::Number, json!({})));
        assert_eq!(field.convert(json!("0.5")), json!(0.5));
    }

    #[test]
    fn boolean_conversion() {
        assert_eq!(BooleanField::convert(json!("TRUE")), json!(true));
        assert_eq!(BooleanField::convert(json!("false")), json!(false));
        assert_eq!(BooleanField::convert(json!(1)), json!(1));
    }

    #[test]
    fn choices_from_enum() {
        let field = ChoicesField::new(options(
            "status",
            DataType::String,
            json!({"enum": ["new", "done"]}),
        ));
        assert_eq!(field.choices(), &[json!("new"), json!("done")]);
    }
}
