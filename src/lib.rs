//! Schema Models
//!
//! Compiles an OpenAPI document into typed models, fields, views and routes.
//!
//! Every schema object in `definitions` becomes a [`Model`]: an ordered list
//! of [`Field`]s built through the [`FieldsResolver`] registry, keyed by the
//! property's `type` and `format`. Fields convert record values between the
//! wire form and the display form and validate them. Dynamic fields decide
//! what they are from other values of the record each time they are used.
//!
//! Host code extends the compilation through the [`Signals`] bus, e.g. to
//! rename or retitle fields before a model is frozen.
//!
//! # Example
//!
//! ```
//! use schema_models::{App, SlotOptions, FieldsMapping, signals};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let document = json!({
//!     "definitions": {
//!         "User": {
//!             "type": "object",
//!             "properties": {
//!                 "id": { "type": "integer", "readOnly": true },
//!                 "email": { "type": "string", "format": "email" }
//!             }
//!         }
//!     },
//!     "paths": {}
//! });
//!
//! let bus = Rc::new(schema_models::Signals::new());
//! bus.on(
//!     SlotOptions::new(signals::model_fields_before_init("User")),
//!     |fields: &mut FieldsMapping| {
//!         fields.set_title("email", "E-mail");
//!         Ok(())
//!     },
//! );
//!
//! let app = App::builder().document(document).signals(bus).build().unwrap();
//! let user = app.model("User").unwrap();
//!
//! assert_eq!(user.field_names(), vec!["id", "email"]);
//! assert_eq!(user.field("email").unwrap().kind(), "email");
//! assert_eq!(user.field("email").unwrap().title(), "E-mail");
//! ```
//!
//! # Field formats
//!
//! | Type | Formats |
//! |------|---------|
//! | `string` | `text`, `textarea`, `html`, `password`, `email`, `color`, `uri`, `uuid`, `phone`, `date`, `date-time`, `json`, `choices`, `fk`, `dynamic`, `dynamic_fk` |
//! | `integer`, `number` | `rating`, `choices`, `fk`, `dynamic`, `dynamic_fk` |
//! | `boolean`, `array`, `object`, `file` | default field of the type |
//!
//! Custom formats are added with [`FieldsResolver::register_field`]; the
//! last registration of a `(type, format)` pair wins.

mod app;
mod cache;
mod config;
mod error;
mod fields;
mod loader;
mod models;
mod router;
pub mod signals;
mod types;
mod validator;
mod views;

pub use app::{App, AppBuilder};
pub use cache::{
    cached_json, probe_storage, select_cache, translations_cache_key, Cache, CacheExt,
    DummyCache, FileStorage, MemoryStorage, Storage, StorageCache, DEFAULT_CACHE_PREFIX,
    LANGUAGES_CACHE_KEY, OPENAPI_ANON_CACHE_KEY, OPENAPI_CACHE_KEY,
};
pub use config::AppConfig;
pub use error::{
    CacheError, FieldError, LoadError, ModelValidationError, ResolveError, SchemaError,
    ValidateError,
};
pub use fields::{
    add_default_fields, validate_base, ArrayField, ArrayItems, BaseField, BooleanField,
    ChoicesField, DependFromFkField, DependSource, DynamicCallback, DynamicField, Field,
    FieldConstructor, FieldContext, FieldDefinition, FieldOptions, FieldsResolver, FkField,
    FkOptionsCallback, JsonField, ModelSlot, NestedObjectField, NumberField, StringField,
    TextCheck,
};
pub use loader::{
    is_url, load_schema, load_schema_auto, load_schema_str, navigate_fragment, OpenApiLoader,
};
pub use models::{FieldsGroup, FieldsMapping, Model, ModelsResolver, ADDITIONAL_PROPERTIES_FIELD_NAME};
pub use router::{form_all_routes, Route, HOME_ROUTE_NAME, NOT_FOUND_ROUTE_NAME};
pub use signals::{HandlerError, HandlerResult, Signals, SlotOptions, DEFAULT_PRIORITY};
pub use types::{name_to_title, DataType, DisplayMode, Record};
pub use validator::{validate_against_schema, validate_record};
pub use views::{View, ViewKind, ViewsTree};

#[cfg(feature = "remote")]
pub use loader::load_schema_url;
