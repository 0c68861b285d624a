//! Integration tests for model compilation, dynamic fields, signals and caching.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Map, Value};
use schema_models::{
    signals, App, Cache, CacheError, DependFromFkField, DynamicField, Field, FieldError,
    FieldsMapping, FkField, MemoryStorage, Model, ModelsResolver, NestedObjectField, ResolveError,
    Route, Signals, SlotOptions, Storage, StorageCache, ViewKind,
};

fn record(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

fn list_response(reference: &str) -> Value {
    json!({
        "get": {
            "responses": {
                "200": {
                    "schema": {
                        "type": "object",
                        "properties": {
                            "results": { "type": "array", "items": { "$ref": reference } }
                        }
                    }
                }
            }
        }
    })
}

fn page_response(reference: &str) -> Value {
    json!({
        "get": { "responses": { "200": { "schema": { "$ref": reference } } } }
    })
}

fn build(document: Value) -> App {
    App::builder().document(document).build().unwrap()
}

// === Model Compilation Tests ===

mod model_compilation {
    use super::*;

    fn document() -> Value {
        json!({
            "definitions": {
                "User": {
                    "type": "object",
                    "properties": {
                        "username": { "type": "string" },
                        "id": { "type": "integer", "readOnly": true },
                        "email": { "type": "string", "format": "email" },
                        "born": { "type": "string", "format": "date" }
                    }
                },
                "Status": { "type": "string", "enum": ["on", "off"] }
            },
            "paths": {}
        })
    }

    #[test]
    fn same_schema_object_is_the_same_model() {
        let app = build(document());
        let first = app.model("User").unwrap();
        let second = app.model("User").unwrap();
        let by_ref = app.models().by_reference_path("#/definitions/User").unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&first, &by_ref));
    }

    #[test]
    fn fields_keep_declaration_order() {
        let app = build(document());
        let user = app.model("User").unwrap();
        assert_eq!(user.field_names(), vec!["username", "id", "email", "born"]);
        assert_eq!(user.field("email").unwrap().kind(), "email");
        assert_eq!(user.field("born").unwrap().kind(), "date");
        assert!(user.field("id").unwrap().is_read_only());
    }

    #[test]
    fn only_object_definitions_become_models() {
        let app = build(document());
        let names: Vec<String> = app
            .models()
            .models()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["User"]);
    }

    #[test]
    fn default_titles_come_from_names() {
        let app = build(json!({
            "definitions": {
                "Person": {
                    "type": "object",
                    "properties": {
                        "first_name": { "type": "string" },
                        "age": { "type": "integer", "title": "Years" }
                    }
                }
            },
            "paths": {}
        }));
        let person = app.model("Person").unwrap();
        assert_eq!(person.field("first_name").unwrap().title(), "First name");
        assert_eq!(person.field("age").unwrap().title(), "Years");
    }

    #[test]
    fn unknown_type_fails_compilation() {
        let result = App::builder()
            .document(json!({
                "definitions": {
                    "Broken": {
                        "type": "object",
                        "properties": { "pair": { "type": "tuple" } }
                    }
                },
                "paths": {}
            }))
            .build();
        assert!(matches!(
            result,
            Err(ResolveError::FormatNotFound { ref data_type, .. }) if data_type == "tuple"
        ));
    }

    #[test]
    fn unknown_format_uses_type_default() {
        let app = build(json!({
            "definitions": {
                "Doc": {
                    "type": "object",
                    "properties": { "body": { "type": "string", "format": "markdown-ish" } }
                }
            },
            "paths": {}
        }));
        let doc = app.model("Doc").unwrap();
        assert_eq!(doc.field("body").unwrap().kind(), "string");
    }

    #[test]
    fn display_mode_and_names() {
        let app = build(json!({
            "definitions": {
                "Wizard": {
                    "type": "object",
                    "x-display-mode": "STEP",
                    "properties": { "pk": { "type": "integer" }, "name": { "type": "string" } }
                },
                "Odd": {
                    "type": "object",
                    "x-display-mode": "CAROUSEL",
                    "properties": { "code": { "type": "string" } }
                }
            },
            "paths": {}
        }));
        let wizard = app.model("Wizard").unwrap();
        assert_eq!(wizard.display_mode().as_str(), "STEP");
        assert_eq!(wizard.pk_field_name(), Some("pk"));
        assert_eq!(wizard.view_field_name(), Some("name"));

        let odd = app.model("Odd").unwrap();
        assert_eq!(odd.display_mode().as_str(), "DEFAULT");
        assert_eq!(odd.pk_field_name(), Some("code"));
    }
}

// === Nested Model Tests ===

mod nested_models {
    use super::*;

    fn document() -> Value {
        json!({
            "definitions": {
                "Author": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "books": { "type": "array", "items": { "$ref": "#/definitions/Book" } }
                    }
                },
                "Book": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "author": { "$ref": "#/definitions/Author" },
                        "meta": {
                            "type": "object",
                            "properties": { "pages": { "type": "integer" } }
                        }
                    }
                }
            },
            "paths": {}
        })
    }

    #[test]
    fn cyclic_references_resolve_to_cached_models() {
        let app = build(document());
        let book = app.model("Book").unwrap();
        let author = book
            .field("author")
            .unwrap()
            .as_any()
            .downcast_ref::<NestedObjectField>()
            .unwrap()
            .nested_model(app.models())
            .unwrap();
        assert!(Rc::ptr_eq(&author, &app.model("Author").unwrap()));
    }

    #[test]
    fn inline_objects_become_anonymous_models() {
        let app = build(document());
        let book = app.model("Book").unwrap();
        let meta = book
            .field("meta")
            .unwrap()
            .as_any()
            .downcast_ref::<NestedObjectField>()
            .unwrap()
            .nested_model(app.models())
            .unwrap();
        assert!(meta.name().starts_with("NoNameModel"));
        assert_eq!(meta.field_names(), vec!["pages"]);
        assert!(app
            .models()
            .models()
            .iter()
            .all(|m| !m.name().starts_with("NoNameModel")));
    }

    #[test]
    fn nested_records_are_converted() {
        let app = build(document());
        let author = app.model("Author").unwrap();
        let data = record(json!({
            "name": "Ann",
            "books": [{ "title": "One", "meta": { "pages": "120" } }]
        }));
        let inner = author.to_inner(&data, &app.context());
        assert_eq!(inner["books"][0]["meta"]["pages"], json!(120));
    }

    #[test]
    fn nested_errors_are_reported_under_the_field() {
        let app = build(document());
        let book = app.model("Book").unwrap();
        let data = record(json!({ "title": "One", "meta": { "pages": "many" } }));
        let err = book.validate(&data, &app.context()).unwrap_err();
        assert!(matches!(err.field("meta"), Some(FieldError::Nested(_))));
    }

    #[test]
    fn cyclic_models_prepare_for_views() {
        let mut document = document();
        document["paths"] = json!({ "/author/": list_response("#/definitions/Author") });
        let app = build(document);
        assert!(app.views().get("/author/").is_some());
    }

    #[test]
    fn unique_items_reject_duplicates() {
        let app = build(json!({
            "definitions": {
                "Post": {
                    "type": "object",
                    "properties": {
                        "tags": {
                            "type": "array",
                            "uniqueItems": true,
                            "items": { "type": "string" }
                        },
                        "scores": { "type": "array", "items": { "type": "integer" } }
                    }
                }
            },
            "paths": {}
        }));
        let post = app.model("Post").unwrap();

        let ok = record(json!({ "tags": ["a", "b"], "scores": [1, 1] }));
        assert!(post.validate(&ok, &app.context()).is_ok());

        let dup = record(json!({ "tags": ["a", "b", "a"] }));
        let err = post.validate(&dup, &app.context()).unwrap_err();
        assert!(matches!(
            err.field("tags"),
            Some(FieldError::Invalid(message)) if message == "Items must be unique."
        ));
    }
}

// === Required and Extra Properties Tests ===

mod required_and_extra {
    use super::*;

    #[test]
    fn required_list_marks_fields() {
        let app = build(json!({
            "definitions": {
                "Login": {
                    "type": "object",
                    "required": ["username"],
                    "properties": {
                        "username": { "type": "string", "minLength": 1 },
                        "remember": { "type": "boolean" }
                    }
                }
            },
            "paths": {}
        }));
        let login = app.model("Login").unwrap();
        assert!(login.field("username").unwrap().is_required());
        assert!(!login.field("remember").unwrap().is_required());

        let err = login.validate(&Map::new(), &app.context()).unwrap_err();
        assert_eq!(err.field("username"), Some(&FieldError::Empty));
    }

    #[test]
    fn additional_properties_apply_to_undeclared_keys() {
        let app = build(json!({
            "definitions": {
                "Settings": {
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "additionalProperties": { "type": "integer" }
                }
            },
            "paths": {}
        }));
        let settings = app.model("Settings").unwrap();
        assert!(settings.additional_properties().is_some());
        assert_eq!(settings.field_names(), vec!["name"]);

        let data = record(json!({ "name": "x", "limit": "10" }));
        let inner = settings.to_inner(&data, &app.context());
        assert_eq!(inner["limit"], json!(10));

        let bad = record(json!({ "name": "x", "limit": "ten" }));
        let err = settings.validate(&bad, &app.context()).unwrap_err();
        assert!(err.field("limit").is_some());
    }
}

// === Foreign Key Tests ===

mod foreign_keys {
    use super::*;

    fn fk_property() -> Value {
        json!({
            "type": "integer",
            "format": "fk",
            "x-options": {
                "model": { "$ref": "#/definitions/FK" },
                "value_field": "id",
                "view_field": "name"
            }
        })
    }

    fn definitions() -> Value {
        json!({
            "Model": {
                "type": "object",
                "properties": { "id": { "type": "integer" }, "fk": fk_property() }
            },
            "FK": {
                "type": "object",
                "properties": { "id": { "type": "integer" }, "name": { "type": "string" } }
            },
            "Other": {
                "type": "object",
                "properties": { "id": { "type": "integer" } }
            }
        })
    }

    #[test]
    fn missing_list_view_fails_initialization() {
        let document = json!({
            "definitions": definitions(),
            "paths": {
                "/model/": list_response("#/definitions/Model"),
                "/other/": list_response("#/definitions/Other"),
                "/other/{id}/": page_response("#/definitions/Other"),
                "/other/{id}/fk/": list_response("#/definitions/FK")
            }
        });
        let err = App::builder().document(document).build().unwrap_err();
        assert!(matches!(err, ResolveError::ModelNotFound { .. }));
        assert_eq!(err.to_string(), "Cannot find model FK for path /model/");
    }

    #[test]
    fn fk_inside_array_items_needs_list_view() {
        let document = json!({
            "definitions": {
                "Model": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "items": { "type": "array", "items": { "$ref": "#/definitions/Item" } }
                    }
                },
                "Item": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" }, "fk": fk_property() }
                },
                "FK": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" }, "name": { "type": "string" } }
                }
            },
            "paths": { "/model/": list_response("#/definitions/Model") }
        });
        let err = App::builder().document(document).build().unwrap_err();
        assert!(matches!(err, ResolveError::ModelNotFound { .. }));
        assert_eq!(err.to_string(), "Cannot find model FK for path /model/");
    }

    #[test]
    fn fk_inside_array_items_uses_list_view() {
        let mut defs = definitions();
        defs["Wrapper"] = json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "rows": { "type": "array", "items": { "$ref": "#/definitions/Model" } }
            }
        });
        let app = build(json!({
            "definitions": defs,
            "paths": {
                "/wrapper/": list_response("#/definitions/Wrapper"),
                "/fk/": list_response("#/definitions/FK")
            }
        }));
        let fk = app
            .model("Model")
            .unwrap()
            .field("fk")
            .unwrap()
            .as_any()
            .downcast_ref::<FkField>()
            .unwrap()
            .list_paths_for("/wrapper/");
        assert_eq!(fk, Some(vec!["/fk/".to_string()]));
    }

    #[test]
    fn top_level_list_view_is_found() {
        let app = build(json!({
            "definitions": definitions(),
            "paths": {
                "/model/": list_response("#/definitions/Model"),
                "/fk/": list_response("#/definitions/FK")
            }
        }));
        let model = app.model("Model").unwrap();
        let fk = model
            .field("fk")
            .unwrap()
            .as_any()
            .downcast_ref::<FkField>()
            .unwrap();
        assert_eq!(fk.list_paths_for("/model/"), Some(vec!["/fk/".to_string()]));
        assert_eq!(fk.view_field(), "name");
    }

    #[test]
    fn related_instances_reduce_to_value_field() {
        let app = build(json!({
            "definitions": definitions(),
            "paths": {
                "/model/": list_response("#/definitions/Model"),
                "/fk/": list_response("#/definitions/FK")
            }
        }));
        let model = app.model("Model").unwrap();
        let data = record(json!({ "id": 1, "fk": { "id": 7, "name": "Seven" } }));
        let inner = model.to_inner(&data, &app.context());
        assert_eq!(inner["fk"], json!(7));
    }
}

// === Dynamic Field Tests ===

mod dynamic_fields {
    use super::*;

    fn app() -> App {
        build(json!({
            "definitions": {
                "Setting": {
                    "type": "object",
                    "properties": {
                        "field_type": { "type": "object", "format": "json" },
                        "kind": { "type": "string" },
                        "value": {
                            "type": "string",
                            "format": "dynamic",
                            "x-options": { "field": "field_type" }
                        },
                        "typed": {
                            "type": "string",
                            "format": "dynamic",
                            "x-options": {
                                "field": "kind",
                                "types": { "count": "integer", "flag": { "type": "boolean" } },
                                "choices": { "level": ["low", "high"] }
                            }
                        },
                        "related": {
                            "type": "string",
                            "format": "dynamic_fk",
                            "x-options": { "field": "source", "field_attribute": "field_type" }
                        }
                    }
                },
                "Outer": {
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string" },
                        "inner": {
                            "type": "object",
                            "properties": {
                                "value": {
                                    "type": "string",
                                    "format": "dynamic",
                                    "x-options": {
                                        "field": "kind",
                                        "source_view": "<<parent>>",
                                        "types": { "number": "integer" }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "paths": {}
        }))
    }

    fn dynamic<'a>(model: &'a Model, name: &str) -> &'a DynamicField {
        model
            .field(name)
            .unwrap()
            .as_any()
            .downcast_ref::<DynamicField>()
            .unwrap()
    }

    #[test]
    fn watched_value_defines_the_field() {
        let app = app();
        let setting = app.model("Setting").unwrap();
        let value = dynamic(&setting, "value");
        let ctx = app.context();

        let expected = app
            .fields()
            .resolve_field(record(json!({ "type": "string", "format": "color" })), "value")
            .unwrap();
        let data = record(json!({ "field_type": { "type": "string", "format": "color" } }));
        let resolved = value.resolve(&data, &ctx).unwrap();
        assert_eq!(resolved.kind(), expected.kind());
        assert_eq!(resolved.kind(), "color");
        assert_eq!(resolved.name(), "value");

        let data = record(json!({ "field_type": { "type": "boolean" } }));
        assert_eq!(value.resolve(&data, &ctx).unwrap().kind(), "boolean");
    }

    #[test]
    fn types_then_choices_then_string() {
        let app = app();
        let setting = app.model("Setting").unwrap();
        let typed = dynamic(&setting, "typed");
        let ctx = app.context();

        let resolve = |kind: &str| {
            typed
                .resolve(&record(json!({ "kind": kind })), &ctx)
                .unwrap()
                .kind()
                .to_string()
        };
        assert_eq!(resolve("count"), "integer");
        assert_eq!(resolve("flag"), "boolean");
        assert_eq!(resolve("level"), "choices");
        assert_eq!(resolve("unknown"), "string");
    }

    #[test]
    fn host_callback_runs_after_types() {
        let app = app();
        let options = app.model("Setting").unwrap().field("typed").unwrap().options().clone();
        let field = DynamicField::new(options)
            .unwrap()
            .with_callback(|values| match values.get("kind").and_then(Value::as_str) {
                Some("secret") => Some("password".into()),
                _ => None,
            });
        let ctx = app.context();

        let resolve = |kind: &str| {
            field
                .resolve(&record(json!({ "kind": kind })), &ctx)
                .unwrap()
                .kind()
                .to_string()
        };
        assert_eq!(resolve("secret"), "password");
        assert_eq!(resolve("count"), "integer");
    }

    #[test]
    fn parent_record_drives_nested_field() {
        let app = app();
        let outer = app.model("Outer").unwrap();

        let ok = record(json!({ "kind": "number", "inner": { "value": "12" } }));
        let accepted = outer.validate(&ok, &app.context()).unwrap();
        assert_eq!(accepted["inner"]["value"], json!(12));

        let bad = record(json!({ "kind": "number", "inner": { "value": "x" } }));
        let err = outer.validate(&bad, &app.context()).unwrap_err();
        assert!(matches!(err.field("inner"), Some(FieldError::Nested(_))));

        let text = record(json!({ "kind": "text", "inner": { "value": "x" } }));
        assert!(outer.validate(&text, &app.context()).is_ok());
    }

    #[test]
    fn depend_from_fk_reads_attribute() {
        let app = app();
        let setting = app.model("Setting").unwrap();
        let related = setting
            .field("related")
            .unwrap()
            .as_any()
            .downcast_ref::<DependFromFkField>()
            .unwrap();
        let ctx = app.context();
        assert_eq!(related.kind(), "dynamic_fk");

        let data = record(json!({ "source": { "field_type": "color" } }));
        assert_eq!(related.resolve(&data, &ctx).unwrap().kind(), "color");

        let data = record(json!({ "source": { "field_type": { "type": "integer" } } }));
        assert_eq!(related.resolve(&data, &ctx).unwrap().kind(), "integer");

        let data = record(json!({ "source": null }));
        assert_eq!(related.depend_value(&data, &ctx), json!("string"));
        assert_eq!(related.resolve(&data, &ctx).unwrap().kind(), "string");
    }
}

// === Field Hook Tests ===

mod field_hooks {
    use super::*;

    fn document() -> Value {
        json!({
            "definitions": {
                "User": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "mail": { "type": "string", "format": "email" }
                    }
                }
            },
            "paths": {}
        })
    }

    #[test]
    fn hooks_edit_fields_before_freeze() {
        let bus = Rc::new(Signals::new());
        bus.connect(
            &signals::model_fields_before_init("User"),
            |fields: &mut FieldsMapping| {
                fields.rename("mail", "email")?;
                fields.set_title("email", "E-mail");
                fields.insert("nickname", "string");
                Ok(())
            },
        );

        let app = App::builder()
            .document(document())
            .signals(Rc::clone(&bus))
            .build()
            .unwrap();
        let user = app.model("User").unwrap();
        assert_eq!(user.field_names(), vec!["id", "email", "nickname"]);
        assert_eq!(user.field("email").unwrap().title(), "E-mail");
        assert_eq!(user.field("email").unwrap().kind(), "email");
    }

    #[test]
    fn rename_to_existing_field_is_rejected() {
        let mut mapping = FieldsMapping::new();
        mapping.insert("a", "string");
        mapping.insert("b", "integer");
        assert!(matches!(
            mapping.rename("a", "b"),
            Err(ResolveError::DuplicateField { .. })
        ));
        assert_eq!(mapping.names(), vec!["a", "b"]);
    }

    #[test]
    fn failing_hook_does_not_stop_compilation() {
        let bus = Rc::new(Signals::new());
        let reported = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&reported);
        bus.set_error_reporter(move |signal, _slot, e| {
            log.borrow_mut().push(format!("{}: {}", signal, e));
        });
        bus.connect(
            &signals::model_fields_before_init("User"),
            |_: &mut FieldsMapping| Err("boom".into()),
        );

        let app = App::builder()
            .document(document())
            .signals(Rc::clone(&bus))
            .build()
            .unwrap();
        assert_eq!(app.model("User").unwrap().field_names(), vec!["id", "mail"]);
        assert_eq!(
            *reported.borrow(),
            vec!["models[User].fields.beforeInit: boom".to_string()]
        );
    }

    #[test]
    fn model_signals_are_emitted() {
        let bus = Rc::new(Signals::new());
        let created = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&created);
        bus.connect(&signals::model_created("User"), move |model: &mut Rc<Model>| {
            log.borrow_mut().push(model.name().to_string());
            Ok(())
        });

        App::builder()
            .document(document())
            .signals(Rc::clone(&bus))
            .build()
            .unwrap();
        assert_eq!(*created.borrow(), vec!["User"]);

        let late = Rc::new(RefCell::new(0));
        let count = Rc::clone(&late);
        bus.when_emitted(signals::SCHEMA_MODELS_CREATED, move |models: &mut Vec<Rc<Model>>| {
            *count.borrow_mut() = models.len();
            Ok(())
        });
        assert_eq!(*late.borrow(), 1);

        let resolver_seen = Rc::new(RefCell::new(false));
        let seen = Rc::clone(&resolver_seen);
        bus.when_emitted(signals::APP_AFTER_INIT, move |models: &mut Rc<ModelsResolver>| {
            *seen.borrow_mut() = models.get("User").is_ok();
            Ok(())
        });
        assert!(*resolver_seen.borrow());
    }
}

// === Signal Bus Tests ===

mod signal_bus {
    use super::*;

    fn recorder(bus: &Signals, signal: &str, priorities: &[Option<f64>]) -> Rc<RefCell<Vec<usize>>> {
        let order = Rc::new(RefCell::new(Vec::new()));
        for (idx, priority) in priorities.iter().enumerate() {
            let log = Rc::clone(&order);
            let mut options = SlotOptions::new(signal);
            if let Some(priority) = priority {
                options = options.priority(*priority);
            }
            bus.on(options, move |_: &mut ()| {
                log.borrow_mut().push(idx);
                Ok(())
            });
        }
        order
    }

    #[test]
    fn handlers_run_by_priority() {
        let bus = Signals::new();
        let order = recorder(
            &bus,
            "tick",
            &[Some(7.5), None, Some(-3.0), Some(42.0), Some(0.0), Some(1.25)],
        );
        bus.emit("tick", &mut ());
        assert_eq!(*order.borrow(), vec![2, 4, 5, 0, 3, 1]);
    }

    #[test]
    fn infinity_runs_after_default_priority() {
        let bus = Signals::new();
        let order = recorder(&bus, "tick", &[Some(f64::INFINITY), None, Some(5.0)]);
        bus.emit("tick", &mut ());
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let bus = Signals::new();
        let order = recorder(&bus, "tick", &[Some(1.0), Some(1.0), None, None, Some(1.0)]);
        bus.emit("tick", &mut ());
        assert_eq!(*order.borrow(), vec![0, 1, 4, 2, 3]);
    }

    #[test]
    fn disconnect_by_slot() {
        let bus = Signals::new();
        let hits = Rc::new(RefCell::new(0));
        let count = Rc::clone(&hits);
        let slot = bus.on(SlotOptions::new("tick").slot("counter"), move |_: &mut ()| {
            *count.borrow_mut() += 1;
            Ok(())
        });
        assert_eq!(slot, "counter");

        bus.emit("tick", &mut ());
        assert!(bus.disconnect("counter", "tick"));
        assert!(!bus.disconnect("counter", "tick"));
        bus.emit("tick", &mut ());
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn once_handlers_fire_once() {
        let bus = Signals::new();
        let hits = Rc::new(RefCell::new(0));
        let count = Rc::clone(&hits);
        bus.once("tick", move |n: &mut i32| {
            *count.borrow_mut() += *n;
            Ok(())
        });
        bus.emit("tick", &mut 3);
        bus.emit("tick", &mut 4);
        assert_eq!(*hits.borrow(), 3);
        assert_eq!(bus.subscriber_count("tick"), 0);
    }

    #[test]
    fn handlers_may_mutate_payload() {
        let bus = Signals::new();
        bus.connect("routes", |routes: &mut Vec<Route>| {
            routes.push(Route::new("extra", "/extra"));
            Ok(())
        });
        let mut routes: Vec<Route> = Vec::new();
        bus.emit("routes", &mut routes);
        assert_eq!(routes, vec![Route::new("extra", "/extra")]);
    }
}

// === Cache Tests ===

mod cache {
    use super::*;

    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Storage {
                message: "unavailable".into(),
            })
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Storage {
                message: "unavailable".into(),
            })
        }

        fn remove_item(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Storage {
                message: "unavailable".into(),
            })
        }

        fn keys(&self) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Storage {
                message: "unavailable".into(),
            })
        }
    }

    #[test]
    fn values_round_trip() {
        let cache = StorageCache::with_prefix(MemoryStorage::new(), "app_");
        cache.set("openapi", r#"{"swagger":"2.0"}"#);
        assert_eq!(cache.get("openapi").as_deref(), Some(r#"{"swagger":"2.0"}"#));
        assert_eq!(
            cache.get_value("openapi").unwrap(),
            Some(json!({ "swagger": "2.0" }))
        );
        cache.delete("openapi");
        assert_eq!(cache.get("openapi"), None);
    }

    #[test]
    fn clear_keeps_other_prefixes() {
        let storage = Rc::new(MemoryStorage::new());
        let first = StorageCache::with_prefix(Rc::clone(&storage), "one_");
        let second = StorageCache::with_prefix(Rc::clone(&storage), "two_");
        first.set("openapi", "1");
        second.set("openapi", "2");

        first.clear();
        assert_eq!(first.get("openapi"), None);
        assert_eq!(second.get("openapi").as_deref(), Some("2"));
    }

    #[test]
    fn broken_storage_degrades_to_misses() {
        let cache = StorageCache::new(BrokenStorage);
        cache.set("openapi", "{}");
        assert_eq!(cache.get("openapi"), None);
        cache.delete("openapi");
        cache.clear();
        assert!(schema_models::select_cache(Some(BrokenStorage), "x_").get("a").is_none());
    }
}

// === View and Route Tests ===

mod views_and_routes {
    use super::*;

    fn document() -> Value {
        let mut paths = Map::new();
        paths.insert("/user/".into(), list_response("#/definitions/User"));
        paths.insert("/user/{id}/".into(), page_response("#/definitions/User"));
        paths.insert(
            "/user/{id}/activate/".into(),
            json!({
                "post": {
                    "parameters": [{ "in": "body", "name": "data", "schema": { "$ref": "#/definitions/User" } }],
                    "responses": { "201": {} }
                }
            }),
        );
        paths.insert(
            "/internal/".into(),
            json!({ "x-hidden": true, "get": { "responses": { "200": {} } } }),
        );
        json!({
            "definitions": {
                "User": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" }, "name": { "type": "string" } }
                }
            },
            "paths": paths
        })
    }

    #[test]
    fn views_are_classified() {
        let app = build(document());
        let kinds: Vec<(&str, ViewKind)> = app
            .views()
            .views()
            .iter()
            .map(|v| (v.path(), v.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("/user/", ViewKind::List),
                ("/user/{id}/", ViewKind::Page),
                ("/user/{id}/activate/", ViewKind::Action),
                ("/internal/", ViewKind::Page),
            ]
        );
        let activate = app.views().get("/user/{id}/activate/").unwrap();
        assert_eq!(activate.model().unwrap().name(), "User");
    }

    #[test]
    fn routes_skip_hidden_views() {
        let app = build(document());
        let paths: Vec<&str> = app.routes().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/", "/user/", "/user/:id/", "/user/:id/activate/", "*"]
        );
        assert_eq!(app.routes()[0].name, "home");
        assert_eq!(app.routes()[4].name, "404");
    }

    #[test]
    fn route_signals_can_rewrite_routes() {
        let bus = Rc::new(Signals::new());
        bus.connect(&signals::route_created("/user/"), |route: &mut Route| {
            route.name = "users".to_string();
            Ok(())
        });
        bus.connect(signals::ALL_ROUTES_CREATED, |routes: &mut Vec<Route>| {
            routes.retain(|r| r.name != "404");
            Ok(())
        });

        let app = App::builder()
            .document(document())
            .signals(bus)
            .build()
            .unwrap();
        assert_eq!(app.routes()[1].name, "users");
        assert!(app.routes().iter().all(|r| r.name != "404"));
    }
}
