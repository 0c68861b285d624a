//! CLI integration tests for schema-models binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("schema-models"))
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const SCHEMA: &str = r##"{
    "definitions": {
        "User": {
            "type": "object",
            "required": ["name"],
            "x-display-mode": "STEP",
            "properties": {
                "id": { "type": "integer", "readOnly": true },
                "name": { "type": "string", "maxLength": 10 },
                "email": { "type": "string", "format": "email" },
                "age": { "type": "integer", "minimum": 0 }
            }
        },
        "Group": {
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "title": { "type": "string" }
            }
        }
    },
    "paths": {
        "/user/": {
            "get": {
                "responses": {
                    "200": { "schema": { "type": "array", "items": { "$ref": "#/definitions/User" } } }
                }
            }
        },
        "/user/{id}/": {
            "get": { "responses": { "200": { "schema": { "$ref": "#/definitions/User" } } } }
        },
        "/secret/": {
            "x-hidden": true,
            "get": { "responses": { "200": { "schema": { "$ref": "#/definitions/Group" } } } }
        }
    }
}"##;

const FK_SCHEMA: &str = r##"{
    "definitions": {
        "Model": {
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "fk": {
                    "type": "integer",
                    "format": "fk",
                    "x-options": { "model": { "$ref": "#/definitions/FK" } }
                }
            }
        },
        "FK": {
            "type": "object",
            "properties": { "id": { "type": "integer" } }
        }
    },
    "paths": {
        "/model/": {
            "get": {
                "responses": {
                    "200": { "schema": { "type": "array", "items": { "$ref": "#/definitions/Model" } } }
                }
            }
        }
    }
}"##;

mod models_command {
    use super::*;

    #[test]
    fn lists_every_model() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        cmd()
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name":"User""#))
            .stdout(predicate::str::contains(r#""name":"Group""#))
            .stdout(predicate::str::contains(r#""display_mode":"STEP""#));
    }

    #[test]
    fn single_model_describes_fields() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        let output = cmd()
            .args(["models", schema.to_str().unwrap(), "--model", "User"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let model: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(model["name"], "User");
        assert_eq!(model["pk_field"], "id");
        assert_eq!(model["view_field"], "name");
        let fields = model["fields"].as_array().unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["id", "name", "email", "age"]);
        assert_eq!(fields[1]["required"], true);
        assert_eq!(fields[2]["kind"], "email");
        assert_eq!(fields[0]["readOnly"], true);
    }

    #[test]
    fn pretty_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        cmd()
            .args(["models", schema.to_str().unwrap(), "-m", "Group", "--pretty"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\n  \"name\": \"Group\""));
    }

    #[test]
    fn unknown_model() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        cmd()
            .args(["models", schema.to_str().unwrap(), "--model", "Nope"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("#/definitions/Nope"));
    }
}

mod routes_command {
    use super::*;

    #[test]
    fn home_views_then_not_found() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        let output = cmd()
            .args(["routes", schema.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(output.status.success());

        let routes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let paths: Vec<&str> = routes
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["/", "/user/", "/user/:id/", "*"]);
        assert_eq!(routes[0]["name"], "home");
        assert_eq!(routes[3]["name"], "404");
        assert_eq!(routes[2]["view"], "/user/{id}/");
    }

    #[test]
    fn missing_fk_list_view() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", FK_SCHEMA);

        cmd()
            .args(["routes", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains(
                "Cannot find model FK for path /model/",
            ));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_payload() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let payload = write_temp_file(
            &dir,
            "payload.json",
            r#"{"name": "ann", "email": "ann@example.com", "age": 30}"#,
        );

        cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                "--model",
                "User",
                payload.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn field_errors() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let payload = write_temp_file(
            &dir,
            "payload.json",
            r#"{"name": "ann", "email": "not-an-email"}"#,
        );

        cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                "--model",
                "User",
                payload.to_str().unwrap(),
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation failed"))
            .stderr(predicate::str::contains("/email"));
    }

    #[test]
    fn schema_errors_json_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let payload = write_temp_file(&dir, "payload.json", r#"{"name": "ann", "age": -1}"#);

        let output = cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                "-m",
                "User",
                payload.to_str().unwrap(),
                "--json",
            ])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["valid"], false);
        assert_eq!(result["errors"][0]["path"], "/age");
    }

    #[test]
    fn valid_json_output() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let payload = write_temp_file(&dir, "payload.json", r#"{"title": "admins"}"#);

        cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                "-m",
                "Group",
                payload.to_str().unwrap(),
                "--json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"valid":true}"#));
    }

    #[test]
    fn payload_not_found() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);

        cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                "-m",
                "User",
                "/nonexistent/payload.json",
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }
}

mod cache_command {
    use super::*;

    #[test]
    fn schema_is_cached_and_cleared() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let cache = dir.path().join("cache.json");

        cmd()
            .args(["--cache-file", cache.to_str().unwrap()])
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .success();

        cmd()
            .args(["--cache-file", cache.to_str().unwrap(), "cache", "get", "openapi"])
            .assert()
            .success()
            .stdout(predicate::str::contains("definitions"));

        cmd()
            .args(["--cache-file", cache.to_str().unwrap(), "cache", "clear"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared"));

        cmd()
            .args(["--cache-file", cache.to_str().unwrap(), "cache", "get", "openapi"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Not cached: openapi"));
    }

    #[test]
    fn cached_schema_outlives_source_file() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let cache = dir.path().join("cache.json");

        cmd()
            .args(["--cache-file", cache.to_str().unwrap()])
            .args(["routes", schema.to_str().unwrap()])
            .assert()
            .success();
        fs::remove_file(&schema).unwrap();

        cmd()
            .args(["--cache-file", cache.to_str().unwrap()])
            .args(["routes", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("/user/:id/"));
    }

    #[test]
    fn prefixes_are_isolated() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let cache = dir.path().join("cache.json");

        cmd()
            .args(["--cache-file", cache.to_str().unwrap(), "--cache-prefix", "one_"])
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .success();

        cmd()
            .args(["--cache-file", cache.to_str().unwrap(), "--cache-prefix", "two_"])
            .args(["cache", "get", "openapi"])
            .assert()
            .code(1);
    }

    #[test]
    fn requires_cache_file() {
        cmd()
            .args(["cache", "clear"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no cache file configured"));
    }
}

mod config_file {
    use super::*;

    #[test]
    fn config_sets_cache() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let cache = dir.path().join("cache.json");
        let config = write_temp_file(
            &dir,
            "config.json",
            &serde_json::json!({ "cache_file": cache, "cache_prefix": "cfg_" }).to_string(),
        );

        cmd()
            .args(["--config", config.to_str().unwrap()])
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .success();

        let stored = fs::read_to_string(&cache).unwrap();
        assert!(stored.contains("cfg_openapi"));
    }

    #[test]
    fn invalid_config() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let config = write_temp_file(&dir, "config.json", r#"{"anon": "yes"}"#);

        cmd()
            .args(["--config", config.to_str().unwrap()])
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Error loading config"));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn schema_not_found() {
        cmd()
            .args(["models", "/nonexistent/openapi.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_json_schema() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", "{ not json");

        cmd()
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn unknown_field_type() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "openapi.json",
            r#"{"definitions": {"M": {"type": "object", "properties": {"x": {"type": "tuple"}}}}, "paths": {}}"#,
        );

        cmd()
            .args(["models", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("tuple"));
    }
}

mod required_args {
    use super::*;

    #[test]
    fn models_requires_schema() {
        cmd()
            .arg("models")
            .assert()
            .failure()
            .stderr(predicate::str::contains("SCHEMA"));
    }

    #[test]
    fn validate_requires_model() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "openapi.json", SCHEMA);
        let payload = write_temp_file(&dir, "payload.json", "{}");

        cmd()
            .args([
                "validate",
                schema.to_str().unwrap(),
                payload.to_str().unwrap(),
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--model"));
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Compile OpenAPI definitions into models",
            ));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("schema-models"));
    }

    #[test]
    fn cache_help() {
        cmd()
            .args(["cache", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("get"))
            .stdout(predicate::str::contains("clear"));
    }
}

mod remote {
    use super::*;

    #[test]
    fn models_from_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/openapi.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SCHEMA)
            .create();

        cmd()
            .args(["models", &format!("{}/openapi.json", server.url())])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name":"User""#));
        mock.assert();
    }

    #[test]
    fn url_404() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/missing.json").with_status(404).create();

        cmd()
            .args(["routes", &format!("{}/missing.json", server.url())])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("404"));
    }

    #[test]
    fn url_invalid_host() {
        cmd()
            .args([
                "models",
                "https://this-domain-does-not-exist-12345.invalid/openapi.json",
            ])
            .assert()
            .code(3);
    }
}
