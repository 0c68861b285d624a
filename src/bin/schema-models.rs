//! Schema Models CLI
//!
//! Command-line interface for compiling OpenAPI documents into models and
//! routes, validating payloads and managing the schema cache.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use schema_models::{
    load_schema, select_cache, validate_record, App, AppBuilder, AppConfig, FileStorage, Model,
    SchemaError, ValidateError,
};

#[derive(Parser)]
#[command(name = "schema-models")]
#[command(about = "Compile OpenAPI definitions into models, fields and routes")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// File backing the persistent cache
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    /// Namespace prefix of cache keys
    #[arg(long, global = true)]
    cache_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile definitions and print model descriptors
    Models {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Print only this model
        #[arg(long, short)]
        model: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Build views and print the route list
    Routes {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a payload through a model's fields and JSON Schema
    Validate {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Model (definition name) to validate against
        #[arg(long, short)]
        model: String,

        /// Payload file to validate
        payload: PathBuf,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the persistent cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print a cached value
    Get {
        /// Cache key, e.g. openapi
        key: String,
    },

    /// Remove every entry under the cache prefix
    Clear,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Models {
            schema,
            model,
            pretty,
        } => run_models(config.schema(schema), model.as_deref(), pretty),

        Commands::Routes { schema, pretty } => run_routes(config.schema(schema), pretty),

        Commands::Validate {
            schema,
            model,
            payload,
            json,
        } => run_validate(config.schema(schema), &model, &payload, json),

        Commands::Cache { action } => run_cache(&config, action),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Configuration file first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<AppConfig, u8> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path).map_err(|e| {
            eprintln!("Error loading config: {}", e);
            e.exit_code() as u8
        })?,
        None => AppConfig::default(),
    };
    if let Some(path) = &cli.cache_file {
        config = config.cache_file(path);
    }
    if let Some(prefix) = &cli.cache_prefix {
        config = config.cache_prefix(prefix);
    }
    Ok(config)
}

fn build_app(config: AppConfig) -> Result<App, u8> {
    let builder = AppBuilder::from_config(config).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    builder.build().map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn print_json(value: &Value, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn describe_model(model: &Model) -> Value {
    let fields: Vec<Value> = model
        .fields()
        .iter()
        .map(|field| {
            json!({
                "name": field.name(),
                "title": field.title(),
                "kind": field.kind(),
                "type": field.data_type(),
                "format": field.format(),
                "required": field.is_required(),
                "readOnly": field.is_read_only(),
                "nullable": field.is_nullable(),
            })
        })
        .collect();

    json!({
        "name": model.name(),
        "display_mode": model.display_mode().as_str(),
        "pk_field": model.pk_field_name(),
        "view_field": model.view_field_name(),
        "groups": model.fields_groups(),
        "fields": fields,
    })
}

fn run_models(config: AppConfig, model: Option<&str>, pretty: bool) -> Result<(), u8> {
    let app = build_app(config)?;

    let output = match model {
        Some(name) => {
            let model = app.model(name).map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })?;
            describe_model(&model)
        }
        None => Value::Array(
            app.models()
                .models()
                .iter()
                .map(|model| describe_model(model))
                .collect(),
        ),
    };
    print_json(&output, pretty)
}

fn run_routes(config: AppConfig, pretty: bool) -> Result<(), u8> {
    let app = build_app(config)?;
    let routes = serde_json::to_value(app.routes()).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    print_json(&routes, pretty)
}

fn run_validate(
    config: AppConfig,
    model: &str,
    payload_path: &Path,
    json_output: bool,
) -> Result<(), u8> {
    let payload = load_schema(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    let app = build_app(config)?;

    match validate_record(&app, model, &payload) {
        Ok(_) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Resolve(e)) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
        Err(e @ ValidateError::Model(_)) | Err(e @ ValidateError::Invalid { .. }) => {
            let code = e.exit_code() as u8;
            report_invalid(json_output, &validation_errors(e));
            Err(code)
        }
    }
}

/// Field errors and schema errors in one shape, paths as JSON Pointers.
fn validation_errors(e: ValidateError) -> Vec<SchemaError> {
    match e {
        ValidateError::Model(e) => e
            .errors
            .into_iter()
            .map(|(field, error)| SchemaError {
                path: format!("/{}", field),
                message: error.to_string(),
            })
            .collect(),
        ValidateError::Invalid { errors } => errors,
        ValidateError::Resolve(e) => vec![SchemaError {
            path: String::new(),
            message: e.to_string(),
        }],
    }
}

fn report_invalid(json_output: bool, errors: &[SchemaError]) {
    if json_output {
        let output = json!({
            "valid": false,
            "errors": errors
        });
        println!("{}", output);
    } else {
        eprintln!("Validation failed:");
        for error in errors {
            eprintln!("  {}", error);
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_cache(config: &AppConfig, action: CacheAction) -> Result<(), u8> {
    let Some(path) = &config.cache_file else {
        eprintln!("Error: no cache file configured (use --cache-file)");
        return Err(2);
    };
    let cache = select_cache(Some(FileStorage::new(path)), &config.cache_prefix);

    match action {
        CacheAction::Get { key } => match cache.get(&key) {
            Some(value) => {
                println!("{}", value);
                Ok(())
            }
            None => {
                eprintln!("Not cached: {}", key);
                Err(1)
            }
        },
        CacheAction::Clear => {
            cache.clear();
            println!("Cleared");
            Ok(())
        }
    }
}
