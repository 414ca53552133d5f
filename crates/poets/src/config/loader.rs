use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::db::{self, MIN_BUSY_TIMEOUT};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Loads, validates and path-resolves a config file.
///
/// Relative paths inside the file are resolved against the file's directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = load_config_from_str(&content)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    resolve_paths(&mut config, base);
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.database.busy_timeout_secs < MIN_BUSY_TIMEOUT.as_secs() {
        return Err(ConfigError::Validation {
            message: format!(
                "database.busy_timeout_secs must be at least {}",
                MIN_BUSY_TIMEOUT.as_secs()
            ),
        });
    }

    if config.queue.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "queue.batch_size must be greater than 0".to_string(),
        });
    }

    if let Some(generator) = &config.generator {
        if generator.program.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "generator.program must not be empty".to_string(),
            });
        }
    }

    for (kind, pipeline) in &config.media.pipelines {
        if kind.trim().is_empty() {
            return Err(ConfigError::InvalidPipeline {
                kind: kind.clone(),
                reason: "request kind must not be empty".to_string(),
            });
        }
        if pipeline.prompt_arg.starts_with('-') || pipeline.prompt_arg.is_empty() {
            return Err(ConfigError::InvalidPipeline {
                kind: kind.clone(),
                reason: format!(
                    "prompt_arg '{}' must be a bare option name",
                    pipeline.prompt_arg
                ),
            });
        }
    }

    Ok(())
}

/// Makes every configured path absolute (relative to `base`) and fills in
/// the database and lock file defaults.
pub fn resolve_paths(config: &mut Config, base: &Path) {
    let resolve = |path: &Path| -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    };

    config.database.path = config
        .database
        .path
        .as_deref()
        .map(resolve)
        .or_else(db::default_database_path);

    config.queue.lock_file = match config.queue.lock_file.as_deref() {
        Some(lock) => Some(resolve(lock)),
        None => config
            .database
            .path
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join("poets.lock")),
    };

    config.media.output_directory = resolve(&config.media.output_directory);
    config.media.comfyui_directory = config.media.comfyui_directory.as_deref().map(resolve);
    for pipeline in config.media.pipelines.values_mut() {
        pipeline.script = resolve(&pipeline.script);
    }
}
