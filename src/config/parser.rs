//! Document parser with environment and command-line overrides.
//!
//! Documents are YAML or JSON, chosen by file extension. Overrides are
//! applied after parsing, in this order: environment, then `--var`.

use crate::error::{ConfigError, Result, RiggingError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Document;

/// Prefix of environment variables that override document variables.
pub const VAR_ENV_PREFIX: &str = "RIGGING_VAR_";

/// Parser for Rigging documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to locate `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        info!("Loading document from: {}", path.display());

        if !path.exists() {
            return Err(RiggingError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RiggingError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            self.parse_json(&content, Some(path))
        } else {
            self.parse_yaml(&content, Some(path))
        }
    }

    /// Parses a document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Document> {
        debug!("Parsing YAML document");

        let document: Document = serde_yaml::from_str(content).map_err(|e| {
            RiggingError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed document with {} resources", document.resources.len());
        Ok(document)
    }

    /// Parses a document from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn parse_json(&self, content: &str, source: Option<&Path>) -> Result<Document> {
        debug!("Parsing JSON document");

        let document: Document = serde_json::from_str(content).map_err(|e| {
            RiggingError::Config(ConfigError::ParseError {
                message: format!("JSON parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed document with {} resources", document.resources.len());
        Ok(document)
    }

    /// Loads a document and applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Document> {
        let mut document = self.load_file(path)?;
        Self::apply_env_overrides(&mut document, std::env::vars())?;
        Ok(document)
    }

    /// Applies environment overrides to a document.
    ///
    /// Recognized variables are `RIGGING_STATE_PATH`, `RIGGING_CONCURRENCY`,
    /// `RIGGING_MAX_RETRIES` and `RIGGING_VAR_<NAME>`. A `RIGGING_VAR_` name
    /// matches an existing document variable case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override does not parse.
    pub fn apply_env_overrides<I>(document: &mut Document, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "RIGGING_STATE_PATH" => {
                    debug!("Overriding settings.state.path from environment");
                    document.settings.state.path = value;
                }
                "RIGGING_CONCURRENCY" => {
                    debug!("Overriding settings.apply.concurrency from environment");
                    document.settings.apply.concurrency =
                        parse_number(&key, &value, "settings.apply.concurrency")?;
                }
                "RIGGING_MAX_RETRIES" => {
                    debug!("Overriding settings.apply.max_retries from environment");
                    document.settings.apply.max_retries =
                        parse_number(&key, &value, "settings.apply.max_retries")?;
                }
                _ => {
                    if let Some(suffix) = key.strip_prefix(VAR_ENV_PREFIX) {
                        if suffix.is_empty() {
                            continue;
                        }
                        let name = document
                            .variables
                            .keys()
                            .find(|existing| existing.eq_ignore_ascii_case(suffix))
                            .cloned()
                            .unwrap_or_else(|| suffix.to_string());
                        debug!("Overriding variable '{name}' from environment");
                        document.variables.insert(name, parse_override_value(&value));
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies `KEY=VALUE` overrides from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if an assignment has no `=` or an empty key.
    pub fn apply_var_overrides(document: &mut Document, assignments: &[String]) -> Result<()> {
        for assignment in assignments {
            let (name, value) = parse_var_assignment(assignment)?;
            debug!("Overriding variable '{name}' from command line");
            document.variables.insert(name, value);
        }
        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                RiggingError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Parses a `KEY=VALUE` variable assignment.
///
/// The value is read as YAML, so `5` is a number and `[a, b]` a list. An
/// empty value is the empty string.
///
/// # Errors
///
/// Returns an error if the assignment is malformed.
pub fn parse_var_assignment(assignment: &str) -> Result<(String, Value)> {
    let (name, value) = assignment.split_once('=').ok_or_else(|| {
        ConfigError::validation(
            format!("Invalid variable override '{assignment}'. Expected format: KEY=VALUE"),
            "--var",
        )
    })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::validation(
            format!("Variable override '{assignment}' has an empty name"),
            "--var",
        )
        .into());
    }

    Ok((name.to_string(), parse_override_value(value)))
}

/// Reads an override value as YAML, falling back to a plain string.
fn parse_override_value(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::String(raw.to_string());
    }
    serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str, field: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::validation(format!("{key} must be a non-negative integer, got '{value}'"), field)
            .into()
    })
}

/// Default document file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["rigging.yaml", "rigging.yml", "rigging.json"];

/// Finds the document in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no document is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found document: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(RiggingError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
