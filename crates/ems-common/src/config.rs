//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::logging::LogFormat;

type Result<T> = std::result::Result<T, ConfigurationError>;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Scalar carried by a configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Text(_) => "text",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

/// Ordered set of named configuration values handed over by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigRecord {
    fields: IndexMap<String, ConfigValue>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert, mostly used by tests and loaders.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Declares one configuration field: its name, whether it is mandatory and its default.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub mandatory: bool,
    pub default: Option<ConfigValue>,
}

impl FieldSpec {
    pub fn mandatory(name: &'static str) -> Self {
        Self {
            name,
            mandatory: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, default: impl Into<ConfigValue>) -> Self {
        Self {
            name,
            mandatory: false,
            default: Some(default.into()),
        }
    }

    /// Optional field without a default; absent unless the record provides it.
    pub fn optional_without_default(name: &'static str) -> Self {
        Self {
            name,
            mandatory: false,
            default: None,
        }
    }
}

/// Fields that passed validation, with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    values: IndexMap<String, ConfigValue>,
}

impl ResolvedConfig {
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn value(&self, name: &str) -> Result<&ConfigValue> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingField {
                field: name.to_owned(),
            })
    }

    fn type_error(name: &str, expected: &'static str, found: &ConfigValue) -> ConfigurationError {
        ConfigurationError::InvalidType {
            field: name.to_owned(),
            expected,
            found: found.kind(),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.value(name)? {
            ConfigValue::Boolean(value) => Ok(*value),
            ConfigValue::Text(text) => text
                .trim()
                .parse::<bool>()
                .map_err(|_| ConfigurationError::invalid(name, format!("'{text}' is not a boolean"))),
            other => Err(Self::type_error(name, "boolean", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.value(name)? {
            ConfigValue::Integer(value) => Ok(*value),
            other => Err(Self::type_error(name, "integer", other)),
        }
    }

    /// Integer field that must not be negative.
    pub fn get_u64(&self, name: &str) -> Result<u64> {
        let value = self.get_i64(name)?;
        u64::try_from(value)
            .map_err(|_| ConfigurationError::invalid(name, format!("{value} must not be negative")))
    }

    /// Float field; integers are widened.
    pub fn get_f64(&self, name: &str) -> Result<f64> {
        match self.value(name)? {
            ConfigValue::Float(value) => Ok(*value),
            ConfigValue::Integer(value) => Ok(*value as f64),
            other => Err(Self::type_error(name, "float", other)),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.value(name)? {
            ConfigValue::Text(value) => Ok(value.as_str()),
            other => Err(Self::type_error(name, "text", other)),
        }
    }

    pub fn get_opt_str(&self, name: &str) -> Result<Option<&str>> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.get_str(name).map(Some)
    }
}

/// Validate a record against its field specification.
///
/// Every mandatory field must be present; optional fields fall back to their
/// default. Fields the specification does not know are ignored.
pub fn validate(record: &ConfigRecord, fields: &[FieldSpec]) -> Result<ResolvedConfig> {
    let mut values = IndexMap::with_capacity(fields.len());
    for spec in fields {
        match (record.get(spec.name), &spec.default) {
            (Some(value), _) => {
                values.insert(spec.name.to_owned(), value.clone());
            }
            (None, Some(default)) => {
                values.insert(spec.name.to_owned(), default.clone());
            }
            (None, None) if spec.mandatory => {
                return Err(ConfigurationError::MissingField {
                    field: spec.name.to_owned(),
                });
            }
            (None, None) => {}
        }
    }
    for (name, _) in record.iter() {
        if !fields.iter().any(|spec| spec.name == name) {
            debug!(field = name, "ignoring unrecognised configuration field");
        }
    }
    Ok(ResolvedConfig { values })
}

/// Typed configuration built from a [`ConfigRecord`] at construction time.
pub trait FromConfig: Sized {
    fn fields() -> Vec<FieldSpec>;

    fn from_resolved(config: &ResolvedConfig) -> Result<Self>;

    fn from_record(record: &ConfigRecord) -> Result<Self> {
        let resolved = validate(record, &Self::fields())?;
        Self::from_resolved(&resolved)
    }
}

/// Primary configuration object for the EMS daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record handed to the energy manager; validated by its field specification.
    #[serde(default)]
    pub manager: ConfigRecord,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Channel names declared on the bus before any component is activated.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Component records keyed by component id; each carries a `type` field.
    #[serde(default)]
    pub components: IndexMap<String, ConfigRecord>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "EMS_CONFIG";

    /// Load configuration from disk, respecting the `EMS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(ConfigurationError::NotFound(
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    /// Component type name of a configured component, if declared.
    pub fn component_type(&self, component_id: &str) -> Option<&str> {
        match self.components.get(component_id)?.get("type")? {
            ConfigValue::Text(kind) => Some(kind.as_str()),
            _ => None,
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(blank) = self.channels.iter().find(|name| name.trim().is_empty()) {
            return Err(ConfigurationError::invalid(
                "channels",
                format!("channel name '{blank}' must not be blank"),
            ));
        }
        for (component_id, record) in &self.components {
            match record.get("type") {
                Some(ConfigValue::Text(_)) => {}
                Some(other) => {
                    return Err(ConfigurationError::InvalidType {
                        field: format!("components.{component_id}.type"),
                        expected: "text",
                        found: other.kind(),
                    })
                }
                None => {
                    return Err(ConfigurationError::MissingField {
                        field: format!("components.{component_id}.type"),
                    })
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = ConfigurationError;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
