//! Configuration loading
//!
//! Loads toolkit settings from YAML, TOML, JSON, INI, RON or JSON5 files.
//!
//! ## Features
//!
//! - Format detection from the file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Layered merging of several sources, later sources win
//! - Rendering settings back to YAML, TOML or JSON, e.g. to write a template
//! - [`RagloomSettings`], the typed settings tree every foundation component
//!   can be built from

pub use config::FileFormat;
pub use crate::settings::{
    CallbackSettings, ExtractorSettings, LogFormat, LoggingSettings, MemorySettings,
    ParserSettings, RagloomSettings, RetrySettings, WorkflowSettings,
};

use config::{Config as Cfg, Environment, File};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

/// Error-stack backed result alias for config operations.
pub type ConfigResult<T> = ::std::result::Result<T, Report<ConfigError>>;

impl From<ConfigError> for crate::error::KernelError {
    fn from(err: ConfigError) -> Self {
        crate::error::KernelError::ConfigInvalid(err.to_string())
    }
}

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            Report::new(ConfigError::UnsupportedFormat(
                "No file extension found".to_string(),
            ))
            .attach(format!("path: {path}"))
        })?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(Report::new(ConfigError::UnsupportedFormat(ext.to_string()))
            .attach(format!("path: {path}"))),
    }
}

fn substitute_with(content: &str, pattern: &str) -> String {
    let Ok(re) = Regex::new(pattern) else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Substitute environment variables in a string
///
/// Supports `${VAR_NAME}` (preferred) and `$VAR_NAME`. Unknown variables are
/// left untouched.
///
/// ```rust,ignore
/// use ragloom_kernel::config::substitute_env_vars;
///
/// // with RAGLOOM_MODEL=mini in the environment
/// assert_eq!(substitute_env_vars("model: ${RAGLOOM_MODEL}"), "model: mini");
/// ```
pub fn substitute_env_vars(content: &str) -> String {
    let braced = substitute_with(content, r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}");
    substitute_with(&braced, r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
}

fn build<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    let config = builder
        .build()
        .map_err(|e| Report::new(ConfigError::Parse(e.to_string())))?;

    config
        .try_deserialize()
        .map_err(|e| Report::new(ConfigError::Deserialize(e.to_string())))
}

fn read_source(path: &str) -> ConfigResult<(String, FileFormat)> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| Report::new(ConfigError::Io(e.to_string())))
        .attach(format!("path: {path}"))?;
    Ok((substitute_env_vars(&content), format))
}

/// Load configuration from a file, detecting its format from the extension.
///
/// ```rust,ignore
/// use ragloom_kernel::config::{load_config, RagloomSettings};
///
/// let settings: RagloomSettings = load_config("ragloom.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let (content, format) = read_source(path)?;
    tracing::debug!(path, ?format, "loading configuration");
    build(Cfg::builder().add_source(File::from_str(&content, format)))
        .attach(format!("loading {path}"))
}

/// Load configuration from a string with explicit format
pub fn load_config_from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);
    build(Cfg::builder().add_source(File::from_str(&substituted, format)))
}

/// Merge several in-memory sources; later sources override earlier ones.
pub fn merge_configs<T>(sources: &[(&str, FileFormat)]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        let substituted = substitute_env_vars(content);
        builder = builder.add_source(File::from_str(&substituted, *format));
    }
    build(builder)
}

/// Load a file and apply environment overrides.
///
/// Variables are prefixed with `env_prefix` and use `__` for nesting, so
/// `RAGLOOM_PARSER__CHUNK_SIZE=512` overrides `parser.chunk_size`.
pub fn load_with_env<T>(path: &str, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let (content, format) = read_source(path)?;
    build(
        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
    .attach(format!("loading {path} with env prefix {env_prefix}"))
}

/// Serialise `value` in `format`. Only YAML, TOML and JSON can be written.
pub fn render_config<T>(value: &T, format: FileFormat) -> ConfigResult<String>
where
    T: Serialize,
{
    let rendered = match format {
        FileFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        FileFormat::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        FileFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        other => {
            return Err(Report::new(ConfigError::UnsupportedFormat(format!(
                "{other:?} cannot be written"
            ))));
        }
    };
    rendered.map_err(|e| Report::new(ConfigError::Parse(e)))
}

#[cfg(test)]
mod tests;
