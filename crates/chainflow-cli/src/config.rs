//! Run settings: YAML file values merged under command-line flags.

use std::path::Path;

use serde::Deserialize;

use chainflow_engine::{DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use chainflow_types::{ChainflowError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Optional values read from the settings file. Other keys in the file
/// belong to other tools and are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileSettings {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliSettings {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_name: String,
    pub temperature: f32,
}

impl FileSettings {
    /// Read `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_yaml(&text)
            .map_err(|e| ChainflowError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }
}

/// Command line beats the file, the file beats the built-in defaults.
pub fn resolve(cli: &CliSettings, file: &FileSettings) -> Result<Settings> {
    let model_name = cli
        .model_name
        .clone()
        .or_else(|| file.model_name.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let temperature = cli
        .temperature
        .or(file.temperature)
        .unwrap_or(DEFAULT_TEMPERATURE);

    if model_name.trim().is_empty() {
        return Err(ChainflowError::Config("model_name must not be empty".into()));
    }
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ChainflowError::Config(format!(
            "temperature must be between 0.0 and 2.0, got {temperature}"
        )));
    }

    Ok(Settings {
        model_name,
        temperature,
    })
}

/// Fail early, with setup instructions, when no API key is configured.
pub fn require_api_key() -> Result<()> {
    check_api_key(std::env::var(API_KEY_VAR).ok())
}

fn check_api_key(value: Option<String>) -> Result<()> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(()),
        _ => Err(ChainflowError::Config(format!(
            "{API_KEY_VAR} environment variable is not set. \
             Please set it by running: export {API_KEY_VAR}=your_api_key"
        ))),
    }
}
