// Layered configuration for the Tollgate payment gateway
//
// Sources are applied in order, later ones winning key by key:
// built-in defaults, an optional file, an optional `.env` file, then
// `TOLLGATE_`-prefixed process environment variables.

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    ExchangeSettings, FeatureSettings, GatewaySettings, OrchestratorSettings,
    ProviderCredentials, Settings,
};
pub use validation::{ConfigValidator, Validate};

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Builds a validated [`Settings`] from layered sources.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    dotenv: Option<PathBuf>,
    env_prefix: Option<String>,
    overrides: Vec<Value>,
}

impl SettingsLoader {
    /// Loader reading `TOLLGATE_*` variables and nothing else
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: None,
            env_prefix: Some("TOLLGATE".to_string()),
            overrides: Vec::new(),
        }
    }

    /// Read a TOML, JSON or env file; the format follows the extension
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load a `.env` file into the process environment before reading it
    pub fn dotenv(mut self, path: impl AsRef<Path>) -> Self {
        self.dotenv = Some(path.as_ref().to_path_buf());
        self
    }

    /// Change the environment prefix
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignore the process environment entirely
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Apply a final in-memory overlay (highest precedence)
    pub fn with_override(mut self, overlay: Value) -> Self {
        self.overrides.push(overlay);
        self
    }

    /// Load, merge, deserialize and validate
    pub fn load(self) -> Result<Settings> {
        let mut document = serde_json::to_value(Settings::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        if let Some(path) = &self.file {
            let overlay = ConfigLoader::auto(path)?.load_file(path)?;
            tracing::debug!(path = %path.display(), "configuration file loaded");
            loader::merge(&mut document, overlay);
        }

        if let Some(path) = &self.dotenv {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        }

        if let Some(prefix) = &self.env_prefix {
            loader::merge(&mut document, EnvLoader::new(prefix.clone()).load());
        }

        for overlay in self.overrides {
            loader::merge(&mut document, overlay);
        }

        let settings: Settings = serde_json::from_value(document)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
