// Configuration file loaders

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    /// Load configuration from file
    pub fn load_file(&self, path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.parse(&content)
    }

    /// Parse configuration from string
    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e))),
            FileFormat::Toml => {
                let toml_value: toml::Value = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(toml_value).map_err(|e| {
                    ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e))
                })
            }
            FileFormat::Env => Ok(crate::env::nest(parse_env_lines(content), None)),
        }
    }
}

/// Parse `KEY=value` lines, skipping blanks and comments.
pub(crate) fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in the overlay replaces the base value.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let result = loader.parse(r#"{"settlement_currency": "DOP"}"#).unwrap();
        assert_eq!(result["settlement_currency"], "DOP");
    }

    #[test]
    fn test_parse_toml_nested() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            settlement_currency = "DOP"

            [exchange]
            tax_rate = "0.0015"
            cache_ttl_secs = 600
        "#;

        let result = loader.parse(toml).unwrap();
        assert_eq!(result["exchange"]["cache_ttl_secs"], 600);
        assert_eq!(result["exchange"]["tax_rate"], "0.0015");
    }

    #[test]
    fn test_parse_env_file_nests_keys() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let env = r#"
            # Orchestrator
            ORCHESTRATOR__PROVIDER_TIMEOUT_MS=15000
            SETTLEMENT_CURRENCY="DOP"
        "#;

        let result = loader.parse(env).unwrap();
        assert_eq!(result["orchestrator"]["provider_timeout_ms"], 15000);
        assert_eq!(result["settlement_currency"], "DOP");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("JSON"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("toml"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("env"), Some(FileFormat::Env));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert!(ConfigLoader::auto(Path::new("gateway")).is_err());
    }

    #[test]
    fn test_merge_overlays_nested_objects() {
        let mut base = json!({"exchange": {"cache_ttl_secs": 3600, "tax_rate": "0.0015"}});
        merge(&mut base, json!({"exchange": {"cache_ttl_secs": 60}}));

        assert_eq!(base["exchange"]["cache_ttl_secs"], 60);
        assert_eq!(base["exchange"]["tax_rate"], "0.0015");
    }
}
