//! Configuration loading utilities

use crate::{config::RpcConfig, ConfigError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

/// Configuration file formats
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Parse a document in this format
    pub fn parse(&self, content: &str) -> Result<RpcConfig> {
        match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(ConfigError::Yaml),
            ConfigFormat::Toml => toml::from_str(content).map_err(ConfigError::Toml),
            ConfigFormat::Json => serde_json::from_str(content).map_err(ConfigError::Json),
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    file_names: Vec<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            search_paths: vec![
                PathBuf::from("."),
                PathBuf::from("config"),
                PathBuf::from("/etc/minirpc"),
            ],
            file_names: vec!["minirpc".to_string(), "config".to_string()],
        }
    }
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that only searches the given directories
    pub fn with_search_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a search path
    pub fn add_search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Add a file name to search for
    pub fn add_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.file_names.push(name.into());
        self
    }

    /// Load configuration from a specific file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<RpcConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let format = ConfigFormat::from_extension(path).unwrap_or(ConfigFormat::Yaml);
        format.parse(&content)
    }

    /// Load configuration by searching for config files
    pub fn load(&self) -> Result<RpcConfig> {
        if let Some(path) = self.find_config_file() {
            tracing::info!("Loading configuration from: {}", path.display());
            return self.load_file(&path);
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(RpcConfig::default())
    }

    /// Load, apply `MINIRPC_*` overrides, then validate
    pub fn load_with_env(&self) -> Result<RpcConfig> {
        let config = self.load()?;
        let config = crate::env::apply_env_overrides(config)?;
        crate::validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate configuration file without keeping it
    pub fn validate_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = self.load_file(path)?;
        crate::validation::validate_config(&config)
    }

    /// Find the first available config file
    fn find_config_file(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for file_name in &self.file_names {
                for ext in &EXTENSIONS {
                    let path = search_path.join(format!("{}.{}", file_name, ext));
                    if path.is_file() {
                        return Some(path);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
app:
  name: "hello-service"
  environment: "test"

server:
  bind_address: "0.0.0.0:7000"
  read_idle_secs: 10

codec:
  serializer: "msgpack"
  compress: "none"

logging:
  level: "debug"
  format: "json"
"#;

        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ConfigLoader::new().load_file(file.path()).unwrap();
        assert_eq!(config.app.name, "hello-service");
        assert_eq!(config.server.bind_address, "0.0.0.0:7000");
        assert_eq!(config.server.read_idle_secs, 10);
        assert_eq!(config.codec.serializer, "msgpack");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.client.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
[client]
connect_timeout_ms = 250
request_timeout_ms = 1500

[load_balance]
strategy = "random"

[extensions]
search_paths = ["/opt/plugins"]
"#;

        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = ConfigLoader::new().load_file(file.path()).unwrap();
        assert_eq!(config.client.connect_timeout_ms, 250);
        assert_eq!(config.client.request_timeout_ms, Some(1500));
        assert_eq!(config.load_balance.strategy, "random");
        assert_eq!(config.extensions.search_paths, vec![PathBuf::from("/opt/plugins")]);
    }

    #[test]
    fn test_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("minirpc.json"),
            r#"{"registry": {"root_path": "/rpc"}}"#,
        )
        .unwrap();

        let config = ConfigLoader::with_search_paths([dir.path()]).load().unwrap();
        assert_eq!(config.registry.root_path, "/rpc");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::with_search_paths([dir.path()]).load().unwrap();
        assert_eq!(config.codec.serializer, "bincode");
    }

    #[test]
    fn test_validate_file_rejects_bad_values() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(br#"{"codec": {"max_frame_length": 4}}"#).unwrap();
        assert!(matches!(
            ConfigLoader::new().validate_file(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_extension(Path::new("a.yaml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.toml")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.ini")), None);
    }
}
