use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
    Flag,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
            ConfigSource::Flag => write!(f, "flag"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Realtime server (e.g. "http://localhost:8080")
    pub server_url: ConfigValue<String>,
    /// Account email used to sign in
    pub email: ConfigValue<Option<String>>,
    /// Account password; never printed
    #[serde(skip)]
    pub password: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut server_url =
            ConfigValue::new(DEFAULT_SERVER_URL.to_string(), ConfigSource::Default);
        let mut email = ConfigValue::new(None, ConfigSource::Default);
        let mut password = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(value) = file_config.email {
                email = ConfigValue::new(Some(value), ConfigSource::File);
            }
            if let Some(value) = file_config.password {
                password = ConfigValue::new(Some(value), ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("GROCR_SERVER_URL") {
            server_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("GROCR_EMAIL") {
            email = ConfigValue::new(Some(value), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("GROCR_PASSWORD") {
            password = ConfigValue::new(Some(value), ConfigSource::Environment);
        }

        Ok(Self {
            server_url,
            email,
            password,
            config_file,
        })
    }

    /// Applies `--email`/`--password` flags on top of everything else.
    pub fn with_credentials(mut self, email: Option<String>, password: Option<String>) -> Self {
        if let Some(value) = email {
            self.email = ConfigValue::new(Some(value), ConfigSource::Flag);
        }
        if let Some(value) = password {
            self.password = ConfigValue::new(Some(value), ConfigSource::Flag);
        }
        self
    }

    /// Email and password, if both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.email.value, &self.password.value) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/grocr/
    /// - macOS: ~/Library/Application Support/grocr/
    /// - Windows: %APPDATA%/grocr/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grocr")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn clear_env() {
        for var in ["GROCR_SERVER_URL", "GROCR_EMAIL", "GROCR_PASSWORD"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        clear_env();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.config_file.is_none());
        assert_eq!(config.email.source, ConfigSource::Default);
    }

    #[test]
    fn test_load_from_file() {
        clear_env();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "email: a@x.com").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.email.value.as_deref(), Some("a@x.com"));
        assert_eq!(config.email.source, ConfigSource::File);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "password: fromfile").unwrap();

        // Set env var
        std::env::set_var("GROCR_PASSWORD", "fromenv");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.password.value.as_deref(), Some("fromenv"));
        assert_eq!(config.password.source, ConfigSource::Environment);

        // Clean up
        std::env::remove_var("GROCR_PASSWORD");
    }

    #[test]
    fn test_flags_override_everything() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "email: file@x.com").unwrap();

        let config = Config::load(Some(config_path))
            .unwrap()
            .with_credentials(Some("flag@x.com".to_string()), Some("secret1".to_string()));
        assert_eq!(config.email.source, ConfigSource::Flag);
        assert_eq!(config.credentials(), Some(("flag@x.com", "secret1")));
    }

    #[test]
    fn test_credentials_require_both_values() {
        let config = Config {
            server_url: ConfigValue::new(DEFAULT_SERVER_URL.to_string(), ConfigSource::Default),
            email: ConfigValue::new(Some("a@x.com".to_string()), ConfigSource::Flag),
            password: ConfigValue::new(None, ConfigSource::Default),
            config_file: None,
        };
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_password_is_not_serialized() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load(Some(temp_dir.path().join("none.yaml")))
            .unwrap()
            .with_credentials(None, Some("secret1".to_string()));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret1"));
        assert!(json.contains("server_url"));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
