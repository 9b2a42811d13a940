//! Configuration management for chaser-locator

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page-level CDP WebSocket endpoint
    pub cdp_endpoint: String,

    /// Default locator timeout in milliseconds (0 disables the timeout)
    pub default_timeout: u64,

    /// Timeout for a single CDP command in seconds
    pub command_timeout: u64,

    /// Path to a replacement for the injected matcher bundle
    pub utility_script: Option<String>,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cdp_endpoint: "ws://localhost:9222/devtools/page".to_string(),
            default_timeout: 30000,
            command_timeout: 30,
            utility_script: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Override fields with any `CHASER_*` variables that are set
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = env::var("CHASER_CDP_ENDPOINT") {
            self.cdp_endpoint = endpoint;
        }

        if let Ok(timeout) = env::var("CHASER_DEFAULT_TIMEOUT") {
            self.default_timeout = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_DEFAULT_TIMEOUT"))?;
        }

        if let Ok(timeout) = env::var("CHASER_COMMAND_TIMEOUT") {
            self.command_timeout = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid CHASER_COMMAND_TIMEOUT"))?;
        }

        if let Ok(path) = env::var("CHASER_UTILITY_SCRIPT") {
            self.utility_script = Some(path);
        }

        if let Ok(log_level) = env::var("CHASER_LOG_LEVEL") {
            self.log_level = log_level;
        }

        Ok(())
    }

    /// Source of the injected matcher bundle: the configured file, or the built-in one
    pub fn utility_source(&self) -> Result<String> {
        match &self.utility_script {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                Error::configuration(format!("Failed to read utility script {}: {}", path, e))
            }),
            None => Ok(crate::session::DEFAULT_UTILITY_SCRIPT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_timeout, 30000);
        assert_eq!(config.command_timeout, 30);
        assert!(config.utility_script.is_none());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cdp_endpoint = \"ws://127.0.0.1:9333/devtools/page/X\"").unwrap();
        writeln!(file, "default_timeout = 500").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.cdp_endpoint, "ws://127.0.0.1:9333/devtools/page/X");
        assert_eq!(config.default_timeout, 500);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_timeout = \"soon\"").unwrap();

        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_builtin_utility_source() {
        let source = Config::default().utility_source().unwrap();
        assert!(source.contains("pQuerySelectorAll"));
    }
}
