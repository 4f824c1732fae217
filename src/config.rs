use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

use crate::storage::{source_for, TableSource, DEFAULT_SOURCE_URL};

pub const CONFIG_ENV: &str = "COVID_QL_CONFIG";
pub const SOURCE_ENV: &str = "COVID_QL_SOURCE";
pub const BIND_ENV: &str = "COVID_QL_BIND";
pub const LOG_ENV: &str = "COVID_QL_LOG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL or file path of the confirmed cases CSV.
    pub source: String,
    pub bind: SocketAddr,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_URL.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Defaults, then the JSON file named by `COVID_QL_CONFIG`, then the
    /// individual environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(source) = lookup(SOURCE_ENV) {
            self.source = source;
        }
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind = bind
                .parse()
                .with_context(|| format!("Invalid {} '{}'", BIND_ENV, bind))?;
        }
        if let Some(level) = lookup(LOG_ENV) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level> {
        Level::from_str(&self.log_level)
            .map_err(|_| anyhow::anyhow!("Invalid log level '{}'", self.log_level))
    }

    pub fn table_source(&self) -> Box<dyn TableSource> {
        source_for(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.source, DEFAULT_SOURCE_URL);
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "source": "data/confirmed.csv" }}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.source, "data/confirmed.csv");
        assert_eq!(config.bind, Config::default().bind);
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "source = data.csv").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config file"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (SOURCE_ENV, "/tmp/confirmed.csv"),
            (BIND_ENV, "0.0.0.0:9000"),
            (LOG_ENV, "debug"),
        ]);

        let mut config = Config::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source, "/tmp/confirmed.csv");
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.log_level().unwrap(), Level::DEBUG);
        assert_eq!(config.table_source().describe(), "/tmp/confirmed.csv");
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(|name| (name == BIND_ENV).then(|| "not-an-addr".to_string()))
            .is_err());

        config.log_level = "loud".to_string();
        assert!(config.log_level().is_err());
    }
}
