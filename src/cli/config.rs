use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::{ClientConfig, Credentials, EndpointBases, Region};

pub const CONFIG_FILENAME: &str = ".pumpsync.toml";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub identity: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Host overrides, e.g. for a self-hosted mirror.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointBases>,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    pub fn new(identity: impl Into<String>, region: Region) -> Self {
        Self {
            identity: identity.into(),
            region,
            device_id: None,
            cache_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            endpoints: None,
        }
    }

    pub fn load() -> Result<Self> {
        load_config_from_path(CONFIG_FILENAME)
    }

    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(CONFIG_FILENAME, content)?;
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            region: self.region,
            endpoint_bases: self.endpoints.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn credentials(&self, secret: impl Into<String>) -> Credentials {
        Credentials {
            identity: self.identity.clone(),
            secret: secret.into(),
            region: self.region,
            device_id: self.device_id.clone(),
        }
    }

    /// Configured cache directory, else `<platform cache dir>/pumpsync`.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join("pumpsync"))
            .context("No platform cache directory; set cache_dir in the config file")
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}

pub fn try_load_config() -> Option<Config> {
    Config::load().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
identity = "someone@example.com"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.identity, "someone@example.com");
        assert_eq!(config.region, Region::Us);
        assert_eq!(config.device_id, None);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.endpoints.is_none());
    }

    #[test]
    fn test_load_config_not_found() {
        let result = load_config_from_path("/nonexistent/.pumpsync.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_full_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
identity = "someone@example.com"
region = "EU"
device_id = "1234567"
cache_dir = "/var/cache/pumpsync"
request_timeout_secs = 5

[endpoints]
sso = "http://127.0.0.1:9000"
services = "http://127.0.0.1:9000"
api = "http://127.0.0.1:9000"
"#,
        )
        .unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.region, Region::Eu);
        assert_eq!(config.device_id.as_deref(), Some("1234567"));
        assert_eq!(
            config.resolve_cache_dir().unwrap(),
            PathBuf::from("/var/cache/pumpsync")
        );

        let client = config.client_config();
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert_eq!(
            client.endpoint_bases.unwrap().api,
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
identity = "someone@example.com"
region = "APAC"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_credentials_carry_region_and_device() {
        let mut config = Config::new("someone@example.com", Region::Eu);
        config.device_id = Some("42".to_string());

        let creds = config.credentials("hunter2");
        assert_eq!(creds.identity, "someone@example.com");
        assert_eq!(creds.secret, "hunter2");
        assert_eq!(creds.region, Region::Eu);
        assert_eq!(creds.device_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_saved_config_omits_unset_fields() {
        let content = toml::to_string_pretty(&Config::new("a@b.c", Region::Us)).unwrap();
        assert!(content.contains("identity = \"a@b.c\""));
        assert!(content.contains("region = \"US\""));
        assert!(!content.contains("device_id"));
        assert!(!content.contains("[endpoints]"));
    }
}
