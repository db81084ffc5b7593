use linfer_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Wait after a file appears before loading it, so a writer can finish
    pub settle_delay_ms: u64,
    /// How often each watched directory is scanned
    pub poll_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { settle_delay_ms: 500, poll_interval_ms: 1000 }
    }
}

impl RegistryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::from_json("{}").unwrap();
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json() {
        let config = RegistryConfig::from_json(r#"{"poll_interval_ms": 50}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.settle_delay_ms, 500);
    }

    #[test]
    fn test_invalid() {
        assert!(RegistryConfig::from_json("not json").is_err());
        assert!(matches!(
            RegistryConfig::from_json(r#"{"poll_interval_ms": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
    }
}
