//! Remote-side YAML configuration
//!
//! ```yaml
//! bind: tcp://0.0.0.0:7000
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use portmux_transport::TunnelAddr;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level remote-side configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Address to accept tunnels on.
    pub bind: TunnelAddr,
}

impl RemoteConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portmux_transport::TunnelScheme;

    #[test]
    fn test_parse_bind_addr() {
        let config = RemoteConfig::from_yaml("bind: ws://0.0.0.0:8080\n").unwrap();
        assert_eq!(config.bind.scheme, TunnelScheme::Ws);
        assert_eq!(config.bind.host, "0.0.0.0");
        assert_eq!(config.bind.port, 8080);
    }

    #[test]
    fn test_missing_bind_is_rejected() {
        assert!(RemoteConfig::from_yaml("{}").is_err());
    }
}
