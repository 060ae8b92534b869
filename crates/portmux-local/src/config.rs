//! Local-side YAML configuration
//!
//! ```yaml
//! remote-server:
//!   - name: home
//!     addr: tcp://203.0.113.7:7000
//! proxy_list:
//!   - type: ssh
//!     local: 13022
//!     remote: 22
//!     remote_name: home
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

/// Top-level local-side configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Remote servers reachable from this side, each carrying one tunnel.
    #[serde(rename = "remote-server")]
    pub remote_servers: Vec<RemoteEndpoint>,

    /// Services to expose, one listening port each.
    pub proxy_list: Vec<ProxyConfig>,
}

/// One tunnel endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEndpoint {
    pub name: String,
    pub addr: TunnelAddr,
}

/// One proxied service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Informational protocol label (ssh, http, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Port to listen on locally.
    pub local: u16,

    /// Backend port on the remote side's loopback.
    pub remote: u16,

    /// Which tunnel to route through.
    pub remote_name: String,
}

impl LocalConfig {
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
    fn test_parse_full_config() {
        let yaml = r#"
remote-server:
  - name: home
    addr: tcp://203.0.113.7:7000
  - name: office
    addr: ws://198.51.100.2:8080
proxy_list:
  - type: ssh
    local: 13022
    remote: 22
    remote_name: home
  - type: http
    local: 13080
    remote: 8080
    remote_name: office
"#;
        let config = LocalConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.remote_servers.len(), 2);
        assert_eq!(config.remote_servers[0].name, "home");
        assert_eq!(config.remote_servers[0].addr.scheme, TunnelScheme::Tcp);
        assert_eq!(config.remote_servers[1].addr.scheme, TunnelScheme::Ws);
        assert_eq!(config.remote_servers[1].addr.port, 8080);

        assert_eq!(config.proxy_list.len(), 2);
        assert_eq!(config.proxy_list[0].kind, "ssh");
        assert_eq!(config.proxy_list[0].local, 13022);
        assert_eq!(config.proxy_list[0].remote, 22);
        assert_eq!(config.proxy_list[1].remote_name, "office");
    }

    #[test]
    fn test_bad_scheme_is_rejected() {
        let yaml = r#"
remote-server:
  - name: home
    addr: quic://203.0.113.7:7000
proxy_list: []
"#;
        assert!(matches!(
            LocalConfig::from_yaml(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_section_is_rejected() {
        assert!(LocalConfig::from_yaml("proxy_list: []").is_err());
    }
}
