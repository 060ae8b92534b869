//! `<scheme>://<host>:<port>` tunnel addresses

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddrError {
    #[error("missing '://' separator in '{0}'")]
    MissingScheme(String),

    #[error("unsupported scheme '{0}', expected 'tcp' or 'ws'")]
    UnsupportedScheme(String),

    #[error("missing port in '{0}'")]
    MissingPort(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Carrier protocol for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelScheme {
    Tcp,
    Ws,
}

impl fmt::Display for TunnelScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelScheme::Tcp => write!(f, "tcp"),
            TunnelScheme::Ws => write!(f, "ws"),
        }
    }
}

/// Parsed tunnel endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct TunnelAddr {
    pub scheme: TunnelScheme,
    pub host: String,
    pub port: u16,
}

impl FromStr for TunnelAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| AddrError::MissingScheme(s.to_string()))?;

        let scheme = match scheme {
            "tcp" => TunnelScheme::Tcp,
            "ws" => TunnelScheme::Ws,
            other => return Err(AddrError::UnsupportedScheme(other.to_string())),
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| AddrError::MissingPort(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AddrError::InvalidPort(port.to_string()))?;

        // An empty host binds/dials the wildcard address.
        let host = if host.is_empty() { "0.0.0.0" } else { host };

        Ok(Self { scheme, host: host.to_string(), port })
    }
}

impl TryFrom<String> for TunnelAddr {
    type Error = AddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for TunnelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
