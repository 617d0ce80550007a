//! Network addresses for overlay nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OverlayError;

/// A host/port pair identifying a node's transport endpoint.
///
/// Equality is by host AND port; two nodes behind the same host are
/// distinguished by their ports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// An empty address (no host, port 0), used as a "not yet known" value.
    pub fn unspecified() -> Self {
        Self {
            host: String::new(),
            port: 0,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.host.is_empty() || self.port == 0
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NetworkAddress {
    type Err = OverlayError;

    /// Parse a `"host:port"` string. The host may itself contain colons
    /// (IPv6); the port is everything after the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| OverlayError::InvalidArgument(format!("address without port: {s}")))?;
        if host.is_empty() {
            return Err(OverlayError::InvalidArgument(format!(
                "address without host: {s}"
            )));
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| OverlayError::InvalidArgument(format!("bad port in address: {s}")))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_host_and_port() {
        let a = NetworkAddress::new("10.0.0.1", 8888);
        let b = NetworkAddress::new("10.0.0.1", 8888);
        let c = NetworkAddress::new("10.0.0.1", 8889);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parse_host_port() {
        let addr: NetworkAddress = "192.168.1.5:8888".parse().unwrap();
        assert_eq!(addr.host, "192.168.1.5");
        assert_eq!(addr.port, 8888);
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!("192.168.1.5".parse::<NetworkAddress>().is_err());
        assert!(":8888".parse::<NetworkAddress>().is_err());
        assert!("host:notaport".parse::<NetworkAddress>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let addr = NetworkAddress::new("example.org", 1234);
        let parsed: NetworkAddress = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn unspecified_is_detected() {
        assert!(NetworkAddress::unspecified().is_unspecified());
        assert!(NetworkAddress::new("", 1).is_unspecified());
        assert!(NetworkAddress::new("h", 0).is_unspecified());
        assert!(!NetworkAddress::new("h", 1).is_unspecified());
    }
}
