//! # Endpoint Module
//!
//! This module defines network endpoint identity: a resolved IP/port pair or
//! a not-yet-resolved hostname/port pair.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

/// A network endpoint.
///
/// An endpoint is *unresolved* while it carries only a hostname; passing an
/// unresolved endpoint to a connect operation triggers asynchronous name
/// resolution. Once resolved, the IP address is filled in and the hostname
/// is kept for display and TLS-name purposes.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    /// Resolved address, if any (IPv4 or IPv6, carried transparently)
    ip: Option<IpAddr>,
    /// Port number
    port: u16,
    /// Hostname this endpoint was created from, if any
    hostname: Option<String>,
}

impl Endpoint {
    /// Create a resolved endpoint from an address and port
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: Some(ip),
            port,
            hostname: None,
        }
    }

    /// Create an unresolved endpoint from a hostname and port
    pub fn unresolved(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            ip: None,
            port,
            hostname: Some(hostname.into()),
        }
    }

    /// Resolved address, if any
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hostname, if this endpoint was created from one
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// True while this endpoint carries only a name
    pub fn is_unresolved(&self) -> bool {
        self.ip.is_none()
    }

    /// Substitute the resolved address, keeping hostname and port
    pub fn set_resolved(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    /// Flat socket-address form; `None` while unresolved
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ip, &self.hostname) {
            (Some(IpAddr::V6(ip)), _) => write!(f, "[{}]:{}", ip, self.port),
            (Some(ip), _) => write!(f, "{}:{}", ip, self.port),
            (None, Some(host)) => write!(f, "{}:{}", host, self.port),
            (None, None) => write!(f, "<nil>:{}", self.port),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port && self.hostname == other.hostname
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
        self.hostname.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_resolved_endpoint() {
        let ep = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5222);
        assert!(!ep.is_unresolved());
        assert_eq!(ep.port(), 5222);
        assert_eq!(ep.ip(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(ep.hostname().is_none());
    }

    #[test]
    fn test_unresolved_endpoint() {
        let ep = Endpoint::unresolved("xmpp.example.com", 5222);
        assert!(ep.is_unresolved());
        assert_eq!(ep.hostname(), Some("xmpp.example.com"));
        assert!(ep.to_socket_addr().is_none());
    }

    #[test]
    fn test_resolution_substitutes_address() {
        let mut ep = Endpoint::unresolved("xmpp.example.com", 5222);
        ep.set_resolved(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(!ep.is_unresolved());
        assert_eq!(ep.hostname(), Some("xmpp.example.com"));
        assert_eq!(
            ep.to_socket_addr(),
            Some("10.0.0.7:5222".parse().unwrap())
        );
    }

    #[test]
    fn test_socket_addr_round_trip() {
        for addr in ["127.0.0.1:80", "192.168.1.9:5269", "[::1]:5222"] {
            let addr: SocketAddr = addr.parse().unwrap();
            assert_eq!(Endpoint::from(addr).to_socket_addr(), Some(addr));
        }
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5222);
        assert_eq!(ep.to_string(), "10.0.0.1:5222");

        let ep = Endpoint::unresolved("example.com", 5223);
        assert_eq!(ep.to_string(), "example.com:5223");

        let addr: SocketAddr = "[::1]:5222".parse().unwrap();
        assert_eq!(Endpoint::from(addr).to_string(), "[::1]:5222");
    }

    #[test]
    fn test_equality_compares_full_tuple() {
        let a = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5222);
        let b = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5222);
        let c = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5223);
        assert_eq!(a, b);
        assert_ne!(a, c);

        // A resolved endpoint with a hostname is distinguishable from the
        // bare address form.
        let mut named = Endpoint::unresolved("localhost", 5222);
        named.set_resolved(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(a, named);
    }
}
