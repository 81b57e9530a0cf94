//! Asynchronous name resolution for `connect` on unresolved endpoints.
//!
//! Resolution itself is an injected capability; the default implementation
//! delegates to the OS resolver. Each lookup runs on a short-lived worker
//! thread and reports back to the pump thread through the server's DNS
//! channel plus a wake-up.

use std::net::{IpAddr, ToSocketAddrs};

use mio::Token;
use tracing::debug;

use super::{DnsOutcome, PollContext, SocketError};

/// Name resolution capability.
pub trait Resolver: Send + Sync {
    /// Resolve a hostname to a single address. Blocking; called off the
    /// pump thread.
    fn resolve(&self, hostname: &str) -> Result<IpAddr, SocketError>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str) -> Result<IpAddr, SocketError> {
        let mut addrs = (hostname, 0u16)
            .to_socket_addrs()
            .map_err(|_| SocketError::HostNotFound)?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or(SocketError::HostNotFound)
    }
}

pub(crate) fn spawn_lookup(
    ctx: &PollContext,
    token: Token,
    generation: u64,
    hostname: String,
    port: u16,
) {
    let resolver = ctx.resolver.clone();
    let tx = ctx.dns_tx.clone();
    let wakeup = ctx.wakeup.clone();
    std::thread::spawn(move || {
        let result = resolver.resolve(&hostname);
        debug!(host = %hostname, ok = result.is_ok(), "name lookup finished");
        // The receiver may be gone if the server was dropped mid-lookup.
        let _ = tx.send(DnsOutcome {
            token,
            generation,
            port,
            result,
        });
        wakeup.wake();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_resolver_numeric() {
        let ip = SystemResolver.resolve("127.0.0.1").unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_system_resolver_unknown_host() {
        let err = SystemResolver
            .resolve("no-such-host.invalid")
            .unwrap_err();
        assert_eq!(err, SocketError::HostNotFound);
    }
}
