//! Hostname resolution for the HTTP client stack.
//!
//! [`FakeResolver`] answers only for hostnames served by fake servers and
//! fails loudly for anything else, there is no fallback to real DNS.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::errors::{NetsimError, NetsimResult};
use crate::hosts::{normalize, HostSet};
use crate::server::BoundAddress;

/// Pluggable hostname resolution.
pub trait HostResolver: Send + Sync {
    /// Resolves `host` to a socket address.
    ///
    /// A zero port means the caller should use the port of the URL.
    ///
    /// # Errors
    ///
    /// Returns [`NetsimError::UnknownHost`] when the host has no answer.
    fn resolve(&self, host: &str) -> NetsimResult<SocketAddr>;

    /// True when `resolve` does blocking I/O. Client connectors run such
    /// resolvers on tokio's blocking pool.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// System DNS resolver using `std::net::ToSocketAddrs`.
///
/// Not used by the harness itself, it is the real implementation fake
/// resolvers stand in for. Lookups call `getaddrinfo` and block the calling
/// thread.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl SystemResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> NetsimResult<SocketAddr> {
        if host.is_empty() {
            return Err(NetsimError::UnknownHost(host.to_string()));
        }

        (host, 0)
            .to_socket_addrs()
            .map_err(|err| {
                tracing::debug!("System resolution of {host} failed: {err}");
                NetsimError::UnknownHost(host.to_string())
            })?
            .next()
            .ok_or_else(|| NetsimError::UnknownHost(host.to_string()))
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

/// Hostname to bound address table backing a [`FakeResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverEntries(HashMap<String, BoundAddress>);

impl ResolverEntries {
    /// One entry per host, all pointing at `address`.
    #[must_use]
    pub fn new(hosts: &HostSet, address: BoundAddress) -> Self {
        Self(
            hosts
                .iter()
                .map(|host| (host.to_string(), address))
                .collect(),
        )
    }

    /// Adds the entries of `other`, hosts already present keep their address.
    #[must_use]
    pub fn merge(mut self, other: ResolverEntries) -> Self {
        for (host, address) in other.0 {
            self.0.entry(host).or_insert(address);
        }
        self
    }

    #[must_use]
    pub fn get(&self, host: &str) -> Option<BoundAddress> {
        self.0.get(&normalize(host)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolver that maps configured hostnames to fake server addresses.
#[derive(Debug, Clone)]
pub struct FakeResolver {
    entries: ResolverEntries,
}

impl FakeResolver {
    #[must_use]
    pub fn new(entries: ResolverEntries) -> Self {
        Self { entries }
    }

    /// Resolver answering every host in `hosts` with `address`.
    #[must_use]
    pub fn from_bound(hosts: &HostSet, address: BoundAddress) -> Self {
        Self::new(ResolverEntries::new(hosts, address))
    }

    #[must_use]
    pub fn entries(&self) -> &ResolverEntries {
        &self.entries
    }
}

impl HostResolver for FakeResolver {
    fn resolve(&self, host: &str) -> NetsimResult<SocketAddr> {
        match self.entries.get(host) {
            Some(address) => {
                tracing::debug!("Resolved {host} to fake server at {address}");
                Ok(address.socket_addr())
            }
            None => {
                tracing::error!(
                    "Refusing to resolve unconfigured host {host:?}, no fake server serves it"
                );
                Err(NetsimError::UnknownHost(host.to_string()))
            }
        }
    }
}
