//! HTTP client construction hook.
//!
//! Code under test builds its clients through [`client_builder`] or
//! [`build_client`]. Outside tests these are plain `reqwest` builders. A test
//! installs a [`ClientOverride`] and, while the returned guard lives, every
//! client built through the hook resolves names with the test's resolver,
//! skips certificate verification and ignores system proxies. Requests naming
//! an explicit port for a host the resolver answers are forwarded to the
//! resolved address as well, so no configured host can reach a real socket.
//!
//! The override slot is process wide. Tests installing one should run
//! serially.

use core::fmt;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{Proxy, Url};

use crate::config::HarnessConfig;
use crate::errors::NetsimResult;
use crate::resolver::HostResolver;

static CLIENT_OVERRIDE: RwLock<Option<Arc<ClientOverride>>> = RwLock::new(None);

/// Connector configuration substituted into every client built through the hook.
#[derive(Clone)]
pub struct ClientOverride {
    resolver: Arc<dyn HostResolver>,
    accept_invalid_certs: bool,
}

// -- Constructors

impl ClientOverride {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self::with_config(resolver, &HarnessConfig::default())
    }

    pub fn with_config(resolver: Arc<dyn HostResolver>, config: &HarnessConfig) -> Self {
        Self {
            resolver,
            accept_invalid_certs: config.get_accept_invalid_certs(),
        }
    }

    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

// -- Client building

impl ClientOverride {
    /// A `reqwest` builder wired to this override's resolver.
    #[must_use]
    pub fn builder(&self) -> reqwest::ClientBuilder {
        let port_resolver = Arc::clone(&self.resolver);

        reqwest::Client::builder()
            .dns_resolver(Arc::new(ConnectorResolver(Arc::clone(&self.resolver))))
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .no_proxy()
            .proxy(Proxy::custom(move |url| {
                explicit_port_target(port_resolver.as_ref(), url)
            }))
    }

    /// Installs this override process wide until the guard is dropped.
    pub fn install(self) -> ClientOverrideGuard {
        let installed = Arc::new(self);
        let previous = CLIENT_OVERRIDE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&installed));

        tracing::debug!(
            "Installed http client override (replacing existing: {})",
            previous.is_some()
        );

        ClientOverrideGuard {
            previous,
            installed,
        }
    }
}

impl fmt::Debug for ClientOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOverride")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

/// Restores the previously installed override (or none) when dropped.
///
/// Guards must be dropped in reverse order of installation.
#[must_use = "the client override is removed as soon as the guard is dropped"]
pub struct ClientOverrideGuard {
    previous: Option<Arc<ClientOverride>>,
    installed: Arc<ClientOverride>,
}

impl ClientOverrideGuard {
    #[must_use]
    pub fn client_override(&self) -> &ClientOverride {
        &self.installed
    }
}

impl Drop for ClientOverrideGuard {
    fn drop(&mut self) {
        let mut slot = CLIENT_OVERRIDE
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let still_ours = slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.installed));
        if !still_ours {
            tracing::warn!("Client override guards dropped out of order");
        }

        *slot = self.previous.take();
        tracing::debug!("Restored http client override");
    }
}

impl fmt::Debug for ClientOverrideGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOverrideGuard")
            .field("installed", &self.installed)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

/// Forward target for a URL carrying an explicit port.
///
/// The connector lets an explicit URL port replace the resolved one, which
/// would send `http://configured.host:8080/` to whatever listens on
/// `127.0.0.1:8080`. Such requests are proxied to the resolved address
/// instead; the fake server accepts absolute-form request targets.
fn explicit_port_target(resolver: &dyn HostResolver, url: &Url) -> Option<String> {
    if url.port().is_none() || resolver.is_blocking() {
        return None;
    }

    let host = url.domain()?;
    let address = resolver.resolve(host).ok()?;
    if address.port() == 0 {
        return None;
    }

    tracing::debug!("Forwarding {url} to fake server at {address}");
    Some(format!("http://{address}"))
}

type ResolveResult = Result<Addrs, Box<dyn Error + Send + Sync>>;

fn into_addrs(result: NetsimResult<SocketAddr>) -> ResolveResult {
    result
        .map(|addr| Box::new(std::iter::once(addr)) as Addrs)
        .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)
}

/// Adapts a [`HostResolver`] to reqwest's resolver interface.
///
/// Resolvers doing blocking I/O run on tokio's blocking pool.
struct ConnectorResolver(Arc<dyn HostResolver>);

impl Resolve for ConnectorResolver {
    fn resolve(&self, name: Name) -> Resolving {
        if !self.0.is_blocking() {
            return Box::pin(futures::future::ready(into_addrs(
                self.0.resolve(name.as_str()),
            )));
        }

        let resolver = Arc::clone(&self.0);
        let host = name.as_str().to_string();
        Box::pin(async move {
            let result = tokio::task::spawn_blocking(move || resolver.resolve(&host))
                .await
                .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)?;
            into_addrs(result)
        })
    }
}

fn current_override() -> Option<Arc<ClientOverride>> {
    CLIENT_OVERRIDE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// True while a [`ClientOverrideGuard`] is alive.
#[must_use]
pub fn override_installed() -> bool {
    current_override().is_some()
}

/// Client builder for application code, honours an installed override.
#[must_use]
pub fn client_builder() -> reqwest::ClientBuilder {
    match current_override() {
        Some(client_override) => client_override.builder(),
        None => reqwest::Client::builder(),
    }
}

/// Builds a client through [`client_builder`].
///
/// # Errors
///
/// Returns [`crate::NetsimError::Client`] if reqwest fails to build the client.
pub fn build_client() -> NetsimResult<reqwest::Client> {
    Ok(client_builder().build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::HostSet;
    use crate::resolver::{FakeResolver, SystemResolver};
    use crate::server::BoundAddress;
    use serial_test::serial;
    use std::thread::{self, ThreadId};

    fn fake_override(port: u16) -> ClientOverride {
        let hosts = HostSet::new(["testnet.blockchain.info"]).unwrap();
        let address = BoundAddress::new(SocketAddr::from(([127, 0, 0, 1], port)));
        ClientOverride::new(Arc::new(FakeResolver::from_bound(&hosts, address)))
    }

    /// WHY: The override must never leak past the test that installed it
    /// WHAT: Dropping the guard uninstalls the override
    #[test]
    #[serial]
    fn test_guard_restores_on_drop() {
        assert!(!override_installed());
        {
            let _guard = fake_override(1000).install();
            assert!(override_installed());
            assert!(build_client().is_ok());
        }
        assert!(!override_installed());
    }

    #[test]
    #[serial]
    fn test_nested_guards_restore_in_order() {
        let outer = fake_override(1000).install();
        let outer_ptr = Arc::as_ptr(&outer.installed);
        {
            let _inner = fake_override(2000).install();
            let current = current_override().unwrap();
            assert_ne!(Arc::as_ptr(&current), outer_ptr);
        }

        let current = current_override().unwrap();
        assert_eq!(Arc::as_ptr(&current), outer_ptr);

        drop(outer);
        assert!(!override_installed());
    }

    /// WHY: A failing assertion must not leave the override installed
    /// WHAT: The guard restores the slot while unwinding from a panic
    #[test]
    #[serial]
    fn test_guard_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = fake_override(1000).install();
            assert!(override_installed());
            panic!("test body failed");
        });

        assert!(result.is_err());
        assert!(!override_installed());
    }

    #[test]
    fn test_connector_resolver_maps_errors() {
        let hosts = HostSet::new(["testnet.blockchain.info"]).unwrap();
        let address = BoundAddress::new(SocketAddr::from(([127, 0, 0, 1], 4000)));
        let resolver = ConnectorResolver(Arc::new(FakeResolver::from_bound(&hosts, address)));

        let known = futures::executor::block_on(
            resolver.resolve("testnet.blockchain.info".parse().unwrap()),
        )
        .expect("known host resolves")
        .collect::<Vec<_>>();
        assert_eq!(known, vec![address.socket_addr()]);

        let unknown =
            futures::executor::block_on(resolver.resolve("blockchain.info".parse().unwrap()));
        let err = unknown.err().expect("unknown host fails");
        assert!(err.to_string().contains("blockchain.info"));
    }

    #[test]
    fn test_explicit_port_target_for_configured_hosts() {
        let hosts = HostSet::new(["testnet.blockchain.info"]).unwrap();
        let address = BoundAddress::new(SocketAddr::from(([127, 0, 0, 1], 4000)));
        let resolver = FakeResolver::from_bound(&hosts, address);
        let target = |raw: &str| explicit_port_target(&resolver, &Url::parse(raw).unwrap());

        assert_eq!(
            target("http://testnet.blockchain.info:8080/unspent"),
            Some("http://127.0.0.1:4000".to_string())
        );
        assert_eq!(target("http://testnet.blockchain.info/unspent"), None);
        assert_eq!(target("http://blockchain.info:8080/unspent"), None);
        assert_eq!(target("http://127.0.0.1:8080/unspent"), None);
    }

    /// Records the thread each lookup ran on.
    struct ThreadRecordingResolver(std::sync::Mutex<Vec<ThreadId>>);

    impl HostResolver for ThreadRecordingResolver {
        fn resolve(&self, _host: &str) -> NetsimResult<SocketAddr> {
            self.0.lock().unwrap().push(thread::current().id());
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }

        fn is_blocking(&self) -> bool {
            true
        }
    }

    /// WHY: getaddrinfo blocks, running it on a runtime thread stalls every
    /// other task scheduled there
    /// WHAT: Blocking resolvers are moved to the blocking pool
    #[tokio::test]
    async fn test_blocking_resolvers_run_off_the_runtime_thread() {
        let recording = Arc::new(ThreadRecordingResolver(std::sync::Mutex::new(Vec::new())));
        let resolver = ConnectorResolver(recording.clone());

        let addrs = resolver
            .resolve("testnet.blockchain.info".parse().unwrap())
            .await
            .expect("recording resolver always answers")
            .collect::<Vec<_>>();
        assert_eq!(addrs.len(), 1);

        let seen = recording.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_ne!(seen[0], thread::current().id());
    }

    #[tokio::test]
    async fn test_system_resolver_through_connector() {
        assert!(SystemResolver::new().is_blocking());

        let resolver = ConnectorResolver(Arc::new(SystemResolver::new()));
        let addrs = resolver
            .resolve("localhost".parse().unwrap())
            .await
            .expect("localhost should resolve")
            .collect::<Vec<_>>();
        assert!(addrs.iter().all(|addr| addr.ip().is_loopback()));
    }
}
