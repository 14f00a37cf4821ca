//! One-call fixture: fake server, fake resolver and client override together.

use std::sync::Arc;

use crate::client::{self, ClientOverride, ClientOverrideGuard};
use crate::config::HarnessConfig;
use crate::errors::NetsimResult;
use crate::resolver::FakeResolver;
use crate::routes::Route;
use crate::server::{BoundAddress, FakeServerHandle, RecordedRequest};
use crate::{build_fake_resolver, create_fake_server_with_config};

/// A running fake server whose hosts every hooked client resolves to.
///
/// The client override is installed for as long as the network lives. Drop
/// order restores the override before the server is told to shut down.
///
/// # Examples
///
/// ```rust,no_run
/// use foundation_netsim::{FakeNetwork, FakeResponse, Route};
///
/// # async fn run() -> foundation_netsim::NetsimResult<()> {
/// let network = FakeNetwork::start(
///     ["testnet.blockchain.info"],
///     [Route::get("/unspent", FakeResponse::ok("[]"))],
/// )
/// .await?;
///
/// let body = network
///     .client()?
///     .get("http://testnet.blockchain.info/unspent")
///     .send()
///     .await?
///     .text()
///     .await?;
/// assert_eq!(body, "[]");
///
/// network.shutdown().await
/// # }
/// ```
#[derive(Debug)]
pub struct FakeNetwork {
    guard: Option<ClientOverrideGuard>,
    resolver: Arc<FakeResolver>,
    handle: FakeServerHandle,
}

impl FakeNetwork {
    /// Starts a server for `hosts` and installs the client override.
    ///
    /// # Errors
    ///
    /// Fails on invalid hosts, route registration errors or bind failures.
    pub async fn start<H, S, R>(hosts: H, routes: R) -> NetsimResult<Self>
    where
        H: IntoIterator<Item = S>,
        S: AsRef<str>,
        R: IntoIterator<Item = Route>,
    {
        Self::start_with_config(hosts, routes, HarnessConfig::default()).await
    }

    /// Like [`FakeNetwork::start`] with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Same as [`FakeNetwork::start`].
    pub async fn start_with_config<H, S, R>(
        hosts: H,
        routes: R,
        config: HarnessConfig,
    ) -> NetsimResult<Self>
    where
        H: IntoIterator<Item = S>,
        S: AsRef<str>,
        R: IntoIterator<Item = Route>,
    {
        let handle = create_fake_server_with_config(hosts, routes, config).await?;
        let resolver = Arc::new(build_fake_resolver(&handle));
        let guard = ClientOverride::with_config(resolver.clone(), &config).install();

        tracing::info!(
            "Fake network up for {} at {}",
            handle.hosts(),
            handle.address()
        );

        Ok(Self {
            guard: Some(guard),
            resolver,
            handle,
        })
    }

    /// Builds a client through the override hook.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetsimError::Client`] if reqwest fails to build it.
    pub fn client(&self) -> NetsimResult<reqwest::Client> {
        client::build_client()
    }

    #[must_use]
    pub fn address(&self) -> BoundAddress {
        self.handle.address()
    }

    #[must_use]
    pub fn resolver(&self) -> &FakeResolver {
        &self.resolver
    }

    #[must_use]
    pub fn server(&self) -> &FakeServerHandle {
        &self.handle
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.handle.requests()
    }

    /// Uninstalls the override, then stops the server.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetsimError::ShutdownTimeout`] when in-flight
    /// connections do not finish in time.
    pub async fn shutdown(mut self) -> NetsimResult<()> {
        drop(self.guard.take());
        self.handle.stop().await
    }
}
