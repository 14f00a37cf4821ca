//! Hermetic network simulation for HTTP client tests.
//!
//! This crate provides:
//! - **Fake servers**: real HTTP/1.1 listeners on ephemeral loopback ports,
//!   answering a fixed set of routes on behalf of public hostnames
//! - **Fake resolver**: maps those hostnames to the fake server and refuses
//!   everything else, nothing reaches real DNS
//! - **Client override**: a scoped hook making every `reqwest` client built
//!   through [`client::client_builder`] use the fake resolver
//!
//! # Examples
//!
//! ```rust,no_run
//! use foundation_netsim::{build_fake_resolver, create_fake_server, FakeResponse, Route};
//! use foundation_netsim::client::{self, ClientOverride};
//! use std::sync::Arc;
//!
//! # async fn run() -> foundation_netsim::NetsimResult<()> {
//! let mut server = create_fake_server(
//!     ["testnet.blockchain.info"],
//!     [Route::get("/unspent", FakeResponse::ok(r#"{"unspent_outputs": []}"#))],
//! )
//! .await?;
//!
//! let resolver = Arc::new(build_fake_resolver(&server));
//! let guard = ClientOverride::new(resolver).install();
//!
//! // Application code builds its client through the hook as usual.
//! let response = client::build_client()?
//!     .get("http://testnet.blockchain.info/unspent?active=mxVFsFW5N4mu1HPkxPttorvocvzeZ7KZyk")
//!     .send()
//!     .await?;
//! assert!(response.status().is_success());
//!
//! drop(guard);
//! server.stop().await
//! # }
//! ```
//!
//! The fake servers speak plain HTTP. Point the code under test at `http://`
//! URLs; the resolver supplies the port, and URLs naming a port for a faked
//! host are forwarded to the fake server as well.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod errors;
pub mod hosts;
pub mod http;
pub mod network;
pub mod resolver;
pub mod routes;
pub mod server;

pub use client::{ClientOverride, ClientOverrideGuard};
pub use config::HarnessConfig;
pub use errors::{
    BindError, BoxedError, ConfigError, NetsimError, NetsimResult, RouteRegistrationError,
};
pub use hosts::HostSet;
pub use crate::http::{async_handler_fn, handler_fn, FakeRequest, FakeResponse, RequestHandler};
pub use network::FakeNetwork;
pub use resolver::{FakeResolver, HostResolver, ResolverEntries, SystemResolver};
pub use routes::{Route, RouteTable};
pub use server::{
    BoundAddress, FakeServer, FakeServerHandle, RecordedRequest, ServerLifecycleState,
};

/// Builds a fake server for `hosts`, registers `routes` and starts it.
///
/// # Errors
///
/// Fails on an invalid hostname, an invalid or duplicate route, or when the
/// listener cannot be bound.
pub async fn create_fake_server<H, S, R>(hosts: H, routes: R) -> NetsimResult<FakeServerHandle>
where
    H: IntoIterator<Item = S>,
    S: AsRef<str>,
    R: IntoIterator<Item = Route>,
{
    create_fake_server_with_config(hosts, routes, HarnessConfig::default()).await
}

/// Like [`create_fake_server`] with an explicit configuration.
///
/// # Errors
///
/// Same as [`create_fake_server`].
pub async fn create_fake_server_with_config<H, S, R>(
    hosts: H,
    routes: R,
    config: HarnessConfig,
) -> NetsimResult<FakeServerHandle>
where
    H: IntoIterator<Item = S>,
    S: AsRef<str>,
    R: IntoIterator<Item = Route>,
{
    let mut server = FakeServer::with_config(HostSet::new(hosts)?, config);
    server.add_routes(routes)?;
    let address = server.start().await?;
    Ok(FakeServerHandle::new(server, address))
}

/// Resolver mapping every host of `server` to its bound address.
#[must_use]
pub fn build_fake_resolver(server: &FakeServerHandle) -> FakeResolver {
    FakeResolver::from_bound(server.hosts(), server.address())
}
