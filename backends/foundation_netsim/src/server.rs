//! Fake HTTP server bound to an ephemeral loopback port.
//!
//! A [`FakeServer`] is built for a [`HostSet`], gets its routes registered
//! while in the `Created` state, then `start()` binds `127.0.0.1:0` and hands
//! back the [`BoundAddress`] the OS picked. That address is what the fake
//! resolver answers with, so it only exists once the listener is ready.
//!
//! Each accepted connection is served by its own tokio task through hyper's
//! HTTP/1.1 server, a slow handler only holds up its own connection.
//! `stop()` closes the listener and cancels every connection still open.

use core::fmt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use http::Method;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::HarnessConfig;
use crate::errors::{BindError, NetsimError, NetsimResult, RouteRegistrationError};
use crate::hosts::HostSet;
use crate::http::{FakeRequest, FakeResponse, HyperResponse, RequestHandler};
use crate::routes::{Route, RouteMatch, RouteTable};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Socket address assigned by the OS when a fake server binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundAddress(SocketAddr);

impl BoundAddress {
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.0.port()
    }

    /// Direct URL to the listener, bypassing name resolution.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.0, path)
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BoundAddress> for SocketAddr {
    fn from(value: BoundAddress) -> Self {
        value.0
    }
}

/// `Created -> Running -> Stopped`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleState {
    Created,
    Running,
    Stopped,
}

/// A request as seen by the server, kept for assertions after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub host: Option<String>,
}

type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

/// Everything a connection task needs, frozen at `start()`.
struct ServingContext {
    hosts: HostSet,
    routes: RouteTable,
    strict_hosts: bool,
    log: RequestLog,
}

struct RunningServer {
    address: BoundAddress,
    shutdown: broadcast::Sender<()>,
    accept_loop: JoinHandle<()>,
}

enum ServerState {
    Created,
    Running(RunningServer),
    Stopped,
}

impl ServerState {
    fn lifecycle(&self) -> ServerLifecycleState {
        match self {
            Self::Created => ServerLifecycleState::Created,
            Self::Running(_) => ServerLifecycleState::Running,
            Self::Stopped => ServerLifecycleState::Stopped,
        }
    }
}

/// Local HTTP server standing in for the hosts of a [`HostSet`].
///
/// # Examples
///
/// ```rust,no_run
/// use foundation_netsim::{FakeResponse, FakeServer, HostSet, Route};
///
/// # async fn run() -> foundation_netsim::NetsimResult<()> {
/// let mut server = FakeServer::new(HostSet::new(["testnet.blockchain.info"])?);
/// server.add_route(Route::get("/unspent", FakeResponse::ok("[]")))?;
///
/// let address = server.start().await?;
/// tracing::info!("Fake server running at: {}", address.url("/unspent"));
///
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct FakeServer {
    hosts: HostSet,
    config: HarnessConfig,
    routes: RouteTable,
    log: RequestLog,
    state: ServerState,
}

// -- Constructors

impl FakeServer {
    #[must_use]
    pub fn new(hosts: HostSet) -> Self {
        Self::with_config(hosts, HarnessConfig::default())
    }

    #[must_use]
    pub fn with_config(hosts: HostSet, config: HarnessConfig) -> Self {
        Self {
            hosts,
            config,
            routes: RouteTable::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            state: ServerState::Created,
        }
    }
}

// -- Getters

impl FakeServer {
    #[must_use]
    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ServerLifecycleState {
        self.state.lifecycle()
    }

    /// The bound address while running.
    #[must_use]
    pub fn address(&self) -> Option<BoundAddress> {
        match &self.state {
            ServerState::Running(running) => Some(running.address),
            _ => None,
        }
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// -- Route registration

impl FakeServer {
    /// Registers a single route.
    ///
    /// # Errors
    ///
    /// Fails once the server has started, or on an invalid/duplicate route.
    pub fn add_route(&mut self, route: Route) -> NetsimResult<()> {
        if !matches!(self.state, ServerState::Created) {
            return Err(RouteRegistrationError::ServerStarted.into());
        }
        self.routes.insert(route)
    }

    /// Registers every route in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Same as [`FakeServer::add_route`].
    pub fn add_routes<I>(&mut self, routes: I) -> NetsimResult<()>
    where
        I: IntoIterator<Item = Route>,
    {
        routes.into_iter().try_for_each(|route| self.add_route(route))
    }
}

// -- Lifecycle

impl FakeServer {
    /// Binds an ephemeral loopback port and starts accepting connections.
    ///
    /// Returns once the listener is bound, the address is immediately usable.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] when the socket cannot be bound, when the
    /// configured IP is not loopback, or when the server already started.
    pub async fn start(&mut self) -> NetsimResult<BoundAddress> {
        match self.state {
            ServerState::Created => {}
            ServerState::Running(_) => return Err(BindError::AlreadyStarted.into()),
            ServerState::Stopped => return Err(BindError::AlreadyStopped.into()),
        }

        let bind_ip = self.config.get_bind_ip();
        if !bind_ip.is_loopback() {
            return Err(BindError::NotLoopback(bind_ip).into());
        }

        let listener = TcpListener::bind(SocketAddr::new(bind_ip, 0))
            .await
            .map_err(BindError::from)?;
        let address = BoundAddress::new(listener.local_addr().map_err(BindError::from)?);
        let route_count = self.routes.len();

        let context = Arc::new(ServingContext {
            hosts: self.hosts.clone(),
            routes: std::mem::take(&mut self.routes),
            strict_hosts: self.config.get_strict_hosts(),
            log: Arc::clone(&self.log),
        });

        let (shutdown, signal) = broadcast::channel::<()>(1);
        let accept_loop = tokio::spawn(accept_loop(listener, context, signal));

        tracing::info!(
            "Fake server for {} listening on {} ({} routes)",
            self.hosts,
            address,
            route_count
        );

        self.state = ServerState::Running(RunningServer {
            address,
            shutdown,
            accept_loop,
        });

        Ok(address)
    }

    /// Closes the listener and cancels in-flight requests.
    ///
    /// Calling this on a server that is not running only logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`NetsimError::ShutdownTimeout`] if the accept loop did not
    /// finish within the configured timeout. The server is stopped either way.
    pub async fn stop(&mut self) -> NetsimResult<()> {
        let RunningServer {
            address,
            shutdown,
            mut accept_loop,
        } = match std::mem::replace(&mut self.state, ServerState::Stopped) {
            ServerState::Running(running) => running,
            other => {
                tracing::warn!(
                    "Ignoring stop() on fake server for {} in state {:?}",
                    self.hosts,
                    other.lifecycle()
                );
                self.state = other;
                return Ok(());
            }
        };

        // a send error means the loop already exited, the join below still reaps it
        let _ = shutdown.send(());

        let timeout = self.config.get_shutdown_timeout();
        match tokio::time::timeout(timeout, &mut accept_loop).await {
            Ok(Ok(())) => {
                tracing::info!("Fake server at {address} stopped");
                Ok(())
            }
            Ok(Err(join_err)) => {
                tracing::error!(
                    "Fake server accept loop at {address} ended abnormally: {join_err}"
                );
                Ok(())
            }
            Err(_) => {
                accept_loop.abort();
                tracing::error!("Fake server at {address} did not stop within {timeout:?}");
                Err(NetsimError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        if let ServerState::Running(running) = &self.state {
            tracing::debug!(
                "Fake server at {} dropped while running, aborting",
                running.address
            );
            let _ = running.shutdown.send(());
            running.accept_loop.abort();
        }
    }
}

impl fmt::Debug for FakeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeServer")
            .field("hosts", &self.hosts)
            .field("state", &self.state())
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

// -- Serving

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServingContext>,
    mut signal: broadcast::Receiver<()>,
) {
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            // shutdown wins over pending accepts
            biased;

            _ = signal.recv() => {
                tracing::debug!("Fake server received shutdown signal");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!("Got a client connection: {peer}");
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&context)));
                }
                Err(err) => {
                    tracing::error!("Fake server accept error: {err}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },

            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = finished {
                    tracing::error!("Fake server connection task failed: {err}");
                }
            }
        }
    }

    drop(listener);

    let in_flight = connections.len();
    connections.shutdown().await;
    tracing::debug!("Fake server closed listener, cancelled {in_flight} open connections");
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, context: Arc<ServingContext>) {
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let context = Arc::clone(&context);
        async move { Ok::<_, Infallible>(context.respond(request, peer).await) }
    });

    match http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        Ok(()) => tracing::debug!("Finished serving connection from {peer}"),
        Err(err) => tracing::debug!("Connection from {peer} closed with error: {err}"),
    }
}

impl ServingContext {
    async fn respond(
        &self,
        request: hyper::Request<Incoming>,
        peer: SocketAddr,
    ) -> HyperResponse {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::warn!("Failed to read request body from {peer}: {err}");
                return FakeResponse::bad_request("failed to read request body").into_hyper();
            }
        };

        let request = FakeRequest::from_parts(parts, body, peer);
        self.record(&request);

        tracing::info!(
            "Received request: method: {}, path: {}, host: {:?}",
            request.method(),
            request.path(),
            request.host(),
        );

        if self.strict_hosts && !request.host().is_some_and(|host| self.hosts.contains(host)) {
            tracing::warn!(
                "Rejecting request for host {:?}, fake server only serves {}",
                request.host(),
                self.hosts
            );
            return FakeResponse::misdirected().into_hyper();
        }

        let response = match self.routes.lookup(request.method(), request.path()) {
            RouteMatch::Found(handler) => invoke(handler, request).await,
            RouteMatch::MethodNotAllowed(allowed) => FakeResponse::method_not_allowed(&allowed),
            RouteMatch::NotFound => {
                tracing::warn!(
                    "No fake route for {} {}",
                    request.method(),
                    request.path()
                );
                FakeResponse::not_found()
            }
        };

        response.into_hyper()
    }

    fn record(&self, request: &FakeRequest) {
        let recorded = RecordedRequest {
            method: request.method().clone(),
            path: request.path().to_string(),
            query: request.query_pairs().to_vec(),
            host: request.host().map(ToString::to_string),
        };

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorded);
    }
}

/// Runs a handler, turning errors and panics into a 500 for this request only.
async fn invoke(handler: Arc<dyn RequestHandler>, request: FakeRequest) -> FakeResponse {
    let method = request.method().clone();
    let path = request.path().to_string();

    match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!("Handler for {method} {path} failed: {err}");
            FakeResponse::internal_error()
        }
        Err(panic) => {
            tracing::error!(
                "Handler for {method} {path} panicked: {}",
                panic_message(panic.as_ref())
            );
            FakeResponse::internal_error()
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// A started fake server, as returned by [`crate::create_fake_server`].
#[derive(Debug)]
pub struct FakeServerHandle {
    server: FakeServer,
    address: BoundAddress,
}

impl FakeServerHandle {
    pub(crate) fn new(server: FakeServer, address: BoundAddress) -> Self {
        Self { server, address }
    }

    /// The address `start()` returned, still reported after stop.
    #[must_use]
    pub fn address(&self) -> BoundAddress {
        self.address
    }

    #[must_use]
    pub fn hosts(&self) -> &HostSet {
        self.server.hosts()
    }

    #[must_use]
    pub fn state(&self) -> ServerLifecycleState {
        self.server.state()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.server.requests()
    }

    /// Stops the underlying server.
    ///
    /// # Errors
    ///
    /// Same as [`FakeServer::stop`].
    pub async fn stop(&mut self) -> NetsimResult<()> {
        self.server.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_test::traced_test;

    fn hosts() -> HostSet {
        HostSet::new(["testnet.blockchain.info"]).unwrap()
    }

    /// Sends a raw HTTP/1.1 request and returns the full response text.
    async fn raw_request(address: BoundAddress, request: &str) -> String {
        let mut stream = TcpStream::connect(address.socket_addr()).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn get(path: &str, host: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n")
    }

    /// WHY: The OS picks the port, the server must report it back
    /// WHAT: start() binds loopback and moves the server to Running
    #[tokio::test]
    async fn test_start_binds_loopback() {
        let mut server = FakeServer::new(hosts());
        assert_eq!(server.state(), ServerLifecycleState::Created);
        assert!(server.address().is_none());

        let address = server.start().await.unwrap();
        assert!(address.socket_addr().ip().is_loopback());
        assert_ne!(address.port(), 0);
        assert_eq!(server.state(), ServerLifecycleState::Running);
        assert_eq!(server.address(), Some(address));
        assert!(address.url("/test").starts_with("http://127.0.0.1:"));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerLifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut server = FakeServer::new(hosts());
        server.start().await.unwrap();

        assert!(matches!(
            server.start().await,
            Err(NetsimError::Bind(BindError::AlreadyStarted))
        ));

        server.stop().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(NetsimError::Bind(BindError::AlreadyStopped))
        ));
    }

    #[tokio::test]
    async fn test_non_loopback_bind_refused() {
        let config = HarnessConfig::new().bind_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let mut server = FakeServer::with_config(hosts(), config);
        assert!(matches!(
            server.start().await,
            Err(NetsimError::Bind(BindError::NotLoopback(_)))
        ));
        assert_eq!(server.state(), ServerLifecycleState::Created);
    }

    #[tokio::test]
    async fn test_routes_rejected_after_start() {
        let mut server = FakeServer::new(hosts());
        server.start().await.unwrap();

        let err = server
            .add_route(Route::get("/late", FakeResponse::ok("late")))
            .unwrap_err();
        assert!(matches!(
            err,
            NetsimError::RouteRegistration(RouteRegistrationError::ServerStarted)
        ));

        server.stop().await.unwrap();
    }

    /// WHY: stop() on a server that never ran must not hang or fail
    /// WHAT: The call is a logged no-op and the server can still start
    #[tokio::test]
    #[traced_test]
    async fn test_stop_before_start_is_noop() {
        let mut server = FakeServer::new(hosts());
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerLifecycleState::Created);
        assert!(logs_contain("Ignoring stop()"));

        server.start().await.unwrap();
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerLifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_serves_registered_route() {
        let mut server = FakeServer::new(hosts());
        server
            .add_route(Route::get("/unspent", FakeResponse::ok("utxo")))
            .unwrap();
        let address = server.start().await.unwrap();

        let request = get("/unspent?active=abc", "testnet.blockchain.info");
        let response = raw_request(address, &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("utxo"));

        let recorded = server.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].path, "/unspent");
        assert_eq!(
            recorded[0].query,
            vec![("active".to_string(), "abc".to_string())]
        );
        assert_eq!(recorded[0].host.as_deref(), Some("testnet.blockchain.info"));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let mut server = FakeServer::new(hosts());
        server
            .add_route(Route::get("/unspent", FakeResponse::ok("utxo")))
            .unwrap();
        let address = server.start().await.unwrap();

        let missing = raw_request(address, &get("/missing", "testnet.blockchain.info")).await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

        let post = concat!(
            "POST /unspent HTTP/1.1\r\n",
            "Host: testnet.blockchain.info\r\n",
            "Content-Length: 0\r\n",
            "Connection: close\r\n\r\n",
        );
        let wrong_method = raw_request(address, post).await;
        assert!(wrong_method.starts_with("HTTP/1.1 405"), "{wrong_method}");
        assert!(wrong_method.to_ascii_lowercase().contains("allow: get"));

        server.stop().await.unwrap();
    }

    /// WHY: A buggy handler must not take the server down
    /// WHAT: Errors and panics become 500s and later requests still succeed
    #[tokio::test]
    async fn test_handler_failures_become_500() {
        let mut server = FakeServer::new(hosts());
        server
            .add_routes([
                Route::get(
                    "/error",
                    crate::http::handler_fn(|_req| Err("boom".into())),
                ),
                Route::get(
                    "/panic",
                    crate::http::handler_fn(|_req| panic!("handler exploded")),
                ),
                Route::get("/ok", FakeResponse::ok("fine")),
            ])
            .unwrap();
        let address = server.start().await.unwrap();

        let errored = raw_request(address, &get("/error", "testnet.blockchain.info")).await;
        assert!(errored.starts_with("HTTP/1.1 500"), "{errored}");

        let panicked = raw_request(address, &get("/panic", "testnet.blockchain.info")).await;
        assert!(panicked.starts_with("HTTP/1.1 500"), "{panicked}");

        let fine = raw_request(address, &get("/ok", "testnet.blockchain.info")).await;
        assert!(fine.starts_with("HTTP/1.1 200"), "{fine}");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_invoke_logs_panic_message() {
        let handler: Arc<dyn RequestHandler> =
            Arc::new(crate::http::handler_fn(|_req| panic!("handler exploded")));
        let request = FakeRequest::new(
            Method::GET,
            &"/panic".parse().unwrap(),
            http::HeaderMap::new(),
            bytes::Bytes::new(),
            SocketAddr::from(([127, 0, 0, 1], 50000)),
        );

        let response = invoke(handler, request).await;
        assert_eq!(
            response.get_status(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(logs_contain("Handler for GET /panic panicked: handler exploded"));
    }

    #[tokio::test]
    async fn test_strict_hosts_rejects_foreign_host() {
        let config = HarnessConfig::new().strict_hosts(true);
        let mut server = FakeServer::with_config(hosts(), config);
        server
            .add_route(Route::get("/unspent", FakeResponse::ok("utxo")))
            .unwrap();
        let address = server.start().await.unwrap();

        let foreign = raw_request(address, &get("/unspent", "blockchain.info")).await;
        assert!(foreign.starts_with("HTTP/1.1 421"), "{foreign}");

        let known = raw_request(address, &get("/unspent", "testnet.blockchain.info:80")).await;
        assert!(known.starts_with("HTTP/1.1 200"), "{known}");

        server.stop().await.unwrap();
    }

    /// WHY: A socket left open after stop would leak into the next test
    /// WHAT: After stop() the port refuses connections and can be bound again
    #[tokio::test]
    async fn test_stop_releases_port() {
        let mut server = FakeServer::new(hosts());
        let address = server.start().await.unwrap();
        server.stop().await.unwrap();

        assert!(TcpStream::connect(address.socket_addr()).await.is_err());
        let rebound = std::net::TcpListener::bind(address.socket_addr());
        assert!(rebound.is_ok(), "port should be free after stop: {rebound:?}");
    }

    /// WHY: stop() must cancel requests that are still being handled
    /// WHAT: A handler that never finishes does not keep stop() waiting
    #[tokio::test]
    async fn test_stop_cancels_in_flight_requests() {
        let mut server = FakeServer::new(hosts());
        server
            .add_route(Route::get(
                "/hang",
                crate::http::async_handler_fn(|_req| async {
                    futures::future::pending::<()>().await;
                    Ok(FakeResponse::ok("never"))
                }),
            ))
            .unwrap();
        let address = server.start().await.unwrap();

        let mut stream = TcpStream::connect(address.socket_addr()).await.unwrap();
        stream
            .write_all(get("/hang", "testnet.blockchain.info").as_bytes())
            .await
            .unwrap();

        // wait until the server actually dispatched the request
        while server.requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), server.stop())
            .await
            .expect("stop should not hang")
            .unwrap();

        let mut leftover = Vec::new();
        let read = stream.read_to_end(&mut leftover).await;
        assert!(read.is_err() || leftover.is_empty());
    }

    /// WHY: A handler stuck in blocking code cannot be cancelled, stop() must
    /// still give up after the configured timeout
    /// WHAT: stop() reports ShutdownTimeout, the server is Stopped and the
    /// port can be bound again
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_times_out_on_blocked_handler() {
        let config = HarnessConfig::new().shutdown_timeout(Duration::from_millis(50));
        let mut server = FakeServer::with_config(hosts(), config);
        server
            .add_route(Route::get(
                "/blocked",
                crate::http::handler_fn(|_req| {
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(FakeResponse::ok("late"))
                }),
            ))
            .unwrap();
        let address = server.start().await.unwrap();

        let mut stream = TcpStream::connect(address.socket_addr()).await.unwrap();
        stream
            .write_all(get("/blocked", "testnet.blockchain.info").as_bytes())
            .await
            .unwrap();

        // the request is logged in the same poll that enters the handler
        while server.requests().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        match server.stop().await {
            Err(NetsimError::ShutdownTimeout(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected ShutdownTimeout, got {other:?}"),
        }
        assert_eq!(server.state(), ServerLifecycleState::Stopped);
        assert!(server.address().is_none());

        // the blocked connection still holds the port, rebinding needs SO_REUSEADDR
        let rebound = TcpListener::bind(address.socket_addr()).await;
        assert!(rebound.is_ok(), "port should be free after stop: {rebound:?}");
    }

    #[tokio::test]
    async fn test_drop_running_server_closes_listener() {
        let address = {
            let mut server = FakeServer::new(hosts());
            server.start().await.unwrap()
        };

        // abort is asynchronous, give the runtime a moment to reap the task
        let mut refused = false;
        for _ in 0..100 {
            if TcpStream::connect(address.socket_addr()).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refused, "listener should close after drop");
    }
}
