use derive_more::From;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type NetsimResult<T> = std::result::Result<T, NetsimError>;

/// Errors from binding the fake server listener.
#[derive(From, Debug)]
pub enum BindError {
    /// The OS refused the socket (port exhaustion, permissions, ...).
    #[from]
    Io(io::Error),

    /// The configured bind address is not a loopback address.
    #[from(ignore)]
    NotLoopback(IpAddr),

    /// `start()` was called on a server that is already running.
    AlreadyStarted,

    /// `start()` was called on a server that was already stopped.
    AlreadyStopped,
}

impl std::error::Error for BindError {}

impl core::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to bind fake server listener: {err}"),
            Self::NotLoopback(ip) => {
                write!(f, "fake servers only bind to loopback, got: {ip}")
            }
            Self::AlreadyStarted => write!(f, "fake server is already running"),
            Self::AlreadyStopped => write!(f, "fake server was stopped and cannot be restarted"),
        }
    }
}

/// Errors from registering routes on a fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRegistrationError {
    /// Routes can only be added while the server is in the `Created` state.
    ServerStarted,

    /// The (method, path) pair is already taken.
    Duplicate { method: String, path: String },

    /// Route paths must start with `/`.
    InvalidPath(String),

    /// The method string is not a valid HTTP method token.
    InvalidMethod(String),
}

impl std::error::Error for RouteRegistrationError {}

impl core::fmt::Display for RouteRegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerStarted => write!(f, "routes cannot be added after the server started"),
            Self::Duplicate { method, path } => {
                write!(f, "route already registered: {method} {path}")
            }
            Self::InvalidPath(path) => write!(f, "route path must start with '/': {path:?}"),
            Self::InvalidMethod(method) => write!(f, "invalid http method: {method:?}"),
        }
    }
}

/// Errors from loading a [`crate::HarnessConfig`].
#[derive(Debug, From)]
pub enum ConfigError {
    #[from]
    Io(io::Error),

    #[from]
    Deserialization(toml::de::Error),
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read harness config: {err}"),
            Self::Deserialization(err) => write!(f, "invalid harness config: {err}"),
        }
    }
}

/// Crate level error.
///
/// None of these are retried anywhere in the harness; they surface to the test.
#[derive(From, Debug)]
pub enum NetsimError {
    #[from]
    Bind(BindError),

    /// A hostname outside the configured host set was resolved. Always a test bug.
    #[from(ignore)]
    UnknownHost(String),

    #[from]
    RouteRegistration(RouteRegistrationError),

    /// The listener did not close within the configured timeout.
    #[from(ignore)]
    ShutdownTimeout(Duration),

    /// A hostname failed validation when building a host set.
    #[from(ignore)]
    InvalidHost(String),

    #[from]
    Config(ConfigError),

    #[from]
    Client(reqwest::Error),
}

impl std::error::Error for NetsimError {}

impl core::fmt::Display for NetsimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "{err}"),
            Self::UnknownHost(host) => {
                write!(f, "host {host:?} is not served by any fake server")
            }
            Self::RouteRegistration(err) => write!(f, "{err}"),
            Self::ShutdownTimeout(timeout) => {
                write!(f, "fake server did not shut down within {timeout:?}")
            }
            Self::InvalidHost(host) => write!(f, "invalid hostname: {host:?}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Client(err) => write!(f, "http client error: {err}"),
        }
    }
}
