//! Route declarations and the (method, path) dispatch table.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use crate::errors::{NetsimResult, RouteRegistrationError};
use crate::http::RequestHandler;

/// A single route: method, exact path and handler.
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    handler: Arc<dyn RequestHandler>,
}

// -- Constructors

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        }
    }

    /// Builds a route from a method name such as `"GET"`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteRegistrationError::InvalidMethod`] if `method` is not a
    /// valid HTTP method token.
    pub fn parse(
        method: &str,
        path: impl Into<String>,
        handler: impl RequestHandler,
    ) -> NetsimResult<Self> {
        let parsed = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RouteRegistrationError::InvalidMethod(method.to_string()))?;
        Ok(Self::new(parsed, path, handler))
    }

    pub fn get(path: impl Into<String>, handler: impl RequestHandler) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl RequestHandler) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: impl RequestHandler) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: impl RequestHandler) -> Self {
        Self::new(Method::DELETE, path, handler)
    }
}

// -- Getters

impl Route {
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Outcome of looking a request up in a [`RouteTable`].
pub enum RouteMatch {
    Found(Arc<dyn RequestHandler>),
    /// The path exists but not for this method.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Exact-match routing table keyed by (method, path).
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: HashMap<(Method, String), Arc<dyn RequestHandler>>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// Fails on a path not starting with `/` or on a duplicate (method, path).
    pub fn insert(&mut self, route: Route) -> NetsimResult<()> {
        if !route.path.starts_with('/') {
            return Err(RouteRegistrationError::InvalidPath(route.path).into());
        }

        let key = (route.method, route.path);
        if self.routes.contains_key(&key) {
            let (method, path) = key;
            return Err(RouteRegistrationError::Duplicate {
                method: method.to_string(),
                path,
            }
            .into());
        }

        self.routes.insert(key, route.handler);
        Ok(())
    }

    /// Finds the handler for a request, `HEAD` falls back to `GET`.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let key = (method.clone(), path.to_string());
        if let Some(handler) = self.routes.get(&key) {
            return RouteMatch::Found(Arc::clone(handler));
        }

        if *method == Method::HEAD {
            if let Some(handler) = self.routes.get(&(Method::GET, path.to_string())) {
                return RouteMatch::Found(Arc::clone(handler));
            }
        }

        let mut allowed: Vec<Method> = self
            .routes
            .keys()
            .filter(|(_, route_path)| route_path == path)
            .map(|(route_method, _)| route_method.clone())
            .collect();

        if allowed.is_empty() {
            return RouteMatch::NotFound;
        }

        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        RouteMatch::MethodNotAllowed(allowed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .routes
            .keys()
            .map(|(method, path)| format!("{method} {path}"))
            .collect();
        keys.sort();
        f.debug_struct("RouteTable").field("routes", &keys).finish()
    }
}
