use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;

pub type HyperResponse = hyper::Response<Full<Bytes>>;

/// Response produced by a route handler.
///
/// `Content-Length` is computed by hyper when the response is rendered.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

// -- Constructors

impl FakeResponse {
    /// Empty response with the given status.
    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// 200 OK with a plain text body.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(StatusCode::OK)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )
            .with_body(body)
    }

    /// 200 OK with a JSON body.
    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::status(StatusCode::OK)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(value.to_string())
    }

    /// 200 OK with any serializable value as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serde error if `value` cannot be serialized.
    pub fn json_from<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::status(StatusCode::OK)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(body))
    }

    /// 302 Found pointing at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if `location` is not a valid header value.
    pub fn redirect(location: &str) -> Result<Self, header::InvalidHeaderValue> {
        let location = HeaderValue::from_str(location)?;
        Ok(Self::status(StatusCode::FOUND).with_header(header::LOCATION, location))
    }

    pub(crate) fn not_found() -> Self {
        Self::status(StatusCode::NOT_FOUND).with_body("Not Found")
    }

    pub(crate) fn internal_error() -> Self {
        Self::status(StatusCode::INTERNAL_SERVER_ERROR).with_body("Internal Server Error")
    }

    pub(crate) fn misdirected() -> Self {
        Self::status(StatusCode::MISDIRECTED_REQUEST).with_body("Misdirected Request")
    }

    pub(crate) fn bad_request(reason: &str) -> Self {
        Self::status(StatusCode::BAD_REQUEST).with_body(reason.to_string())
    }

    pub(crate) fn method_not_allowed(allowed: &[http::Method]) -> Self {
        let allow = allowed
            .iter()
            .map(http::Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        let mut response =
            Self::status(StatusCode::METHOD_NOT_ALLOWED).with_body("Method Not Allowed");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.headers.insert(header::ALLOW, value);
        }
        response
    }
}

// -- Mutation methods

impl FakeResponse {
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

// -- Getters

impl FakeResponse {
    #[must_use]
    pub fn get_status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

// -- Rendering

impl FakeResponse {
    pub(crate) fn into_hyper(self) -> HyperResponse {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
