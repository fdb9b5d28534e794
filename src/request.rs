//! Immutable description of one outbound call.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::codec;
use crate::error::Result;
use crate::http::Method;

/// Opaque token identifying one request for the lifetime of the process.
/// Generated when the descriptor is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deferred request body. Encoding runs when the operation starts, so an
/// encode failure classifies the outcome (`SerializationFailed`) instead of
/// failing `begin`, and no transport task is created for it.
pub struct Body(Box<dyn Fn() -> Result<Vec<u8>> + Send + Sync>);

impl Body {
    pub fn json<B: Serialize + Send + Sync + 'static>(value: B) -> Self {
        Self(Box::new(move || codec::encode(&value)))
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        (self.0)()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body(..)")
    }
}

/// Descriptor for one outbound call. Created once by the caller, consumed by
/// [`Session::begin`](crate::Session::begin), never mutated after submission.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Body>,
    display_activity: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            display_activity: false,
        }
    }

    /// Adds a header. Request headers override session defaults on collision.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attaches a JSON body. Requests with a body are issued as uploads.
    pub fn json_body<B: Serialize + Send + Sync + 'static>(self, value: B) -> Self {
        self.body(Body::json(value))
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether this request drives the external busy indicator.
    pub fn display_activity(mut self, display: bool) -> Self {
        self.display_activity = display;
        self
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub(crate) fn body_ref(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn displays_activity(&self) -> bool {
        self.display_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_descriptor() {
        let a = Request::new(Method::Get, "http://example.com/a");
        let b = Request::new(Method::Get, "http://example.com/a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn defaults_are_inert() {
        let request = Request::new(Method::Post, "http://example.com");
        assert!(!request.displays_activity());
        assert!(request.header_map().is_empty());
        assert!(request.body_ref().is_none());
    }

    #[test]
    fn body_encodes_lazily() {
        let request =
            Request::new(Method::Put, "http://example.com").json_body(vec![1u32, 2, 3]);
        let bytes = request.body_ref().unwrap().encode().unwrap();
        assert_eq!(bytes, b"[1,2,3]");
    }
}
