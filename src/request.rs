//! The in-flight request view handlers receive.
//!
//! trellis does not own the host's request object — it consumes a minimal
//! view: method, URI, headers. The view is a cheap-clone handle onto shared
//! state, so a header written by one handler is observed by every handler
//! after it in the same invocation. Accessors lock internally and copy out;
//! no guard ever crosses an `await`.

use std::sync::{Arc, Mutex};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::error::BoxError;

/// A cheap-clone handle onto one invocation's request state.
#[derive(Clone)]
pub struct Request {
    shared: Arc<Shared>,
}

struct Shared {
    method: Method,
    uri: Uri,
    headers: Mutex<HeaderMap>,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            shared: Arc::new(Shared { method, uri, headers: Mutex::new(headers) }),
        }
    }

    /// Header-less `GET` request, mostly for tests and demos. For URIs that
    /// are not trusted literals, parse the [`Uri`] yourself and use
    /// [`Request::new`].
    ///
    /// # Panics
    ///
    /// Panics if `uri` is not a valid URI string.
    pub fn get(uri: &str) -> Self {
        let uri: Uri = uri.parse().expect("invalid URI");
        Self::new(Method::GET, uri, HeaderMap::new())
    }

    pub fn method(&self) -> &Method {
        &self.shared.method
    }

    pub fn uri(&self) -> &Uri {
        &self.shared.uri
    }

    /// The raw (still percent-encoded) request path.
    pub fn path(&self) -> &str {
        self.shared.uri.path()
    }

    /// Copies out a header value as a string. `None` if absent or not UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        let headers = self.lock();
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
    }

    /// Sets a header, replacing any existing values for the name.
    ///
    /// Accepts anything convertible to a header name/value pair, so handlers
    /// can write `req.insert_header("x-user", "42")?`.
    pub fn insert_header<N, V>(&self, name: N, value: V) -> Result<(), BoxError>
    where
        N: TryInto<HeaderName>,
        N::Error: Into<BoxError>,
        V: TryInto<HeaderValue>,
        V::Error: Into<BoxError>,
    {
        let name = name.try_into().map_err(Into::into)?;
        let value = value.try_into().map_err(Into::into)?;
        self.lock().insert(name, value);
        Ok(())
    }

    /// Removes every value for a header name.
    pub fn remove_header(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Snapshot of the current header set.
    ///
    /// This is what the executor diffs before and after each handler call.
    pub fn headers(&self) -> HeaderMap {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeaderMap> {
        // A poisoned lock only means another handler panicked mid-write;
        // the header map itself is always in a consistent state.
        self.shared.headers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
