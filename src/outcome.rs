//! Handler results and the completed-invocation value.

use http::header::HeaderMap;
use http::{StatusCode, Uri};

use crate::response::Response;
use crate::timing::Timings;

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What a handler decided.
///
/// [`Outcome::Next`] continues the chain — any header mutations the handler
/// made on the shared [`Request`](crate::Request) ride along automatically.
/// Everything else terminates: the current phase stops immediately and the
/// value becomes (or strongly shapes) the final result.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// No opinion — run the next handler.
    Next,
    /// Terminate: send the client elsewhere.
    Redirect { location: Uri, status: StatusCode },
    /// Terminate: serve a different internal destination, URL unchanged.
    Rewrite { destination: Uri },
    /// Terminate: respond with an explicit body and status.
    Respond(Response),
}

impl Outcome {
    pub fn redirect(location: Uri, status: StatusCode) -> Self {
        Self::Redirect { location, status }
    }

    pub fn rewrite(destination: Uri) -> Self {
        Self::Rewrite { destination }
    }

    pub fn is_terminating(&self) -> bool {
        !matches!(self, Self::Next)
    }
}

// ── Completion ────────────────────────────────────────────────────────────────

/// The resolved result of one pipeline invocation.
///
/// `outcome` is the first terminating result a handler produced, or
/// [`Outcome::Next`] when the whole chain passed through. `request_headers`
/// is the net header diff the chain applied to the request — additions and
/// updates verbatim, deletions as an empty-value sentinel — so the host can
/// observe mid-chain mutations after the middleware layer finishes.
#[derive(Debug)]
pub struct Completion {
    pub(crate) outcome: Outcome,
    pub(crate) request_headers: HeaderMap,
    pub(crate) timings: Option<Timings>,
}

impl Completion {
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }

    /// Net request-header mutations accumulated across the chain.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Per-phase wall-clock durations. `None` unless timing was enabled.
    pub fn timings(&self) -> Option<&Timings> {
        self.timings.as_ref()
    }
}
