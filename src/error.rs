//! Unified error type.
//!
//! Three failure classes, three propagation rules:
//!
//! - **Pattern** — a malformed route key. Configuration is broken; always
//!   propagates so a broken chain is never mistaken for "no handler matched".
//! - **Decode** — malformed percent-encoding in the request pathname.
//!   Always propagates; never defaulted to a non-match.
//! - **Handler** — a user handler failed. Carries the phase, the handler's
//!   index in its chain, the pathname, and the matched route key, with the
//!   original cause preserved as `source()`. Whether it propagates depends
//!   on the pipeline's error policy (custom handler → silent → propagate).

use thiserror::Error;

use crate::event::{Metadata, Phase};

/// Boxed error returned by user handlers and custom error handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by trellis's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A route key that cannot be compiled into a matcher.
    #[error("invalid route pattern `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },

    /// A pathname with malformed percent-encoding.
    #[error("malformed percent-encoding in pathname `{pathname}`")]
    Decode { pathname: String },

    /// A handler failure, annotated with where in the chain it happened.
    #[error("handler failed in `{phase}` chain at index {index} for `{pathname}` (route `{route_key}`)")]
    Handler {
        phase: Phase,
        index: usize,
        pathname: String,
        route_key: String,
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::Pattern { pattern: pattern.to_owned(), reason: reason.into() }
    }

    pub(crate) fn decode(pathname: &str) -> Self {
        Self::Decode { pathname: pathname.to_owned() }
    }

    pub(crate) fn handler(meta: &Metadata, source: BoxError) -> Self {
        Self::Handler {
            phase: meta.phase(),
            index: meta.index(),
            pathname: meta.pathname().to_owned(),
            route_key: meta.route_key().to_owned(),
            source,
        }
    }
}
