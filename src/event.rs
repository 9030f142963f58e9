//! Per-call surface handed to every handler.
//!
//! An [`Event`] is rebuilt for each handler invocation: the matched params,
//! a handle on the invocation context, fresh [`Metadata`], and the skip
//! controls for the current phase. It clones cheaply — everything inside is
//! an `Arc` or small copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BoxError;
use crate::pattern::{ParamValue, Params};
use crate::storage::Storage;

// ── Phase ─────────────────────────────────────────────────────────────────────

/// Which chain a handler is running in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Global pre-hooks.
    Before,
    /// The route-resolved chain, ancestors → leaf.
    Main,
    /// Global post-hooks.
    After,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Main => "main",
            Self::After => "after",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Where in the chain the current handler call sits.
///
/// Fresh per handler call; read-only to handlers.
#[derive(Clone, Debug)]
pub struct Metadata {
    phase: Phase,
    index: usize,
    pathname: String,
    route_key: String,
    nest_level: Option<usize>,
}

impl Metadata {
    pub(crate) fn new(
        phase: Phase,
        index: usize,
        pathname: String,
        route_key: String,
        nest_level: Option<usize>,
    ) -> Self {
        Self { phase, index, pathname, route_key, nest_level }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Position within the current chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The decoded request pathname.
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// The matched route pattern for `main` handlers; empty for global
    /// `before`/`after` handlers.
    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    /// Nesting depth of the matched node, `main` handlers only.
    pub fn nest_level(&self) -> Option<usize> {
        self.nest_level
    }
}

// ── Skip flags ────────────────────────────────────────────────────────────────

/// Phase-scoped skip state. One per phase, shared by every handler in it,
/// so the flags are naturally idempotent.
pub(crate) struct SkipFlags {
    phase: AtomicBool,
    after: AtomicBool,
}

impl SkipFlags {
    pub(crate) fn new() -> Self {
        Self { phase: AtomicBool::new(false), after: AtomicBool::new(false) }
    }

    pub(crate) fn phase_skipped(&self) -> bool {
        self.phase.load(Ordering::Relaxed)
    }

    pub(crate) fn after_skipped(&self) -> bool {
        self.after.load(Ordering::Relaxed)
    }
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// The second argument to every handler.
#[derive(Clone)]
pub struct Event {
    params: Params,
    storage: Arc<dyn Storage>,
    meta: Metadata,
    skip: Arc<SkipFlags>,
}

impl Event {
    pub(crate) fn new(
        params: Params,
        storage: Arc<dyn Storage>,
        meta: Metadata,
        skip: Arc<SkipFlags>,
    ) -> Self {
        Self { params, storage, meta, skip }
    }

    /// Params matched for this handler's route, ancestors merged in.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// The invocation context: shared by every handler in this request's
    /// chain, isolated from concurrent invocations.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Typed read from the invocation context. `None` if the key is absent
    /// or the stored value does not deserialize as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.storage.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Typed write into the invocation context.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), BoxError> {
        let value = serde_json::to_value(value)?;
        self.storage.set(key, value);
        Ok(())
    }

    /// Discards the remaining handlers of the *current* phase. The present
    /// handler still finishes, and a terminating return value still wins.
    /// Idempotent.
    pub fn skip(&self) {
        self.skip.phase.store(true, Ordering::Relaxed);
    }

    /// [`skip`](Event::skip), and additionally discards the `after` phase.
    pub fn skip_after(&self) {
        self.skip.phase.store(true, Ordering::Relaxed);
        self.skip.after.store(true, Ordering::Relaxed);
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }
}
