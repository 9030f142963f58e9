//! The chain executor.
//!
//! A [`Pipeline`] owns the route tree, the global `before`/`after` hooks, the
//! settings, and the match caches. [`Pipeline::run`] drives one invocation:
//!
//! 1. decode the pathname (strictly — bad escapes abort the invocation),
//! 2. run `before` hooks in registration order,
//! 3. resolve the route tree and run each matched chain ancestors → leaf,
//! 4. run `after` hooks,
//!
//! awaiting every handler strictly in sequence. The first terminating result
//! stops its phase at once — and, in `main`, every remaining chain. Whether
//! `after` still runs past a termination is the
//! [`after_on_terminate`](PipelineBuilder::after_on_terminate) toggle;
//! [`Event::skip_after`](crate::Event::skip_after) overrides per request.
//!
//! There is no timeout or cancellation: a handler that never resolves hangs
//! its invocation. That is a documented limitation, not something the
//! executor papers over.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::HeaderMap;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{BoxError, Error};
use crate::event::{Event, Metadata, Phase, SkipFlags};
use crate::handler::{BoxedMiddleware, Middleware};
use crate::headers;
use crate::outcome::{Completion, Outcome};
use crate::pattern::{decode_pathname, CacheStats, MatcherCache, Params};
use crate::request::Request;
use crate::routes::{resolve, ResolvedChain, ResolvedEntry, Routes};
use crate::storage::{Storage, StorageProvider, ERROR_KEY};
use crate::timing::Timings;

// ── Pipeline ──────────────────────────────────────────────────────────────────

type BoxedErrorHandler = Arc<
    dyn Fn(Error, Metadata) -> crate::handler::BoxFuture + Send + Sync,
>;

struct Settings {
    debug: bool,
    silent: bool,
    timing: bool,
    after_on_terminate: bool,
}

/// The middleware orchestrator. Build once, share across invocations.
pub struct Pipeline {
    routes: Routes,
    before: Vec<BoxedMiddleware>,
    after: Vec<BoxedMiddleware>,
    settings: Settings,
    error_handler: Option<BoxedErrorHandler>,
    storage: StorageProvider,
    cache: MatcherCache,
}

impl Pipeline {
    pub fn builder(routes: Routes) -> PipelineBuilder {
        PipelineBuilder {
            routes,
            before: Vec::new(),
            after: Vec::new(),
            settings: Settings {
                debug: false,
                silent: false,
                timing: false,
                after_on_terminate: true,
            },
            error_handler: None,
            storage: StorageProvider::default(),
        }
    }

    /// Runs one request through the chain.
    ///
    /// Resolves to the first terminating result, or a pass-through
    /// [`Outcome::Next`] if nothing terminated (including when no route
    /// matched — then no `main` handler runs at all). Configuration and
    /// decoding errors, and unrecovered handler errors, fail the whole
    /// invocation; a failed invocation never yields a partial response.
    pub async fn run(&self, request: Request) -> Result<Completion, Error> {
        let pathname = decode_pathname(request.path())?;
        let timing = self.settings.timing;
        let started = timing.then(Instant::now);

        let mut flow = Flow {
            request,
            pathname,
            storage: self.storage.provide(),
            request_headers: HeaderMap::new(),
            terminal: None,
            skip_after: false,
        };

        let globals = |list: &[BoxedMiddleware]| -> Vec<ResolvedChain> {
            if list.is_empty() {
                return Vec::new();
            }
            vec![list
                .iter()
                .map(|mw| ResolvedEntry {
                    mw: Arc::clone(mw),
                    route_key: String::new(),
                    params: Params::default(),
                    nest_level: None,
                })
                .collect()]
        };

        let mut timings = Timings::default();

        let t = timing.then(Instant::now);
        self.run_phase(Phase::Before, &globals(&self.before), &mut flow).await?;
        timings.before = elapsed(t);

        if flow.terminal.is_none() {
            let chains = resolve(&self.routes, &flow.pathname, &self.cache)?;
            let t = timing.then(Instant::now);
            self.run_phase(Phase::Main, &chains, &mut flow).await?;
            timings.main = elapsed(t);
        }

        if !flow.skip_after && (flow.terminal.is_none() || self.settings.after_on_terminate) {
            let t = timing.then(Instant::now);
            self.run_phase(Phase::After, &globals(&self.after), &mut flow).await?;
            timings.after = elapsed(t);
        }

        let timings = started.map(|s| {
            timings.total = s.elapsed();
            timings.log(&flow.pathname);
            timings
        });

        Ok(Completion {
            outcome: flow.terminal.unwrap_or(Outcome::Next),
            request_headers: flow.request_headers,
            timings,
        })
    }

    /// Drops every memoized pattern and match result. Safe at any time;
    /// in-flight invocations keep the compiled patterns they already hold.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Cache occupancy, for diagnostics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── Phase execution ──────────────────────────────────────────────────────

    /// Runs one phase's chains in order. A terminating result or a phase
    /// skip ends the phase across *all* its chains.
    async fn run_phase(
        &self,
        phase: Phase,
        chains: &[ResolvedChain],
        flow: &mut Flow,
    ) -> Result<(), Error> {
        let skip = Arc::new(SkipFlags::new());
        'phase: for chain in chains {
            for (index, entry) in chain.iter().enumerate() {
                let meta = Metadata::new(
                    phase,
                    index,
                    flow.pathname.clone(),
                    entry.route_key.clone(),
                    entry.nest_level,
                );
                if self.settings.debug {
                    debug!(
                        phase = %phase,
                        index,
                        route_key = %entry.route_key,
                        pathname = %flow.pathname,
                        "dispatching handler"
                    );
                }
                let event = Event::new(
                    entry.params.clone(),
                    Arc::clone(&flow.storage),
                    meta.clone(),
                    Arc::clone(&skip),
                );
                let snapshot = flow.request.headers();
                let result = entry.mw.call(flow.request.clone(), event).await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(cause) => self.recover(cause, &meta, &flow.storage).await?,
                };

                let diff = headers::diff(&snapshot, &flow.request.headers());
                if !diff.is_empty() {
                    headers::fold(&mut flow.request_headers, &diff);
                }

                if skip.after_skipped() {
                    flow.skip_after = true;
                }
                if outcome.is_terminating() {
                    flow.terminal = Some(outcome);
                    break 'phase;
                }
                if skip.phase_skipped() {
                    break 'phase;
                }
            }
        }
        Ok(())
    }

    /// Resolves a handler failure: custom handler → silent-continue →
    /// propagate. A custom handler's return value is classified exactly like
    /// a normal handler result; its own failure propagates.
    async fn recover(
        &self,
        cause: BoxError,
        meta: &Metadata,
        storage: &Arc<dyn Storage>,
    ) -> Result<Outcome, Error> {
        let message = cause.to_string();
        let wrapped = Error::handler(meta, cause);

        if let Some(handler) = &self.error_handler {
            return match handler(wrapped, meta.clone()).await {
                Ok(outcome) => Ok(outcome),
                Err(second) => Err(Error::handler(meta, second)),
            };
        }

        if self.settings.silent {
            warn!(
                phase = %meta.phase(),
                index = meta.index(),
                route_key = %meta.route_key(),
                error = %message,
                "handler failed; continuing (silent mode)"
            );
            storage.set(
                ERROR_KEY,
                json!({
                    "chain": meta.phase().as_str(),
                    "index": meta.index(),
                    "pathname": meta.pathname(),
                    "routeKey": meta.route_key(),
                    "message": message,
                }),
            );
            return Ok(Outcome::Next);
        }

        Err(wrapped)
    }
}

fn elapsed(start: Option<Instant>) -> Duration {
    start.map(|s| s.elapsed()).unwrap_or_default()
}

// ── Per-invocation state ──────────────────────────────────────────────────────

/// Everything one invocation mutates. Explicitly constructed and explicitly
/// scoped — concurrent invocations share nothing but the match cache.
struct Flow {
    request: Request,
    pathname: String,
    storage: Arc<dyn Storage>,
    request_headers: HeaderMap,
    terminal: Option<Outcome>,
    skip_after: bool,
}

// ── PipelineBuilder ───────────────────────────────────────────────────────────

/// Fluent configuration for a [`Pipeline`].
pub struct PipelineBuilder {
    routes: Routes,
    before: Vec<BoxedMiddleware>,
    after: Vec<BoxedMiddleware>,
    settings: Settings,
    error_handler: Option<BoxedErrorHandler>,
    storage: StorageProvider,
}

impl PipelineBuilder {
    /// Appends a global pre-hook. Repeatable; runs in registration order.
    pub fn before(mut self, mw: impl Middleware) -> Self {
        self.before.push(mw.into_boxed());
        self
    }

    /// Appends a global post-hook. Repeatable; runs in registration order.
    pub fn after(mut self, mw: impl Middleware) -> Self {
        self.after.push(mw.into_boxed());
        self
    }

    /// Verbose per-handler dispatch logging.
    pub fn debug(mut self, on: bool) -> Self {
        self.settings.debug = on;
        self
    }

    /// Continue past handler errors, recording them in the invocation
    /// context under [`ERROR_KEY`].
    pub fn silent(mut self, on: bool) -> Self {
        self.settings.silent = on;
        self
    }

    /// Collect per-phase wall-clock timings and log a summary per invocation.
    pub fn timing(mut self, on: bool) -> Self {
        self.settings.timing = on;
        self
    }

    /// Whether `after` hooks still run once `before`/`main` produced a
    /// terminating result. Defaults to `true`.
    pub fn after_on_terminate(mut self, on: bool) -> Self {
        self.settings.after_on_terminate = on;
        self
    }

    /// Custom recovery for handler failures. The returned value is treated
    /// exactly like a handler result: continue on [`Outcome::Next`],
    /// terminate otherwise.
    pub fn error_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Error, Metadata) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome, BoxError>> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |err, meta| Box::pin(f(err, meta))));
        self
    }

    /// How the pipeline obtains an invocation context per request.
    pub fn storage(mut self, provider: StorageProvider) -> Self {
        self.storage = provider;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            routes: self.routes,
            before: self.before,
            after: self.after,
            settings: self.settings,
            error_handler: self.error_handler,
            storage: self.storage,
            cache: MatcherCache::new(),
        }
    }
}
