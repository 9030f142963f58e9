//! Middleware trait and type erasure.
//!
//! # How async middleware is stored
//!
//! A route tree holds middleware of *different* concrete types in one
//! structure. Rust collections can only hold one concrete type, so we use
//! **trait objects** (`dyn ErasedMiddleware`) to hide the concrete handler
//! type behind a common interface and store everything uniformly.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn auth(req: Request, ev: Event) -> Result<Outcome, BoxError> { … }
//!        ↓ routes.route("/admin", auth)
//! auth.into_boxed()                                ← Middleware blanket impl
//!        ↓
//! Arc::new(FnMiddleware(auth))                     ← heap-allocated wrapper
//!        ↓  stored as BoxedMiddleware = Arc<dyn ErasedMiddleware>
//! mw.call(req, ev)  at invocation time             ← one vtable dispatch
//! ```
//!
//! The only runtime cost per handler call is **one Arc clone** (atomic inc) +
//! **one virtual call** — negligible next to the awaited handler body.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::event::Event;
use crate::outcome::Outcome;
use crate::request::Request;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to a handler's result.
pub(crate) type BoxFuture =
    Pin<Box<dyn Future<Output = Result<Outcome, BoxError>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Middleware` trait's `into_boxed` method.
/// External crates cannot usefully interact with this trait.
#[doc(hidden)]
pub trait ErasedMiddleware: Send + Sync {
    fn call(&self, req: Request, ev: Event) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent invocations.
#[doc(hidden)]
pub type BoxedMiddleware = Arc<dyn ErasedMiddleware + Send + Sync + 'static>;

// ── Public Middleware trait ───────────────────────────────────────────────────

/// Implemented for every valid chain handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request, ev: Event) -> Result<Outcome, BoxError>
/// ```
///
/// `req` is a cheap-clone handle onto the in-flight request — header mutations
/// made through it are visible to every later handler. `ev` carries the
/// matched params, the invocation context, and the skip controls.
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it. This keeps the API surface stable.
pub trait Middleware: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed(self) -> BoxedMiddleware;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut> private::Sealed for F
where
    F: Fn(Request, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, BoxError>> + Send + 'static,
{
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, BoxError>> + Send + 'static,
{
    fn into_boxed(self) -> BoxedMiddleware {
        Arc::new(FnMiddleware(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype that holds a concrete handler `F` and implements
/// [`ErasedMiddleware`], bridging the typed world to the trait-object world.
struct FnMiddleware<F>(F);

impl<F, Fut> ErasedMiddleware for FnMiddleware<F>
where
    F: Fn(Request, Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, BoxError>> + Send + 'static,
{
    fn call(&self, req: Request, ev: Event) -> BoxFuture {
        Box::pin((self.0)(req, ev))
    }
}
