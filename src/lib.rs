//! # trellis
//!
//! A request-middleware orchestration engine. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! Your host runtime owns the real request and response objects — parsing,
//! cookies, redirects on the wire. trellis does not, by design. Given a
//! minimal view of one in-flight request, it decides which of your handlers
//! run, in what order, with what shared state, and how each handler's result
//! continues, short-circuits, or fails the chain. It sits entirely inside the
//! host's request lifecycle and has no wire format of its own.
//!
//! What trellis owns — the only part that changes between applications:
//!
//! - **Route matching** — compact segment patterns (`:id`, `*rest`, optional
//!   groups, exclusions, a raw-regex escape hatch), memoized per pathname
//! - **Phased execution** — global `before` hooks, the route-resolved chain
//!   (ancestors before leaves), global `after` hooks, awaited strictly in
//!   sequence
//! - **Shared state** — per-invocation context storage and header-diff
//!   forwarding, isolated across concurrent requests
//! - **Error policy** — structured handler errors resolved through custom
//!   handler → silent-continue → propagate
//!
//! What trellis intentionally ignores: method dispatch, templating, response
//! serialization, timeouts. A handler that never resolves hangs its own
//! invocation — put deadlines in the host, where they belong.
//!
//! ## Quick start
//!
//! ```rust
//! use http::StatusCode;
//! use trellis::{BoxError, Event, Outcome, Pipeline, Request, Response, Routes};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), trellis::Error> {
//!     let routes = Routes::new()
//!         .route("/shop/:category/:id", show_item)
//!         .nest("/admin", Routes::new()
//!             .handle(require_auth)
//!             .route("/users", list_users));
//!
//!     let pipeline = Pipeline::builder(routes).before(tag_request).build();
//!
//!     let done = pipeline.run(Request::get("/shop/electronics/42")).await?;
//!     assert!(done.outcome().is_terminating());
//!     Ok(())
//! }
//!
//! async fn tag_request(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
//!     req.insert_header("x-request-source", "edge")?;
//!     Ok(Outcome::Next)
//! }
//!
//! async fn require_auth(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
//!     match req.header("authorization") {
//!         Some(_) => Ok(Outcome::Next),
//!         None => Ok(Outcome::Respond(Response::status(StatusCode::UNAUTHORIZED))),
//!     }
//! }
//!
//! async fn show_item(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
//!     let id = ev.params().get_str("id").unwrap_or("unknown");
//!     Ok(Outcome::Respond(Response::json(format!(r#"{{"id":"{id}"}}"#))))
//! }
//!
//! async fn list_users(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
//!     Ok(Outcome::Respond(Response::json(br#"[]"#.to_vec())))
//! }
//! ```

mod chain;
mod error;
mod event;
mod handler;
mod outcome;
mod pattern;
mod request;
mod response;
mod routes;
mod storage;
mod timing;

pub mod headers;

pub use chain::{Pipeline, PipelineBuilder};
pub use error::{BoxError, Error};
pub use event::{Event, Metadata, Phase};
pub use handler::Middleware;
pub use outcome::{Completion, Outcome};
pub use pattern::{CacheStats, ParamValue, Params};
pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use routes::Routes;
pub use storage::{MemoryStorage, Storage, StorageProvider, ERROR_KEY};
pub use timing::Timings;
