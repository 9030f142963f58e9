//! Minimal trellis walkthrough — nested routes, phases, and termination.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic

use http::StatusCode;
use trellis::{BoxError, Event, Outcome, Pipeline, Request, Response, Routes};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), trellis::Error> {
    tracing_subscriber::fmt::init();

    let routes = Routes::new()
        .route("/shop/:category/:id", show_item)
        .nest(
            "/admin",
            Routes::new()
                .handle(require_auth) // runs before any /admin/... leaf
                .route("/users", list_users),
        )
        .route("/files/*rest", file_listing);

    let pipeline = Pipeline::builder(routes)
        .before(tag_request)
        .after(audit)
        .debug(true)
        .timing(true)
        .build();

    // Matched leaf: params extracted, response terminates the chain.
    let done = pipeline.run(Request::get("/shop/electronics/42")).await?;
    println!("/shop/electronics/42 -> {:?}", done.outcome());

    // The admin guard short-circuits: no authorization header, 401.
    let done = pipeline.run(Request::get("/admin/users")).await?;
    println!("/admin/users         -> {:?}", done.outcome());

    // Nothing matches: pass-through, but the before-hook's header mutation
    // is still visible on the completion.
    let done = pipeline.run(Request::get("/nope")).await?;
    println!(
        "/nope                -> {:?} (request headers: {:?})",
        done.outcome(),
        done.request_headers()
    );

    Ok(())
}

async fn tag_request(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
    req.insert_header("x-request-source", "edge")?;
    Ok(Outcome::Next)
}

async fn audit(req: Request, ev: Event) -> Result<Outcome, BoxError> {
    ev.put("audited-path", &req.path())?;
    Ok(Outcome::Next)
}

async fn require_auth(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
    match req.header("authorization") {
        Some(_) => Ok(Outcome::Next),
        None => Ok(Outcome::Respond(Response::status(StatusCode::UNAUTHORIZED))),
    }
}

async fn show_item(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
    let category = ev.params().get_str("category").unwrap_or("unknown");
    let id = ev.params().get_str("id").unwrap_or("unknown");
    Ok(Outcome::Respond(Response::json(
        format!(r#"{{"category":"{category}","id":"{id}"}}"#),
    )))
}

async fn list_users(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
    Ok(Outcome::Respond(Response::json(br#"[{"id":1}]"#.to_vec())))
}

async fn file_listing(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
    let count = ev.param("rest").map(|v| v.segments().len()).unwrap_or(0);
    Ok(Outcome::Respond(Response::text(format!("{count} segments"))))
}
