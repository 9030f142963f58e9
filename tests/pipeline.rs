//! End-to-end pipeline behavior: phase ordering, termination, skip scoping,
//! header forwarding, error policy, and cross-invocation isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use trellis::{
    BoxError, Error, Event, MemoryStorage, Middleware, Outcome, Phase, Pipeline, Request,
    Response, Routes, Storage, StorageProvider,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorder(log: &Log, tag: &'static str) -> impl Middleware {
    let log = Arc::clone(log);
    move |_req: Request, _ev: Event| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(tag);
            Ok::<_, BoxError>(Outcome::Next)
        }
    }
}

fn taken(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn unmatched_path_passes_through_without_invoking_handlers() {
    let log: Log = Default::default();
    let routes = Routes::new().route("/declared", recorder(&log, "declared"));
    let pipeline = Pipeline::builder(routes).build();

    let done = pipeline.run(Request::get("/undeclared")).await.unwrap();
    assert!(matches!(done.outcome(), Outcome::Next));
    assert!(taken(&log).is_empty());
}

#[tokio::test]
async fn nested_routes_run_ancestors_then_leaf_and_skip_siblings() {
    let log: Log = Default::default();
    let routes = Routes::new()
        .nest(
            "/admin",
            Routes::new()
                .handle(recorder(&log, "admin"))
                .route("/users", recorder(&log, "users")),
        )
        .route("/other", recorder(&log, "other"));
    let pipeline = Pipeline::builder(routes).build();

    pipeline.run(Request::get("/admin/users")).await.unwrap();
    assert_eq!(taken(&log), vec!["admin", "users"]);
}

#[tokio::test]
async fn phases_run_before_main_after() {
    let log: Log = Default::default();
    let routes = Routes::new().route("/x", recorder(&log, "main"));
    let pipeline = Pipeline::builder(routes)
        .before(recorder(&log, "before"))
        .after(recorder(&log, "after"))
        .build();

    pipeline.run(Request::get("/x")).await.unwrap();
    assert_eq!(taken(&log), vec!["before", "main", "after"]);
}

#[tokio::test]
async fn header_set_by_one_handler_is_visible_to_the_next() {
    async fn set_header(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        req.insert_header("x-a", "1")?;
        Ok(Outcome::Next)
    }
    async fn read_header(req: Request, ev: Event) -> Result<Outcome, BoxError> {
        ev.put("seen", &req.header("x-a"))?;
        Ok(Outcome::Next)
    }

    let shared = Arc::new(MemoryStorage::new());
    let routes = Routes::new().nest("/x", Routes::new().handle(set_header).handle(read_header));
    let pipeline = Pipeline::builder(routes)
        .storage(StorageProvider::Instance(shared.clone()))
        .build();

    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert_eq!(shared.get("seen"), Some(serde_json::json!("1")));
    assert_eq!(done.request_headers().get("x-a").unwrap(), "1");
}

#[tokio::test]
async fn removed_header_surfaces_as_deletion_sentinel() {
    async fn drop_header(req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        req.remove_header("x-preset");
        Ok(Outcome::Next)
    }

    let mut headers = HeaderMap::new();
    headers.insert("x-preset", "v".parse().unwrap());
    let request = Request::new(Method::GET, "/x".parse::<Uri>().unwrap(), headers);

    let routes = Routes::new().route("/x", drop_header);
    let pipeline = Pipeline::builder(routes).build();

    let done = pipeline.run(request).await.unwrap();
    assert_eq!(done.request_headers().get("x-preset").unwrap(), "");
}

#[tokio::test]
async fn redirect_stops_remaining_main_handlers() {
    let log: Log = Default::default();
    async fn to_login(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::redirect("/login".parse()?, StatusCode::FOUND))
    }

    let routes = Routes::new().nest(
        "/secure",
        Routes::new().handle(to_login).handle(recorder(&log, "never")),
    );
    let pipeline = Pipeline::builder(routes).build();

    let done = pipeline.run(Request::get("/secure")).await.unwrap();
    match done.outcome() {
        Outcome::Redirect { location, status } => {
            assert_eq!(location.path(), "/login");
            assert_eq!(*status, StatusCode::FOUND);
        }
        other => panic!("expected redirect, got {other:?}"),
    }
    assert!(taken(&log).is_empty());
}

#[tokio::test]
async fn rewrite_stops_remaining_main_handlers() {
    let log: Log = Default::default();
    async fn to_maintenance(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::rewrite("/maintenance".parse()?))
    }

    let routes = Routes::new().nest(
        "/app",
        Routes::new().handle(to_maintenance).handle(recorder(&log, "never")),
    );
    let pipeline = Pipeline::builder(routes).build();

    let done = pipeline.run(Request::get("/app")).await.unwrap();
    match done.outcome() {
        Outcome::Rewrite { destination } => assert_eq!(destination.path(), "/maintenance"),
        other => panic!("expected rewrite, got {other:?}"),
    }
    assert!(taken(&log).is_empty());
}

#[tokio::test]
async fn skip_ends_only_the_current_phase() {
    let log: Log = Default::default();
    async fn skipper(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        ev.skip();
        ev.skip(); // idempotent
        Ok(Outcome::Next)
    }

    let routes = Routes::new().route("/x", recorder(&log, "main"));
    let pipeline = Pipeline::builder(routes)
        .before(skipper)
        .before(recorder(&log, "second-before"))
        .after(recorder(&log, "after"))
        .build();

    pipeline.run(Request::get("/x")).await.unwrap();
    assert_eq!(taken(&log), vec!["main", "after"]);
}

#[tokio::test]
async fn skip_after_discards_the_after_phase() {
    let log: Log = Default::default();
    async fn skipper(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        ev.skip_after();
        Ok(Outcome::Next)
    }

    let routes = Routes::new().nest(
        "/x",
        Routes::new().handle(skipper).handle(recorder(&log, "same-phase")),
    );
    let pipeline = Pipeline::builder(routes).after(recorder(&log, "after")).build();

    pipeline.run(Request::get("/x")).await.unwrap();
    assert!(taken(&log).is_empty());
}

#[tokio::test]
async fn after_runs_on_termination_by_default_and_can_be_disabled() {
    async fn respond(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::Respond(Response::status(StatusCode::NO_CONTENT)))
    }

    let log: Log = Default::default();
    let routes = Routes::new().route("/x", respond);
    let pipeline = Pipeline::builder(routes).after(recorder(&log, "after")).build();
    pipeline.run(Request::get("/x")).await.unwrap();
    assert_eq!(taken(&log), vec!["after"]);

    let log: Log = Default::default();
    let routes = Routes::new().route("/x", respond);
    let pipeline = Pipeline::builder(routes)
        .after(recorder(&log, "after"))
        .after_on_terminate(false)
        .build();
    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert!(taken(&log).is_empty());
    assert!(done.outcome().is_terminating());
}

#[tokio::test]
async fn termination_in_before_skips_main() {
    let log: Log = Default::default();
    async fn respond(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::Respond(Response::text("early")))
    }

    let routes = Routes::new().route("/x", recorder(&log, "main"));
    let pipeline = Pipeline::builder(routes).before(respond).build();

    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert!(done.outcome().is_terminating());
    assert!(taken(&log).is_empty());
}

#[tokio::test]
async fn concurrent_invocations_do_not_share_context() {
    async fn write_then_read(req: Request, ev: Event) -> Result<Outcome, BoxError> {
        let id = req.header("x-id").unwrap_or_default();
        ev.put("id", &id)?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen: String = ev.get_as("id").unwrap_or_default();
        assert_eq!(seen, id, "context leaked across invocations");
        Ok(Outcome::Next)
    }

    let routes = Routes::new().route("/x", write_then_read);
    let pipeline = Arc::new(Pipeline::builder(routes).build());

    let req = |id: &str| {
        let mut headers = HeaderMap::new();
        headers.insert("x-id", id.parse().unwrap());
        Request::new(Method::GET, "/x".parse::<Uri>().unwrap(), headers)
    };

    let a = pipeline.run(req("alpha"));
    let b = pipeline.run(req("beta"));
    let (ra, rb) = tokio::join!(a, b);
    ra.unwrap();
    rb.unwrap();
}

#[tokio::test]
async fn factory_provider_isolates_concurrent_invocations() {
    async fn write_then_read(req: Request, ev: Event) -> Result<Outcome, BoxError> {
        let id = req.header("x-id").unwrap_or_default();
        ev.put("id", &id)?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen: String = ev.get_as("id").unwrap_or_default();
        assert_eq!(seen, id, "context leaked across invocations");
        Ok(Outcome::Next)
    }

    let routes = Routes::new().route("/x", write_then_read);
    let pipeline = Arc::new(
        Pipeline::builder(routes)
            .storage(StorageProvider::factory(|| Arc::new(MemoryStorage::new())))
            .build(),
    );

    let req = |id: &str| {
        let mut headers = HeaderMap::new();
        headers.insert("x-id", id.parse().unwrap());
        Request::new(Method::GET, "/x".parse::<Uri>().unwrap(), headers)
    };

    let a = pipeline.run(req("alpha"));
    let b = pipeline.run(req("beta"));
    let (ra, rb) = tokio::join!(a, b);
    ra.unwrap();
    rb.unwrap();
}

#[tokio::test]
async fn typed_context_values_round_trip_intact() {
    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Session {
        user: String,
        admin: bool,
    }

    async fn write(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        ev.put("session", &Session { user: "ada".to_owned(), admin: true })?;
        Ok(Outcome::Next)
    }
    async fn read(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        let session: Session = ev.get_as("session").expect("session missing");
        assert_eq!(session, Session { user: "ada".to_owned(), admin: true });
        Ok(Outcome::Respond(Response::text("ok")))
    }

    let routes = Routes::new().nest("/x", Routes::new().handle(write).handle(read));
    let pipeline = Pipeline::builder(routes).build();
    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert!(done.outcome().is_terminating());
}

#[tokio::test]
async fn silent_mode_continues_and_records_the_error() {
    async fn failing(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Err("database unreachable".into())
    }
    async fn inspect(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        let recorded = ev.storage().get(trellis::ERROR_KEY).expect("error not recorded");
        assert_eq!(recorded["chain"], "main");
        assert_eq!(recorded["index"], 0);
        assert_eq!(recorded["routeKey"], "/x");
        assert_eq!(recorded["message"], "database unreachable");
        Ok(Outcome::Respond(Response::text("recovered")))
    }

    let routes = Routes::new().nest("/x", Routes::new().handle(failing).handle(inspect));
    let pipeline = Pipeline::builder(routes).silent(true).build();

    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert!(done.outcome().is_terminating());
}

#[tokio::test]
async fn unhandled_error_propagates_with_metadata() {
    async fn ok(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::Next)
    }
    async fn failing(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Err("boom".into())
    }

    let routes = Routes::new().nest("/a", Routes::new().handle(ok).handle(failing));
    let pipeline = Pipeline::builder(routes).build();

    let err = pipeline.run(Request::get("/a")).await.unwrap_err();
    match err {
        Error::Handler { phase, index, pathname, route_key, source } => {
            assert_eq!(phase, Phase::Main);
            assert_eq!(index, 1);
            assert_eq!(pathname, "/a");
            assert_eq!(route_key, "/a");
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("expected handler error, got {other:?}"),
    }
}

#[tokio::test]
async fn custom_error_handler_result_is_classified_like_a_handler() {
    async fn failing(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Err("boom".into())
    }

    let log: Log = Default::default();
    let routes = Routes::new().route("/x", failing);
    let pipeline = Pipeline::builder(routes)
        .after(recorder(&log, "after"))
        .error_handler(|err, meta| async move {
            assert!(matches!(err, Error::Handler { .. }));
            assert_eq!(meta.phase(), Phase::Main);
            Ok::<_, BoxError>(Outcome::Respond(Response::status(StatusCode::SERVICE_UNAVAILABLE)))
        })
        .build();

    let done = pipeline.run(Request::get("/x")).await.unwrap();
    match done.outcome() {
        Outcome::Respond(resp) => assert_eq!(resp.status_code(), StatusCode::SERVICE_UNAVAILABLE),
        other => panic!("expected response, got {other:?}"),
    }
    assert_eq!(taken(&log), vec!["after"]);
}

#[tokio::test]
async fn custom_error_handler_can_continue_the_chain() {
    let log: Log = Default::default();
    async fn failing(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        Err("boom".into())
    }

    let routes = Routes::new().nest(
        "/x",
        Routes::new().handle(failing).handle(recorder(&log, "next")),
    );
    let pipeline = Pipeline::builder(routes)
        .error_handler(|_err, _meta| async move { Ok::<_, BoxError>(Outcome::Next) })
        .build();

    pipeline.run(Request::get("/x")).await.unwrap();
    assert_eq!(taken(&log), vec!["next"]);
}

#[tokio::test]
async fn params_reach_the_handler() {
    async fn show(_req: Request, ev: Event) -> Result<Outcome, BoxError> {
        assert_eq!(ev.params().get_str("category"), Some("electronics"));
        assert_eq!(ev.params().get_str("id"), Some("42"));
        Ok(Outcome::Respond(Response::text("ok")))
    }

    let routes = Routes::new().route("/shop/:category/:id", show);
    let pipeline = Pipeline::builder(routes).build();
    let done = pipeline.run(Request::get("/shop/electronics/42")).await.unwrap();
    assert!(done.outcome().is_terminating());
}

#[tokio::test]
async fn malformed_percent_encoding_fails_the_invocation() {
    let routes = Routes::new().route("/x", |_req: Request, _ev: Event| async {
        Ok::<_, BoxError>(Outcome::Next)
    });
    let pipeline = Pipeline::builder(routes).build();

    let err = pipeline.run(Request::get("/bad%zz")).await.unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
}

#[tokio::test]
async fn broken_route_pattern_fails_the_invocation() {
    let routes = Routes::new().route("/:id([", |_req: Request, _ev: Event| async {
        Ok::<_, BoxError>(Outcome::Next)
    });
    let pipeline = Pipeline::builder(routes).build();

    let err = pipeline.run(Request::get("/anything")).await.unwrap_err();
    assert!(matches!(err, Error::Pattern { .. }));
}

#[tokio::test]
async fn timing_is_captured_when_enabled() {
    async fn slow(_req: Request, _ev: Event) -> Result<Outcome, BoxError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Outcome::Next)
    }

    let routes = Routes::new().route("/x", slow);
    let pipeline = Pipeline::builder(routes).timing(true).build();
    let done = pipeline.run(Request::get("/x")).await.unwrap();
    let timings = done.timings().expect("timings enabled");
    assert!(timings.main >= Duration::from_millis(5));
    assert!(timings.total >= timings.main);

    let pipeline = Pipeline::builder(Routes::new()).build();
    let done = pipeline.run(Request::get("/x")).await.unwrap();
    assert!(done.timings().is_none());
}

#[tokio::test]
async fn cache_clear_is_safe_between_runs() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = {
        let hits = Arc::clone(&hits);
        move |_req: Request, _ev: Event| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Outcome::Next)
            }
        }
    };

    let routes = Routes::new().route("/a/:x", counter);
    let pipeline = Pipeline::builder(routes).build();

    pipeline.run(Request::get("/a/1")).await.unwrap();
    assert!(pipeline.cache_stats().compiled_patterns >= 1);
    pipeline.clear_cache();
    assert_eq!(pipeline.cache_stats().compiled_patterns, 0);
    pipeline.run(Request::get("/a/1")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
