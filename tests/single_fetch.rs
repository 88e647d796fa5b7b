//! Single fetch end to end: the codec, the data endpoint and a router whose
//! data strategy talks to that endpoint in-process.

use datarouter::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn app_routes(root_loads: Arc<AtomicUsize>) -> Vec<Route> {
    vec![Route::new("/")
        .id("root")
        .error_boundary(true)
        .loader(move |_| {
            root_loads.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!({ "user": "ada" })) }
        })
        .children(vec![
            Route::index().id("home"),
            Route::new("posts/new").id("new-post").action(|args| async move {
                match args.request.form_data().and_then(|form| form.get("title")) {
                    Some("") | None => Ok(Response::json(json!({ "error": "title required" })).with_status(400)),
                    Some(_) => Ok(Response::redirect("/posts/3")),
                }
            }),
            Route::new("posts/:id").id("post").loader(|args| async move {
                let id = args.params.get("id").unwrap_or_default().to_string();
                Ok(DeferredData::new()
                    .value("id", id)
                    .defer("comments", async { Ok::<_, RouteError>(json!(["first!"])) }))
            }),
        ])]
}

fn endpoint(routes: Vec<Route>) -> DataRequestHandler {
    let handler = StaticHandler::new(routes, StaticHandlerOptions::new()).unwrap();
    DataRequestHandler::new(handler).mode(ServerMode::Test)
}

// ============================================================================
// Codec
// ============================================================================

#[tokio::test]
async fn test_codec_mixed_route_results() {
    init_logger();
    let failure = Exception::named("DbError", "connection reset").with_stack("at query (db.rs:1)");
    let payload = OutgoingPayload::Routes(vec![
        ("root".to_string(), OutgoingResult::Data(json!({ "$ref": 1, "n": null }))),
        ("post".to_string(), OutgoingResult::Error(RouteError::Exception(failure))),
        ("login".to_string(), OutgoingResult::Redirect(Redirect::new(302, "/login"))),
    ]);

    let decoded = decode_all(encode(payload, ServerMode::Production)).await.unwrap();
    let SingleFetchPayload::Routes(routes) = decoded else {
        panic!("expected routes payload");
    };
    assert_eq!(routes["root"], SingleFetchResult::Data(json!({ "$ref": 1, "n": null })));
    assert_eq!(
        routes["post"],
        SingleFetchResult::Error(RouteError::Exception(Exception::new("connection reset")))
    );
    assert_eq!(routes["login"], SingleFetchResult::Redirect(Redirect::new(302, "/login")));
}

// ============================================================================
// Data endpoint
// ============================================================================

#[tokio::test]
async fn test_post_redirect_is_reported_in_band() {
    init_logger();
    let handler = endpoint(app_routes(Arc::new(AtomicUsize::new(0))));
    let form = FormData::new().field("title", "Hello");
    let request = Request::post("http://localhost/posts/new.data", RequestBody::Form(form)).unwrap();

    let response = handler.handle(request).await;
    assert_eq!(response.status(), 202);
    assert!(response.location().is_none());
    let payload = decode_all(response.into_body_stream()).await.unwrap();
    assert_eq!(payload, SingleFetchPayload::Redirect(Redirect::new(302, "/posts/3")));
}

#[tokio::test]
async fn test_action_status_is_forwarded() {
    init_logger();
    let handler = endpoint(app_routes(Arc::new(AtomicUsize::new(0))));
    let form = FormData::new().field("title", "");
    let request = Request::post("http://localhost/posts/new.data", RequestBody::Form(form)).unwrap();

    let response = handler.handle(request).await;
    assert_eq!(response.status(), 400);
    let payload = decode_all(response.into_body_stream()).await.unwrap();
    assert_eq!(
        payload,
        SingleFetchPayload::Result(SingleFetchResult::Data(json!({ "error": "title required" })))
    );
}

// ============================================================================
// Router over single fetch
// ============================================================================

#[tokio::test]
async fn test_router_loads_through_data_endpoint() {
    init_logger();
    let root_loads = Arc::new(AtomicUsize::new(0));
    let routes = app_routes(Arc::clone(&root_loads));
    let strategy = SingleFetchStrategy::new(endpoint(routes.clone()));
    let router = Router::new(
        routes,
        RouterOptions::new()
            .data_strategy(strategy)
            .history(MemoryHistory::new("/")),
    )
    .unwrap();

    router.initialize().await.unwrap();
    assert_eq!(router.state().route_data("root"), Some(&json!({ "user": "ada" })));

    router.navigate("/posts/7", NavigateOptions::new()).await.unwrap();
    let state = router.state();
    assert_eq!(state.route_ids(), vec!["root", "post"]);
    assert_eq!(
        state.route_data("post"),
        Some(&json!({ "id": "7", "comments": ["first!"] }))
    );
    // The root loader is not asked for again on a plain GET navigation.
    assert_eq!(root_loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_router_follows_action_redirect_from_data_endpoint() {
    init_logger();
    let root_loads = Arc::new(AtomicUsize::new(0));
    let routes = app_routes(Arc::clone(&root_loads));
    let strategy = SingleFetchStrategy::new(endpoint(routes.clone()));
    let router = Router::new(
        routes,
        RouterOptions::new()
            .data_strategy(strategy)
            .history(MemoryHistory::new("/")),
    )
    .unwrap();
    router.initialize().await.unwrap();

    let submission = Submission::form(FormMethod::Post, "/posts/new", FormData::new().field("title", "Hello"));
    let outcome = router
        .navigate("/posts/new", NavigateOptions::new().submit(submission))
        .await
        .unwrap();

    assert_eq!(outcome, NavigationOutcome::Completed);
    let state = router.state();
    assert_eq!(state.location.pathname, "/posts/3");
    assert!(state.navigation.is_idle());
    assert!(state.errors.is_none());
    assert_eq!(state.route_data("post").and_then(|data| data.get("id")), Some(&Value::from("3")));
    // The action ran alone on the server; the redirect revalidated every loader.
    assert_eq!(root_loads.load(Ordering::SeqCst), 2);
}
