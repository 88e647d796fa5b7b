//! The data endpoint
//!
//! [`DataRequestHandler`] answers `.data` requests: it runs a
//! [`StaticHandler`] query for the document URL and streams the per-route
//! results through the single-fetch codec. Redirects are answered with
//! `202 Accepted` and the redirect descriptor in the body, so no HTTP layer in
//! between follows them on the caller's behalf.

use crate::codec::{encode, OutgoingPayload, OutgoingResult};
use crate::data::Redirect;
use crate::error::{Exception, RouteError, RouterError, ServerMode};
use crate::request::{Request, Response};
use crate::single_fetch::{
    parse_data_request, DataTransport, DATA_CONTENT_TYPE, NO_BODY_STATUSES, REDIRECT_STATUS,
};
use crate::static_handler::{QueryOptions, QueryResult, StaticHandler, StaticHandlerContext};
use crate::{debug_log, error_log, warn_log};
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::HeaderMap;

/// Serves single-fetch data requests.
#[derive(Debug, Clone)]
pub struct DataRequestHandler {
    handler: StaticHandler,
    mode: ServerMode,
}

impl DataRequestHandler {
    /// The mode is read from `DATAROUTER_MODE`; see [`ServerMode::from_env`].
    pub fn new(handler: StaticHandler) -> Self {
        Self {
            handler,
            mode: ServerMode::from_env(),
        }
    }

    pub fn mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn server_mode(&self) -> ServerMode {
        self.mode
    }

    pub fn static_handler(&self) -> &StaticHandler {
        &self.handler
    }

    /// Answer one data request. Never fails: problems become error payloads.
    pub async fn handle(&self, request: Request) -> Response {
        let Some(data_request) = parse_data_request(request.url()) else {
            warn_log!("Not a data request: {}", request.url());
            return Response::new(404);
        };
        let is_mutation = request.is_mutation();
        let document_request = request.derive(request.method().clone(), data_request.url, request.body().clone());
        let options = if is_mutation {
            QueryOptions::new().skip_revalidation(true)
        } else {
            QueryOptions {
                route_ids: data_request.route_ids,
                skip_loader_error_bubbling: true,
                ..QueryOptions::default()
            }
        };

        match self.handler.query(document_request, options).await {
            Ok(QueryResult::Response(response)) => self.redirect_response(response),
            Ok(QueryResult::Context(context)) if is_mutation => self.action_response(context),
            Ok(QueryResult::Context(context)) => self.loader_response(context),
            Err(error) => self.unexpected(error),
        }
    }

    fn loader_response(&self, mut context: StaticHandlerContext) -> Response {
        let mut errors = context.errors.take().unwrap_or_default();
        let mut routes = Vec::new();
        for route_match in &context.matches {
            let id = &route_match.route.id;
            let result = if let Some(error) = errors.remove(id) {
                OutgoingResult::Error(error)
            } else if let Some(deferred) = context.deferred.remove(id) {
                OutgoingResult::Deferred(deferred)
            } else if let Some(data) = context.loader_data.remove(id) {
                OutgoingResult::Data(data)
            } else {
                continue;
            };
            routes.push((id.clone(), result));
        }
        let headers = merge_headers(context.loader_headers.values());
        self.payload_response(context.status_code, OutgoingPayload::Routes(routes), headers)
    }

    fn action_response(&self, context: StaticHandlerContext) -> Response {
        let error = context.errors.and_then(|errors| errors.into_values().next());
        let result = match error {
            Some(error) => OutgoingResult::Error(error),
            None => OutgoingResult::Data(
                context
                    .action_data
                    .and_then(|data| data.into_values().next())
                    .unwrap_or_default(),
            ),
        };
        let headers = merge_headers(context.action_headers.values());
        self.payload_response(context.status_code, OutgoingPayload::Result(result), headers)
    }

    fn redirect_response(&self, response: Response) -> Response {
        let Some(redirect) = Redirect::from_response(&response) else {
            return self.unexpected(RouterError::Decode(format!(
                "query produced a non-redirect response ({})",
                response.status()
            )));
        };
        debug_log!("Data request redirected ({}) to '{}'", redirect.status, redirect.location);
        let mut headers = response.headers().clone();
        headers.remove(LOCATION);
        self.payload_response(REDIRECT_STATUS, OutgoingPayload::Redirect(redirect), headers)
    }

    fn unexpected(&self, error: RouterError) -> Response {
        error_log!("Data request failed: {}", error);
        let exception = if self.mode.is_development() {
            Exception::from_error(&error)
        } else {
            Exception::new("Unexpected Server Error")
        };
        let payload = OutgoingPayload::Result(OutgoingResult::Error(RouteError::Exception(exception)));
        self.payload_response(500, payload, HeaderMap::new())
    }

    fn payload_response(&self, status: u16, payload: OutgoingPayload, headers: HeaderMap) -> Response {
        let mut response = if NO_BODY_STATUSES.contains(&status) {
            Response::new(status)
        } else {
            Response::stream(status, encode(payload, self.mode)).with_header(CONTENT_TYPE, DATA_CONTENT_TYPE)
        };
        for (name, value) in headers.iter() {
            if name != CONTENT_TYPE && name != CONTENT_LENGTH {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }
}

impl DataTransport for DataRequestHandler {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, RouterError>> {
        let handler = self.clone();
        async move { Ok(handler.handle(request).await) }.boxed()
    }
}

fn merge_headers<'a>(maps: impl Iterator<Item = &'a HeaderMap>) -> HeaderMap {
    let mut merged = HeaderMap::new();
    for map in maps {
        for (name, value) in map.iter() {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_all, SingleFetchPayload, SingleFetchResult};
    use crate::data::DeferredData;
    use crate::error::Thrown;
    use crate::request::{FormData, RequestBody};
    use crate::route::Route;
    use crate::static_handler::StaticHandlerOptions;
    use serde_json::{json, Value};

    fn endpoint() -> DataRequestHandler {
        let _ = env_logger::builder().is_test(true).try_init();
        let routes = vec![Route::new("/")
            .id("root")
            .error_boundary(true)
            .loader(|_| async { Ok(json!({"user": "ada"})) })
            .children(vec![
                Route::new("posts")
                    .id("posts")
                    .loader(|_| async {
                        Ok(DeferredData::new()
                            .value("count", 2)
                            .defer("titles", async { Ok::<_, RouteError>(json!(["a", "b"])) }))
                    })
                    .action(|args| async move {
                        match args.request.form_data().and_then(|f| f.get("intent")) {
                            Some("create") => Ok(Response::redirect("/posts/3")),
                            Some("crash") => Err(Thrown::message("db down")),
                            _ => Ok(Response::json(json!({"saved": true}))),
                        }
                    }),
                Route::new("broken")
                    .id("broken")
                    .loader(|_| async { Err::<Value, _>(Thrown::status(418, "teapot")) }),
                Route::new("empty")
                    .id("empty")
                    .loader(|_| async { Ok(Response::new(204)) }),
            ])];
        let handler = StaticHandler::new(routes, StaticHandlerOptions::new()).unwrap();
        DataRequestHandler::new(handler).mode(ServerMode::Production)
    }

    fn post(url: &str, intent: &str) -> Request {
        Request::post(url, RequestBody::Form(FormData::new().field("intent", intent))).unwrap()
    }

    #[tokio::test]
    async fn test_loader_payload() {
        let response = endpoint()
            .handle(Request::get("http://localhost/posts.data").unwrap())
            .await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(DATA_CONTENT_TYPE)
        );
        let SingleFetchPayload::Routes(routes) = decode_all(response.into_body_stream()).await.unwrap() else {
            panic!("expected routes payload");
        };
        assert_eq!(routes["root"], SingleFetchResult::Data(json!({"user": "ada"})));
        assert_eq!(
            routes["posts"],
            SingleFetchResult::Data(json!({"count": 2, "titles": ["a", "b"]}))
        );
    }

    #[tokio::test]
    async fn test_routes_param_limits_loaders() {
        let response = endpoint()
            .handle(Request::get("http://localhost/posts.data?_routes=root").unwrap())
            .await;
        let SingleFetchPayload::Routes(routes) = decode_all(response.into_body_stream()).await.unwrap() else {
            panic!("expected routes payload");
        };
        assert_eq!(routes.len(), 1);
        assert!(routes.contains_key("root"));
    }

    #[tokio::test]
    async fn test_loader_error_stays_on_its_route() {
        let response = endpoint()
            .handle(Request::get("http://localhost/broken.data").unwrap())
            .await;
        assert_eq!(response.status(), 418);
        let SingleFetchPayload::Routes(routes) = decode_all(response.into_body_stream()).await.unwrap() else {
            panic!("expected routes payload");
        };
        assert!(matches!(&routes["broken"], SingleFetchResult::Error(e) if e.status() == 418));
        assert_eq!(routes["root"], SingleFetchResult::Data(json!({"user": "ada"})));
    }

    #[tokio::test]
    async fn test_action_redirect_is_202() {
        let response = endpoint().handle(post("http://localhost/posts.data", "create")).await;
        assert_eq!(response.status(), 202);
        assert!(response.location().is_none());
        let payload = decode_all(response.into_body_stream()).await.unwrap();
        assert_eq!(payload, SingleFetchPayload::Redirect(Redirect::new(302, "/posts/3")));
    }

    #[tokio::test]
    async fn test_action_result_and_sanitized_error() {
        let response = endpoint().handle(post("http://localhost/posts.data", "save")).await;
        assert_eq!(response.status(), 200);
        let payload = decode_all(response.into_body_stream()).await.unwrap();
        assert_eq!(payload, SingleFetchPayload::Result(SingleFetchResult::Data(json!({"saved": true}))));

        let response = endpoint().handle(post("http://localhost/posts.data", "crash")).await;
        assert_eq!(response.status(), 500);
        let payload = decode_all(response.into_body_stream()).await.unwrap();
        assert_eq!(
            payload,
            SingleFetchPayload::Result(SingleFetchResult::Error(RouteError::exception("db down")))
        );
    }

    #[tokio::test]
    async fn test_no_body_status() {
        let response = endpoint()
            .handle(Request::get("http://localhost/empty.data?_routes=empty").unwrap())
            .await;
        assert_eq!(response.status(), 204);
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_payload() {
        let response = endpoint()
            .handle(Request::get("http://localhost/nope.data").unwrap())
            .await;
        assert_eq!(response.status(), 404);
        let SingleFetchPayload::Routes(routes) = decode_all(response.into_body_stream()).await.unwrap() else {
            panic!("expected routes payload");
        };
        assert!(matches!(&routes["root"], SingleFetchResult::Error(e) if e.status() == 404));
    }

    #[tokio::test]
    async fn test_aborted_request_is_generic_500() {
        let request = Request::get("http://localhost/posts.data").unwrap();
        request.signal().cancel();
        let response = endpoint().handle(request).await;
        assert_eq!(response.status(), 500);
        let payload = decode_all(response.into_body_stream()).await.unwrap();
        assert_eq!(
            payload,
            SingleFetchPayload::Result(SingleFetchResult::Error(RouteError::exception(
                "Unexpected Server Error"
            )))
        );
    }

    #[tokio::test]
    async fn test_document_urls_are_not_data_requests() {
        let response = endpoint().handle(Request::get("http://localhost/posts").unwrap()).await;
        assert_eq!(response.status(), 404);
    }
}
