//! Single-fetch protocol
//!
//! Route data is addressed by appending `.data` to the document pathname;
//! `/_root.data` addresses `/`. A `_routes=a,b` search param restricts which
//! loaders run, and `?index` still selects an index route over its layout.
//!
//! [`SingleFetchStrategy`] plugs into the router as its [`DataStrategy`]: the
//! loaders of a navigation are fetched with one request over a
//! [`DataTransport`] and the decoded payload is split back per route.

use crate::codec::{decode_all, SingleFetchPayload};
use crate::data::{DataResult, DataResults, DataStrategy, DataStrategyArgs};
use crate::error::{RouteError, RouterError, Thrown};
use crate::matcher::strip_basename;
use crate::params::SearchParams;
use crate::request::{Request, RequestBody, Response};
use crate::route::HandlerKind;
use crate::{debug_log, trace_log};
use futures::future::BoxFuture;
use futures::FutureExt;
use http::Method;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Suffix that turns a document path into a data path.
pub const DATA_SUFFIX: &str = ".data";

/// Segment standing in for `/` (or the basename) in data paths.
pub const ROOT_SEGMENT: &str = "_root";

/// Search param listing the routes whose loaders should run.
pub const ROUTES_PARAM: &str = "_routes";

/// Content type of single-fetch responses.
pub const DATA_CONTENT_TYPE: &str = "application/x-ndjson";

/// HTTP status that carries an in-band redirect.
pub const REDIRECT_STATUS: u16 = 202;

/// Statuses that never carry a body.
pub const NO_BODY_STATUSES: [u16; 5] = [100, 101, 204, 205, 304];

// ============================================================================
// URL convention
// ============================================================================

/// The data URL for a document URL.
///
/// ```
/// use datarouter::single_fetch_url;
/// use url::Url;
///
/// let url = Url::parse("http://localhost/projects/1/?tab=files").unwrap();
/// assert_eq!(single_fetch_url(&url, "/").as_str(), "http://localhost/projects/1.data?tab=files");
///
/// let url = Url::parse("http://localhost/app").unwrap();
/// assert_eq!(single_fetch_url(&url, "/app").path(), "/app/_root.data");
/// ```
pub fn single_fetch_url(url: &Url, basename: &str) -> Url {
    let mut data_url = url.clone();
    let pathname = url.path();
    let path = if pathname == "/" {
        format!("/{}{}", ROOT_SEGMENT, DATA_SUFFIX)
    } else if basename != "/" && !basename.is_empty() && strip_basename(pathname, basename) == Some("/") {
        format!("{}/{}{}", basename.trim_end_matches('/'), ROOT_SEGMENT, DATA_SUFFIX)
    } else {
        format!("{}{}", pathname.trim_end_matches('/'), DATA_SUFFIX)
    };
    data_url.set_path(&path);
    data_url.set_fragment(None);
    data_url
}

/// A parsed data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    /// The document URL the data is for, without `_routes`
    pub url: Url,
    /// Loaders to run; `None` runs them all
    pub route_ids: Option<Vec<String>>,
}

/// Recognize a data URL; `None` for ordinary document URLs.
pub fn parse_data_request(url: &Url) -> Option<DataRequest> {
    let stem = url.path().strip_suffix(DATA_SUFFIX)?;
    let pathname = match stem.strip_suffix(ROOT_SEGMENT) {
        Some(prefix) if prefix.ends_with('/') => prefix.trim_end_matches('/'),
        _ => stem,
    };
    let pathname = if pathname.is_empty() { "/" } else { pathname };

    let mut search = SearchParams::parse(url.query().unwrap_or_default());
    let route_ids = search.get(ROUTES_PARAM).map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    });
    search.delete(ROUTES_PARAM);

    let mut document = url.clone();
    document.set_path(pathname);
    let query = search.to_search_string();
    document.set_query(query.strip_prefix('?'));
    Some(DataRequest {
        url: document,
        route_ids,
    })
}

// ============================================================================
// Client strategy
// ============================================================================

/// Sends a data request somewhere and returns the raw response.
pub trait DataTransport: Send + Sync + 'static {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, RouterError>>;
}

/// Loads through the data endpoint instead of calling handlers in-process.
#[derive(Clone)]
pub struct SingleFetchStrategy {
    transport: Arc<dyn DataTransport>,
    basename: String,
}

impl SingleFetchStrategy {
    pub fn new(transport: impl DataTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            basename: "/".to_string(),
        }
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }
}

impl fmt::Debug for SingleFetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFetchStrategy")
            .field("basename", &self.basename)
            .finish()
    }
}

impl DataStrategy for SingleFetchStrategy {
    fn call(&self, args: DataStrategyArgs) -> BoxFuture<'static, Result<DataResults, Thrown>> {
        let transport = Arc::clone(&self.transport);
        let basename = self.basename.clone();
        async move {
            match args.kind {
                HandlerKind::Loader => fetch_loaders(transport, &basename, args).await,
                HandlerKind::Action => fetch_action(transport, &basename, args).await,
            }
        }
        .boxed()
    }
}

async fn fetch_loaders(
    transport: Arc<dyn DataTransport>,
    basename: &str,
    args: DataStrategyArgs,
) -> Result<DataResults, Thrown> {
    let load_ids: Vec<String> = args.to_load().map(|m| m.route_id().to_string()).collect();
    if load_ids.is_empty() {
        return Ok(DataResults::new());
    }
    let mut url = single_fetch_url(args.request.url(), basename);
    let partial = args
        .matches
        .iter()
        .any(|m| m.route_match.route.has_loader() && !m.should_load);
    if partial {
        url.query_pairs_mut().append_pair(ROUTES_PARAM, &load_ids.join(","));
    }
    debug_log!("Single fetch GET {}", url);

    let request = args.request.derive(Method::GET, url, RequestBody::Empty);
    match fetch_payload(transport, request).await? {
        SingleFetchPayload::Routes(mut routes) => Ok(load_ids
            .into_iter()
            .map(|id| {
                let result = routes
                    .remove(&id)
                    .map_or_else(|| DataResult::data(Value::Null), DataResult::from);
                (id, result)
            })
            .collect()),
        SingleFetchPayload::Redirect(redirect) => {
            trace_log!("Single fetch redirected to '{}'", redirect.location);
            Ok(load_ids
                .into_iter()
                .map(|id| (id, DataResult::Redirect(redirect.clone())))
                .collect())
        }
        SingleFetchPayload::Result(_) => Err(Thrown::message("expected route results in a loader response")),
    }
}

async fn fetch_action(
    transport: Arc<dyn DataTransport>,
    basename: &str,
    args: DataStrategyArgs,
) -> Result<DataResults, Thrown> {
    let Some(target_id) = args.to_load().next().map(|m| m.route_id().to_string()) else {
        return Ok(DataResults::new());
    };
    let url = single_fetch_url(args.request.url(), basename);
    debug_log!("Single fetch {} {}", args.request.method(), url);

    let request = args
        .request
        .derive(args.request.method().clone(), url, args.request.body().clone());
    let result = match fetch_payload(transport, request).await? {
        SingleFetchPayload::Result(result) => DataResult::from(result),
        SingleFetchPayload::Redirect(redirect) => DataResult::Redirect(redirect),
        SingleFetchPayload::Routes(_) => {
            return Err(Thrown::message("expected a single result in an action response"));
        }
    };
    Ok(DataResults::from([(target_id, result)]))
}

async fn fetch_payload(transport: Arc<dyn DataTransport>, request: Request) -> Result<SingleFetchPayload, Thrown> {
    let response = transport.fetch(request).await.map_err(transport_error)?;
    decode_all(response.into_body_stream()).await.map_err(transport_error)
}

fn transport_error(error: RouterError) -> Thrown {
    Thrown::Error(RouteError::exception(error.to_string()))
}
