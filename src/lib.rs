//! # datarouter
//!
//! Nested route matching and data orchestration for client and server:
//!
//! - **Path Patterns** - `:param`, `:optional?` and trailing `*` segments compiled to matchers
//! - **Ranked Branches** - Route trees flattened and scored so the most specific route wins
//! - **Navigation State Machine** - Loaders, actions, revalidation, fetchers and blockers
//!   behind immutable [`RouterState`] snapshots
//! - **Single Fetch** - One streamed request per navigation, with deferred values and
//!   in-band redirects
//! - **Static Handler** - The same loader/action pipeline, stateless, for servers
//!
//! # Quick Start
//!
//! ```
//! use datarouter::{MemoryHistory, NavigateOptions, Route, Router, RouterOptions};
//! use serde_json::json;
//!
//! let routes = vec![Route::new("/")
//!     .id("root")
//!     .loader(|_| async { Ok(json!({ "user": "ada" })) })
//!     .children(vec![
//!         Route::index().id("home"),
//!         Route::new("projects/:id")
//!             .id("project")
//!             .loader(|args| async move { Ok(json!({ "id": args.params.get("id") })) }),
//!     ])];
//!
//! let router = Router::new(routes, RouterOptions::new().history(MemoryHistory::new("/"))).unwrap();
//! pollster::block_on(async {
//!     router.initialize().await.unwrap();
//!     router.navigate("/projects/7", NavigateOptions::new()).await.unwrap();
//! });
//!
//! let state = router.state();
//! assert_eq!(state.route_ids(), vec!["root", "project"]);
//! assert_eq!(state.route_data("project"), Some(&json!({ "id": "7" })));
//! ```
//!
//! # Matching
//!
//! Matching is a pure function of the route tree and the URL:
//!
//! ```
//! use datarouter::{match_routes, DataRoutes, Route};
//!
//! let routes = DataRoutes::new(vec![
//!     Route::new("/:lang?/about").id("about"),
//!     Route::new("/*").id("catch-all"),
//! ])
//! .unwrap();
//!
//! let matches = match_routes(&routes, "/en/about", "/").unwrap();
//! assert_eq!(matches[0].route.id, "about");
//! assert_eq!(matches[0].params.get("lang"), Some("en"));
//! ```
//!
//! # Servers
//!
//! [`StaticHandler`] answers document requests; [`DataRequestHandler`] answers
//! `.data` requests from a [`SingleFetchStrategy`] on the client.
//!
//! # Feature Flags
//!
//! - `log` (default) - Uses the standard `log` crate for logging
//! - `tracing` - Uses the `tracing` crate for structured logging (mutually exclusive with `log`)
//! - `cache` (default) - LRU cache of compiled path patterns

#![doc(html_root_url = "https://docs.rs/datarouter/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
// Lints are configured in Cargo.toml [lints] section

// Logging abstraction
pub mod logging;

// Cache (optional)
#[cfg(feature = "cache")]
pub mod cache;

// Matching
pub mod branch;
pub mod matcher;
pub mod path;

// Route definitions
pub mod manifest;
pub mod route;

// Shared value types
pub mod context;
pub mod error;
pub mod location;
pub mod params;
pub mod request;

// Loader/action pipeline
pub mod data;
pub mod instrument;
pub mod middleware;

// Client state machine
pub mod blocker;
pub mod fetcher;
pub mod history;
pub mod revalidation;
pub mod router;
pub mod scroll;
pub mod state;

// Single fetch and servers
pub mod codec;
pub mod server;
pub mod single_fetch;
pub mod static_handler;

// Re-export main types for convenient access
pub use blocker::{blocker_fn, BlockerFunction, BlockerFunctionArgs, BlockerState, DEFAULT_BLOCKER_KEY};
pub use branch::{explode_optional_segments, flatten_routes, rank_route_branches, RouteBranch, RouteMeta};
#[cfg(feature = "cache")]
pub use cache::{CacheStats, PatternCache};
pub use codec::{
    decode, decode_all, encode, DecodedPayload, DeferredSlot, OutgoingPayload, OutgoingResult, Settlement,
    SingleFetchPayload, SingleFetchResult,
};
pub use context::{ContextFactory, ContextKey, RouterContextProvider};
pub use data::{
    DataResult, DataResults, DataStrategy, DataStrategyArgs, DataStrategyMatch, DefaultDataStrategy, DeferredData,
    Redirect,
};
pub use error::{ErrorResponse, Exception, RouteError, RouterError, ServerMode, Thrown};
pub use fetcher::{FetchOptions, FetcherState, FetcherStatus};
pub use history::{History, MemoryHistory};
pub use instrument::{BoxedInstrumentation, Instrumentation, InstrumentationRegistry, LoggingInstrumentation};
pub use location::{create_path, parse_path, Location, NavigationType, Path};
pub use manifest::{DataRoute, DataRoutes, RouteManifest};
pub use matcher::{match_routes, match_routes_partial, strip_basename, RouteMatch};
pub use middleware::{middleware_fn, BoxedMiddleware, FnMiddleware, Middleware, MiddlewareArgs, Next};
pub use params::{RouteParams, SearchParams};
pub use path::{compile_path, generate_path, join_paths, match_path, resolve_path, PathMatch, PathPattern};
pub use request::{
    FormData, FormEncType, FormMethod, Request, RequestBody, Response, ResponseBody, Submission, SubmissionPayload,
};
pub use revalidation::ShouldRevalidateArgs;
pub use route::{handler_fn, DataFunctionArgs, Handler, HandlerKind, HandlerOutput, HandlerResult, Route};
pub use router::{
    NavigateOptions, NavigationOutcome, PatchRoutesArgs, RoutePatch, Router, RouterOptions, Subscriber, SubscriberId,
};
pub use scroll::{RestoreScroll, ScrollPositions, ScrollRestoration};
pub use server::DataRequestHandler;
pub use single_fetch::{
    parse_data_request, single_fetch_url, DataRequest, DataTransport, SingleFetchStrategy, DATA_CONTENT_TYPE,
};
pub use state::{HydrationData, Navigation, RevalidationState, RouterState};
pub use static_handler::{
    context_from_error, QueryOptions, QueryResult, StaticHandler, StaticHandlerContext, StaticHandlerOptions,
};
