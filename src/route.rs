//! Route definition and configuration
//!
//! A [`Route`] is what users register: a path pattern plus the loader,
//! action, middleware and revalidation policy attached to it. Registration
//! turns the tree into [`DataRoute`](crate::DataRoute)s with stable ids.

use crate::context::RouterContextProvider;
use crate::data::DeferredData;
use crate::error::{RouterError, Thrown};
use crate::middleware::BoxedMiddleware;
use crate::params::RouteParams;
use crate::request::{Request, Response};
use crate::revalidation::ShouldRevalidateArgs;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// Handlers
// ============================================================================

/// Arguments passed to every loader and action.
#[derive(Debug, Clone)]
pub struct DataFunctionArgs {
    pub request: Request,
    /// Params of the whole match chain, root to leaf
    pub params: RouteParams,
    pub context: RouterContextProvider,
}

/// What a loader or action produced.
#[derive(Debug)]
pub enum HandlerOutput {
    /// Plain data, available immediately
    Data(Value),
    /// A response: redirects are followed, other statuses carry data
    Response(Response),
    /// Data with some keys still pending
    Deferred(DeferredData),
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl From<Response> for HandlerOutput {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<DeferredData> for HandlerOutput {
    fn from(deferred: DeferredData) -> Self {
        Self::Deferred(deferred)
    }
}

impl From<()> for HandlerOutput {
    fn from((): ()) -> Self {
        Self::Data(Value::Null)
    }
}

pub type HandlerResult = Result<HandlerOutput, Thrown>;

/// A type-erased loader or action.
pub type Handler = Arc<dyn Fn(DataFunctionArgs) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A route's revalidation policy.
pub type ShouldRevalidateFn = Arc<dyn Fn(&ShouldRevalidateArgs) -> bool + Send + Sync>;

/// Which handler of a route runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Loader,
    Action,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loader => "loader",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Erase an async function into a [`Handler`].
///
/// The function may return anything convertible into [`HandlerOutput`]:
/// a `serde_json::Value`, a [`Response`], [`DeferredData`] or `()`.
pub fn handler_fn<F, Fut, T>(f: F) -> Handler
where
    F: Fn(DataFunctionArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Thrown>> + Send + 'static,
    T: Into<HandlerOutput>,
{
    Arc::new(
        move |args: DataFunctionArgs| -> BoxFuture<'static, HandlerResult> {
            f(args).map(|result| result.map(Into::into)).boxed()
        },
    )
}

// ============================================================================
// Route Validation
// ============================================================================

fn invalid(path: &str, reason: impl Into<String>) -> RouterError {
    RouterError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Validate a route path pattern
///
/// # Validation Rules
///
/// - Path can be empty (layout and index routes)
/// - No consecutive slashes (`//`)
/// - Parameter names are non-empty and made of letters, digits, `_` or `-`
/// - No duplicate parameter names
/// - `*` only as the whole last segment; `/files*` is accepted and read as `/files/*`
pub fn validate_route_path(path: &str) -> Result<(), RouterError> {
    if path.is_empty() {
        return Ok(());
    }

    if path.contains("//") {
        return Err(invalid(path, "Route path cannot contain consecutive slashes"));
    }

    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len() - 1;
    let mut param_names = HashSet::new();

    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with('*') && (*segment != "*" || index != last) {
            return Err(invalid(
                path,
                "Only a bare `*` or `/*` pattern may start with `*`, and only as the last segment",
            ));
        }
        if segment.contains('*') && index != last {
            return Err(invalid(path, "A splat may only appear at the end of a path"));
        }

        if let Some(param) = segment.strip_prefix(':') {
            let name_len = param
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(param.len());
            let name = &param[..name_len];
            if name.is_empty() {
                return Err(invalid(path, "Route parameter name cannot be empty"));
            }
            if !param_names.insert(name.to_string()) {
                return Err(invalid(path, format!("Duplicate route parameter: '{}'", name)));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Route
// ============================================================================

/// A route definition
///
/// ```
/// use datarouter::Route;
/// use serde_json::json;
///
/// let routes = vec![Route::new("/")
///     .id("root")
///     .error_boundary(true)
///     .loader(|_args| async { Ok(json!({"user": "ada"})) })
///     .children(vec![
///         Route::index().loader(|_args| async { Ok(json!("home")) }),
///         Route::new("projects/:id").loader(|args| async move {
///             Ok(json!({"id": args.params.get("id")}))
///         }),
///     ])];
/// # let _ = routes;
/// ```
#[derive(Clone, Default)]
pub struct Route {
    /// Explicit id; derived from the tree position when absent
    pub id: Option<String>,
    /// Path pattern; `None` for pathless layout routes and most index routes
    pub path: Option<String>,
    pub index: bool,
    pub case_sensitive: bool,
    pub children: Vec<Route>,
    pub loader: Option<Handler>,
    pub action: Option<Handler>,
    pub middleware: Vec<BoxedMiddleware>,
    pub should_revalidate: Option<ShouldRevalidateFn>,
    /// Whether the route renders its own error boundary
    pub has_error_boundary: bool,
    /// Arbitrary user metadata
    pub handle: Option<Value>,
}

impl Route {
    /// A route with a path pattern.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// An index route: rendered at its parent's path, never has children.
    pub fn index() -> Self {
        Self {
            index: true,
            ..Self::default()
        }
    }

    /// A pathless layout route.
    pub fn layout() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn children(mut self, children: Vec<Route>) -> Self {
        self.children = children;
        self
    }

    pub fn child(mut self, child: Route) -> Self {
        self.children.push(child);
        self
    }

    /// Attach a loader.
    pub fn loader<F, Fut, T>(mut self, loader: F) -> Self
    where
        F: Fn(DataFunctionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Thrown>> + Send + 'static,
        T: Into<HandlerOutput>,
    {
        self.loader = Some(handler_fn(loader));
        self
    }

    /// Attach an action.
    pub fn action<F, Fut, T>(mut self, action: F) -> Self
    where
        F: Fn(DataFunctionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Thrown>> + Send + 'static,
        T: Into<HandlerOutput>,
    {
        self.action = Some(handler_fn(action));
        self
    }

    /// Append a middleware; chains run root to leaf.
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: crate::middleware::Middleware,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn should_revalidate<F>(mut self, policy: F) -> Self
    where
        F: Fn(&ShouldRevalidateArgs) -> bool + Send + Sync + 'static,
    {
        self.should_revalidate = Some(Arc::new(policy));
        self
    }

    pub fn error_boundary(mut self, has_error_boundary: bool) -> Self {
        self.has_error_boundary = has_error_boundary;
        self
    }

    pub fn handle(mut self, handle: Value) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("children", &self.children)
            .field("has_loader", &self.loader.is_some())
            .field("has_action", &self.action.is_some())
            .field("middleware", &self.middleware.len())
            .field("has_error_boundary", &self.has_error_boundary)
            .finish()
    }
}
