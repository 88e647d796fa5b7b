//! Route middleware
//!
//! Middleware wraps loader and action execution. Every matched route may
//! declare middleware; when any handler of a request runs, the chains of all
//! matched routes run root to leaf, each calling [`Next::run`] to continue
//! inward. A middleware can:
//! - put values in the context before handlers run
//! - inspect or rewrite the results on the way out
//! - short-circuit by returning an error or a redirect without calling `next`
//!
//! # Example
//!
//! ```
//! use datarouter::{middleware_fn, ContextKey, Route};
//!
//! let user = ContextKey::<String>::new("user");
//! let route = Route::new("/").middleware(middleware_fn(move |args, next| {
//!     let user = user.clone();
//!     async move {
//!         let context = args.context.with(&user, "ada".to_string());
//!         next.run(context).await
//!     }
//! }));
//! # let _ = route;
//! ```

use crate::context::RouterContextProvider;
use crate::data::DataResults;
use crate::error::Thrown;
use crate::params::RouteParams;
use crate::request::Request;
use crate::trace_log;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a middleware produces: the results of the handlers it wrapped.
pub type MiddlewareResult = Result<DataResults, Thrown>;

/// Arguments passed to a middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareArgs {
    pub request: Request,
    pub params: RouteParams,
    /// The context as left by outer middleware
    pub context: RouterContextProvider,
}

/// Middleware wrapping loader and action execution.
pub trait Middleware: Send + Sync + 'static {
    /// Run around the rest of the chain. Call `next.run(context)` to continue.
    fn handle(&self, args: MiddlewareArgs, next: Next) -> BoxFuture<'static, MiddlewareResult>;

    /// Middleware name for debugging
    fn name(&self) -> &str {
        "Middleware"
    }
}

pub type BoxedMiddleware = Arc<dyn Middleware>;

type Terminal = Box<dyn FnOnce(RouterContextProvider) -> BoxFuture<'static, MiddlewareResult> + Send>;

/// The remainder of a middleware chain.
pub struct Next {
    remaining: VecDeque<(String, BoxedMiddleware)>,
    request: Request,
    params: RouteParams,
    terminal: Terminal,
    thrower: Arc<Mutex<Option<String>>>,
}

impl Next {
    /// Continue with the next middleware, or run the handlers when the chain
    /// is exhausted.
    pub fn run(mut self, context: RouterContextProvider) -> BoxFuture<'static, MiddlewareResult> {
        let Some((route_id, middleware)) = self.remaining.pop_front() else {
            return (self.terminal)(context);
        };
        trace_log!("Middleware '{}' on route '{}'", middleware.name(), route_id);

        let args = MiddlewareArgs {
            request: self.request.clone(),
            params: self.params.clone(),
            context,
        };
        let thrower = Arc::clone(&self.thrower);
        let future = middleware.handle(args, self);
        async move {
            let result = future.await;
            if result.is_err() {
                // Errors propagate outward, so the innermost thrower records first.
                thrower.lock().get_or_insert(route_id);
            }
            result
        }
        .boxed()
    }

    /// Number of middleware still to run.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining.len())
            .finish()
    }
}

/// Function-based middleware
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> FnMiddleware<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(MiddlewareArgs, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    fn handle(&self, args: MiddlewareArgs, next: Next) -> BoxFuture<'static, MiddlewareResult> {
        (self.f)(args, next).boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Helper to create middleware from an async function
pub fn middleware_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(MiddlewareArgs, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    FnMiddleware {
        name: "FnMiddleware".to_string(),
        f,
    }
}

/// A middleware chain failed.
#[derive(Debug)]
pub struct MiddlewareError {
    /// Route whose middleware raised the error; `None` when the wrapped
    /// handlers failed as a whole
    pub route_id: Option<String>,
    pub thrown: Thrown,
}

/// Run `chain` (route id and middleware, root to leaf) around `terminal`.
pub async fn run_middleware<T>(
    chain: Vec<(String, BoxedMiddleware)>,
    request: Request,
    params: RouteParams,
    context: RouterContextProvider,
    terminal: T,
) -> Result<DataResults, MiddlewareError>
where
    T: FnOnce(RouterContextProvider) -> BoxFuture<'static, MiddlewareResult> + Send + 'static,
{
    let thrower = Arc::new(Mutex::new(None));
    let next = Next {
        remaining: chain.into(),
        request,
        params,
        terminal: Box::new(terminal),
        thrower: Arc::clone(&thrower),
    };
    next.run(context).await.map_err(|thrown| MiddlewareError {
        route_id: thrower.lock().take(),
        thrown,
    })
}
