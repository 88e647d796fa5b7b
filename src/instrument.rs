//! Handler instrumentation
//!
//! An [`Instrumentation`] wraps loaders and actions with cross-cutting code
//! (timing, tracing spans, logging). The [`InstrumentationRegistry`] keeps,
//! per route handler, the original function and the ordered list of applied
//! instrumentations. Wrappers are always rebuilt from the original, so
//! applying the same instrumentation twice is a no-op and nothing is ever
//! wrapped twice.

use crate::debug_log;
use crate::manifest::DataRoutes;
use crate::route::{DataFunctionArgs, Handler, HandlerKind, HandlerResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Wraps route handlers.
pub trait Instrumentation: Send + Sync + 'static {
    /// Identity used for idempotence; two instrumentations with the same name
    /// are the same instrumentation.
    fn name(&self) -> &str;

    fn wrap(&self, route_id: &str, kind: HandlerKind, handler: Handler) -> Handler;
}

pub type BoxedInstrumentation = Arc<dyn Instrumentation>;

struct Instrumented {
    original: Handler,
    /// The handler last installed on the route
    installed: Handler,
    applied: Vec<BoxedInstrumentation>,
}

/// Side table of instrumented handlers.
#[derive(Default)]
pub struct InstrumentationRegistry {
    entries: HashMap<(String, HandlerKind), Instrumented>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `instrumentation` to every loader and action in `routes`.
    ///
    /// Returns how many handlers were (re)wrapped.
    pub fn instrument(&mut self, routes: &mut DataRoutes, instrumentation: &BoxedInstrumentation) -> usize {
        let mut wrapped = 0;
        for (route_id, route) in routes.manifest_mut().iter_mut() {
            for kind in [HandlerKind::Loader, HandlerKind::Action] {
                let Some(current) = route.handler(kind).cloned() else {
                    continue;
                };
                let key = (route_id.clone(), kind);
                // Replaced from outside since we last wrapped it: start over.
                let replaced = self
                    .entries
                    .get(&key)
                    .is_some_and(|entry| !Arc::ptr_eq(&entry.installed, &current));
                if replaced {
                    self.entries.remove(&key);
                }
                let entry = self.entries.entry(key).or_insert_with(|| Instrumented {
                    original: current.clone(),
                    installed: current.clone(),
                    applied: Vec::new(),
                });
                if entry.applied.iter().any(|i| i.name() == instrumentation.name()) {
                    continue;
                }
                entry.applied.push(Arc::clone(instrumentation));

                let handler = entry
                    .applied
                    .iter()
                    .fold(entry.original.clone(), |handler, i| i.wrap(route_id, kind, handler));
                entry.installed = handler.clone();
                *Arc::make_mut(route).handler_mut(kind) = Some(handler);
                wrapped += 1;
            }
        }
        debug_log!("Instrumentation '{}' wrapped {} handlers", instrumentation.name(), wrapped);
        wrapped
    }

    /// The unwrapped handler of a route.
    pub fn original(&self, route_id: &str, kind: HandlerKind) -> Option<&Handler> {
        self.entries
            .get(&(route_id.to_string(), kind))
            .map(|entry| &entry.original)
    }

    /// Names of the instrumentations applied to a handler, outermost last.
    pub fn applied(&self, route_id: &str, kind: HandlerKind) -> Vec<&str> {
        self.entries
            .get(&(route_id.to_string(), kind))
            .map(|entry| entry.applied.iter().map(|i| i.name()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for InstrumentationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationRegistry")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

/// Logs the start, outcome and duration of every handler call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInstrumentation;

impl Instrumentation for LoggingInstrumentation {
    fn name(&self) -> &str {
        "logging"
    }

    fn wrap(&self, route_id: &str, kind: HandlerKind, handler: Handler) -> Handler {
        let route_id = route_id.to_string();
        Arc::new(move |args: DataFunctionArgs| -> BoxFuture<'static, HandlerResult> {
            let handler = Arc::clone(&handler);
            let route_id = route_id.clone();
            async move {
                let started = Instant::now();
                let url = args.request.url().to_string();
                debug_log!("{} '{}' started for {}", kind, route_id, url);
                let result = handler(args).await;
                debug_log!(
                    "{} '{}' {} in {:?}",
                    kind,
                    route_id,
                    if result.is_ok() { "finished" } else { "threw" },
                    started.elapsed()
                );
                result
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RouterContextProvider;
    use crate::params::RouteParams;
    use crate::request::Request;
    use crate::route::{HandlerOutput, Route};
    use serde_json::{json, Value};

    /// Wraps the loader output in `{"<name>": output}`.
    struct Nesting(&'static str);

    impl Instrumentation for Nesting {
        fn name(&self) -> &str {
            self.0
        }

        fn wrap(&self, _route_id: &str, _kind: HandlerKind, handler: Handler) -> Handler {
            let name = self.0;
            Arc::new(move |args: DataFunctionArgs| -> BoxFuture<'static, HandlerResult> {
                let handler = Arc::clone(&handler);
                async move {
                    match handler(args).await? {
                        HandlerOutput::Data(value) => Ok(HandlerOutput::Data(json!({ name: value }))),
                        other => Ok(other),
                    }
                }
                .boxed()
            })
        }
    }

    fn call_loader(routes: &DataRoutes, id: &str) -> Value {
        let handler = routes.get(id).unwrap().loader.clone().unwrap();
        let args = DataFunctionArgs {
            request: Request::get("http://localhost/").unwrap(),
            params: RouteParams::new(),
            context: RouterContextProvider::new(),
        };
        match pollster::block_on(handler(args)) {
            Ok(HandlerOutput::Data(value)) => value,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn routes() -> DataRoutes {
        DataRoutes::new(vec![Route::new("/")
            .id("root")
            .loader(|_| async { Ok(json!(1)) })])
        .unwrap()
    }

    #[test]
    fn test_reapplying_is_a_noop() {
        let mut routes = routes();
        let mut registry = InstrumentationRegistry::new();
        let outer: BoxedInstrumentation = Arc::new(Nesting("outer"));

        assert_eq!(registry.instrument(&mut routes, &outer), 1);
        assert_eq!(registry.instrument(&mut routes, &outer), 0);
        assert_eq!(call_loader(&routes, "root"), json!({"outer": 1}));
        assert_eq!(registry.applied("root", HandlerKind::Loader), vec!["outer"]);
    }

    #[test]
    fn test_layers_rebuilt_from_original() {
        let mut routes = routes();
        let mut registry = InstrumentationRegistry::new();
        registry.instrument(&mut routes, &(Arc::new(Nesting("a")) as BoxedInstrumentation));
        registry.instrument(&mut routes, &(Arc::new(Nesting("b")) as BoxedInstrumentation));
        registry.instrument(&mut routes, &(Arc::new(Nesting("a")) as BoxedInstrumentation));

        assert_eq!(call_loader(&routes, "root"), json!({"b": {"a": 1}}));
        assert!(registry.original("root", HandlerKind::Loader).is_some());
        assert!(registry.original("root", HandlerKind::Action).is_none());
    }

    #[test]
    fn test_logging_instrumentation_passes_through() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut routes = routes();
        let mut registry = InstrumentationRegistry::new();
        registry.instrument(&mut routes, &(Arc::new(LoggingInstrumentation) as BoxedInstrumentation));
        assert_eq!(call_loader(&routes, "root"), json!(1));
    }
}
