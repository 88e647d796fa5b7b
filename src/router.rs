//! Navigation and fetcher state machine
//!
//! [`Router`] owns the registered routes, the history stack and the current
//! [`RouterState`] snapshot. Navigations and fetchers run their loaders and
//! actions through the configured [`DataStrategy`] and commit the outcome as
//! a new snapshot.
//!
//! Bookkeeping (pending navigation, fetcher controllers, blockers) lives
//! behind one mutex that is never held across an `.await`. Every in-flight
//! navigation and fetcher carries a generation id and a cancellation token:
//! starting a newer one cancels the token, and results are only committed
//! while the generation is still current. Superseded work is dropped
//! silently, errors included.
//!
//! ```no_run
//! use datarouter::{NavigateOptions, Route, Router, RouterOptions};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), datarouter::RouterError> {
//! let router = Router::new(
//!     vec![Route::new("/")
//!         .id("root")
//!         .loader(|_| async { Ok(json!({ "user": "ada" })) })
//!         .child(Route::new("projects/:id").id("project"))],
//!     RouterOptions::new(),
//! )?;
//! router.initialize().await?;
//! router.navigate("/projects/7", NavigateOptions::new()).await?;
//! assert_eq!(router.state().location.pathname, "/projects/7");
//! # Ok(())
//! # }
//! ```

use crate::blocker::{BlockerFunction, BlockerFunctionArgs, BlockerState};
use crate::context::{ContextFactory, RouterContextProvider};
use crate::data::{
    find_nearest_boundary, find_redirect, merge_loader_data, process_loader_data, run_data_strategy,
    DataResult, DataResults, DataStrategy, DataStrategyArgs, DataStrategyMatch, DefaultDataStrategy, Redirect,
};
use crate::error::{ErrorResponse, RouteError, RouterError};
use crate::fetcher::{FetchLoadMatch, FetchOptions, FetcherState};
use crate::history::{History, MemoryHistory};
use crate::instrument::{BoxedInstrumentation, Instrumentation, InstrumentationRegistry};
use crate::location::{create_key, create_path, parse_path, Location, NavigationType, Path};
use crate::manifest::DataRoutes;
use crate::matcher::{
    get_target_match, match_routes, match_routes_partial, short_circuit_matches, strip_basename, RouteMatch,
};
use crate::params::{RouteParams, SearchParams};
use crate::path::{join_paths, resolve_path};
use crate::request::{parse_url, Request, Submission, SubmissionPayload, REDIRECT_PRESERVE_METHOD_STATUSES};
use crate::revalidation::{ActionOutcome, RevalidatingFetcher, RevalidationContext};
use crate::route::{HandlerKind, Route};
use crate::scroll::{RestoreScroll, ScrollRestoration};
use crate::state::{HydrationData, Navigation, RevalidationState, RouterState};
use crate::{debug_log, info_log, trace_log, warn_log};
use arc_swap::ArcSwap;
use futures::future::{join, join_all, BoxFuture};
use futures::FutureExt;
use http::Method;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Bound on discovery rounds for one path.
const MAX_DISCOVERY_ROUNDS: usize = 8;

// ============================================================================
// Options
// ============================================================================

/// What the route-discovery hook is told.
#[derive(Debug, Clone)]
pub struct PatchRoutesArgs {
    /// Path being matched, basename included
    pub path: String,
    /// What matched so far, if anything
    pub matches: Vec<RouteMatch>,
    pub fetcher_key: Option<String>,
}

/// Routes to add under `parent_id`, or at the top level.
#[derive(Debug)]
pub struct RoutePatch {
    pub parent_id: Option<String>,
    pub routes: Vec<Route>,
}

impl RoutePatch {
    pub fn new(parent_id: Option<&str>, routes: Vec<Route>) -> Self {
        Self {
            parent_id: parent_id.map(str::to_string),
            routes,
        }
    }
}

/// Route-discovery hook, called when a path does not fully match.
pub type PatchRoutesOnNavigation =
    Arc<dyn Fn(PatchRoutesArgs) -> BoxFuture<'static, Result<Vec<RoutePatch>, RouterError>> + Send + Sync>;

/// Snapshot listener.
pub type Subscriber = Arc<dyn Fn(&RouterState) + Send + Sync>;

/// Handle returned by [`Router::subscribe`].
pub type SubscriberId = u64;

/// Router configuration
///
/// ```
/// use datarouter::{MemoryHistory, RouterOptions};
///
/// let options = RouterOptions::new()
///     .basename("/app")
///     .origin("https://example.com")
///     .history(MemoryHistory::new("/app/inbox"));
/// assert_eq!(options.basename, "/app");
/// ```
pub struct RouterOptions {
    pub basename: String,
    /// Scheme and host used to build request URLs and to tell internal
    /// redirects from external ones
    pub origin: String,
    pub history: Option<Box<dyn History>>,
    pub hydration_data: Option<HydrationData>,
    pub data_strategy: Option<Arc<dyn DataStrategy>>,
    pub patch_routes_on_navigation: Option<PatchRoutesOnNavigation>,
    pub context: Option<ContextFactory>,
    pub instrumentations: Vec<BoxedInstrumentation>,
    pub scroll_restoration: Option<ScrollRestoration>,
}

impl RouterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn history(mut self, history: impl History) -> Self {
        self.history = Some(Box::new(history));
        self
    }

    pub fn hydration_data(mut self, hydration_data: HydrationData) -> Self {
        self.hydration_data = Some(hydration_data);
        self
    }

    pub fn data_strategy(mut self, strategy: impl DataStrategy) -> Self {
        self.data_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn patch_routes_on_navigation<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PatchRoutesArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<RoutePatch>, RouterError>> + Send + 'static,
    {
        self.patch_routes_on_navigation = Some(Arc::new(move |args| hook(args).boxed()));
        self
    }

    /// Build the request context of every navigation and fetch.
    pub fn context<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> RouterContextProvider + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(factory));
        self
    }

    pub fn instrument(mut self, instrumentation: impl Instrumentation) -> Self {
        self.instrumentations.push(Arc::new(instrumentation));
        self
    }

    pub fn scroll_restoration(mut self, scroll: ScrollRestoration) -> Self {
        self.scroll_restoration = Some(scroll);
        self
    }
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            basename: "/".to_string(),
            origin: "http://localhost".to_string(),
            history: None,
            hydration_data: None,
            data_strategy: None,
            patch_routes_on_navigation: None,
            context: None,
            instrumentations: Vec::new(),
            scroll_restoration: None,
        }
    }
}

impl fmt::Debug for RouterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterOptions")
            .field("basename", &self.basename)
            .field("origin", &self.origin)
            .field("hydration_data", &self.hydration_data.is_some())
            .field("discovery", &self.patch_routes_on_navigation.is_some())
            .field("instrumentations", &self.instrumentations.len())
            .finish()
    }
}

/// Options for [`Router::navigate`]
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    /// `Some(true)` replaces the current entry, `Some(false)` always pushes;
    /// by default navigating to the current URL replaces
    pub replace: Option<bool>,
    pub state: Option<Value>,
    /// Submit to the target URL; GET submissions become its search
    pub submission: Option<Submission>,
    pub prevent_scroll_reset: bool,
    /// Pathname relative paths resolve from; defaults to the current one
    pub relative_to: Option<String>,
}

impl NavigateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = Some(replace);
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn submit(mut self, submission: Submission) -> Self {
        self.submission = Some(submission);
        self
    }

    pub fn prevent_scroll_reset(mut self) -> Self {
        self.prevent_scroll_reset = true;
        self
    }

    pub fn relative_to(mut self, pathname: impl Into<String>) -> Self {
        self.relative_to = Some(pathname.into());
        self
    }
}

/// How a navigation (or the navigation a fetcher triggered) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Committed to state
    Completed,
    /// A newer navigation or fetch took over; nothing was committed
    Superseded,
    /// A blocker parked the navigation
    Blocked,
    /// A redirect left the app: load this URL as a document
    Reload(String),
}

// ============================================================================
// Internal bookkeeping
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StartOptions {
    /// Runs the action first when it is a mutation
    submission: Option<Submission>,
    /// Shown while loaders run, instead of a plain loading navigation
    override_navigation: Option<Navigation>,
    replace: Option<bool>,
    prevent_scroll_reset: bool,
    initial_hydration: bool,
    /// Revalidation of the current entry: leaves history alone
    revalidation: bool,
}

struct PendingNavigation {
    id: u64,
    token: CancellationToken,
    history_action: NavigationType,
    location: Location,
}

struct FetchController {
    generation: u64,
    token: CancellationToken,
}

enum ParkedNavigation {
    Navigate {
        history_action: NavigationType,
        location: Location,
        options: StartOptions,
    },
    Pop {
        delta: isize,
        location: Location,
    },
}

impl ParkedNavigation {
    fn location(&self) -> &Location {
        match self {
            Self::Navigate { location, .. } | Self::Pop { location, .. } => location,
        }
    }
}

struct Control {
    routes: Arc<DataRoutes>,
    history: Box<dyn History>,
    instrumentation: InstrumentationRegistry,
    instrumentations: Vec<BoxedInstrumentation>,
    next_navigation_id: u64,
    pending_navigation: Option<PendingNavigation>,
    next_fetch_generation: u64,
    fetch_controllers: HashMap<String, FetchController>,
    fetch_load_matches: HashMap<String, FetchLoadMatch>,
    fetch_redirect_ids: HashSet<String>,
    deleted_fetchers: HashSet<String>,
    /// Registration order; only the last one is consulted
    blocker_functions: Vec<(String, BlockerFunction)>,
    parked: Option<(String, ParkedNavigation)>,
    is_revalidation_required: bool,
    disposed: bool,
}

impl Control {
    fn is_current_navigation(&self, id: u64) -> bool {
        self.pending_navigation
            .as_ref()
            .is_some_and(|pending| pending.id == id && !pending.token.is_cancelled())
    }

    fn is_current_fetch(&self, key: &str, generation: u64) -> bool {
        !self.deleted_fetchers.contains(key)
            && self
                .fetch_controllers
                .get(key)
                .is_some_and(|c| c.generation == generation && !c.token.is_cancelled())
    }

    /// Cancel whatever `key` had in flight and register a new generation.
    fn start_fetch(&mut self, key: &str, token: CancellationToken) -> u64 {
        if let Some(previous) = self.fetch_controllers.remove(key) {
            trace_log!("Aborting in-flight fetch for fetcher '{}'", key);
            previous.token.cancel();
        }
        self.next_fetch_generation += 1;
        let generation = self.next_fetch_generation;
        self.fetch_controllers
            .insert(key.to_string(), FetchController { generation, token });
        generation
    }

    /// Release the controller of `key` if it still belongs to `generation`.
    fn finish_fetch(&mut self, key: &str, generation: u64) -> bool {
        if self
            .fetch_controllers
            .get(key)
            .is_some_and(|c| c.generation == generation)
        {
            self.fetch_controllers.remove(key);
            return !self.deleted_fetchers.contains(key);
        }
        false
    }
}

/// A revalidating fetcher with its own controller.
struct FetcherReload {
    fetcher: RevalidatingFetcher,
    generation: u64,
    token: CancellationToken,
}

/// Outcome of a single targeted handler call.
enum TargetResult {
    Data { data: Value, status: Option<u16> },
    Error(RouteError),
    Redirect(Redirect),
}

impl From<DataResult> for TargetResult {
    fn from(result: DataResult) -> Self {
        match result {
            DataResult::Data { data, status, .. } => Self::Data { data, status },
            DataResult::Error { error, .. } => Self::Error(error),
            DataResult::Redirect(redirect) => Self::Redirect(redirect),
            // Callers settle before converting
            DataResult::Deferred { deferred, status, .. } => Self::Data {
                data: Value::Object(deferred.immediate().clone()),
                status,
            },
        }
    }
}

/// What a committed navigation writes into state.
#[derive(Default)]
struct NavigationCommit {
    matches: Vec<RouteMatch>,
    /// `None` keeps the previous loader data
    loader_data: Option<HashMap<String, Value>>,
    /// Routes whose previous data is dropped even without fresh data
    cleared: Vec<String>,
    /// Set when this navigation ran an action; `Some(None)` clears action data
    action_data: Option<Option<HashMap<String, Value>>>,
    errors: Option<HashMap<String, RouteError>>,
    fetchers: Vec<(String, u64, Option<FetcherState>)>,
}

enum RedirectTarget {
    Internal(String),
    External(String),
}

struct RedirectOptions {
    submission: Option<Submission>,
    replace: Option<bool>,
    /// Relative redirect locations resolve from here
    from_pathname: String,
    prevent_scroll_reset: bool,
}

// ============================================================================
// Router
// ============================================================================

struct RouterInner {
    state: ArcSwap<RouterState>,
    control: Mutex<Control>,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber_id: AtomicU64,
    basename: String,
    origin: String,
    strategy: Arc<dyn DataStrategy>,
    discover: Option<PatchRoutesOnNavigation>,
    context: Option<ContextFactory>,
    scroll: Option<ScrollRestoration>,
}

/// Client-side data router
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Register `routes` and compute the initial state from the history's
    /// current location and any hydration data.
    pub fn new(routes: Vec<Route>, options: RouterOptions) -> Result<Self, RouterError> {
        let mut routes = DataRoutes::new(routes)?;
        let mut registry = InstrumentationRegistry::new();
        for instrumentation in &options.instrumentations {
            registry.instrument(&mut routes, instrumentation);
        }

        let basename = if options.basename.is_empty() {
            "/".to_string()
        } else {
            options.basename
        };
        let history = options
            .history
            .unwrap_or_else(|| Box::new(MemoryHistory::new(&basename)));
        let location = history.location();
        let hydration = options.hydration_data.unwrap_or_default();

        let mut state = RouterState {
            location: location.clone(),
            history_action: history.action(),
            loader_data: hydration.loader_data,
            action_data: hydration.action_data,
            errors: hydration.errors,
            ..RouterState::default()
        };
        match match_routes(&routes, &location.href(), &basename) {
            Some(matches) => {
                state.initialized = is_hydrated(&matches, &state);
                state.matches = matches;
            }
            None => {
                debug_log!("No routes match initial location '{}'", location.pathname);
                let matches = short_circuit_matches(&routes);
                if let Some(root) = matches.first() {
                    let mut errors = HashMap::new();
                    errors.insert(
                        root.route.id.clone(),
                        RouteError::from(ErrorResponse::not_found(&location.pathname)),
                    );
                    state.errors = Some(errors);
                }
                state.matches = matches;
                // Discovery may still find the route.
                state.initialized = options.patch_routes_on_navigation.is_none();
            }
        }
        info_log!(
            "Router created with {} routes at '{}' (initialized: {})",
            routes.len(),
            location.href(),
            state.initialized
        );

        let control = Control {
            routes: Arc::new(routes),
            history,
            instrumentation: registry,
            instrumentations: options.instrumentations,
            next_navigation_id: 0,
            pending_navigation: None,
            next_fetch_generation: 0,
            fetch_controllers: HashMap::new(),
            fetch_load_matches: HashMap::new(),
            fetch_redirect_ids: HashSet::new(),
            deleted_fetchers: HashSet::new(),
            blocker_functions: Vec::new(),
            parked: None,
            is_revalidation_required: false,
            disposed: false,
        };

        Ok(Self {
            inner: Arc::new(RouterInner {
                state: ArcSwap::from_pointee(state),
                control: Mutex::new(control),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                basename,
                origin: options.origin.trim_end_matches('/').to_string(),
                strategy: options
                    .data_strategy
                    .unwrap_or_else(|| Arc::new(DefaultDataStrategy)),
                discover: options.patch_routes_on_navigation,
                context: options.context,
                scroll: options.scroll_restoration,
            }),
        })
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<RouterState> {
        self.inner.state.load_full()
    }

    pub fn routes(&self) -> Arc<DataRoutes> {
        Arc::clone(&self.control().routes)
    }

    pub fn basename(&self) -> &str {
        &self.inner.basename
    }

    /// Href for `to` as a link would show it, basename included.
    pub fn create_href(&self, to: &str) -> String {
        let path = self.resolve_to(to, &self.state().location.pathname);
        self.control().history.create_href(&path)
    }

    /// Run loaders that hydration data did not cover.
    pub async fn initialize(&self) -> Result<NavigationOutcome, RouterError> {
        let state = self.state();
        if state.initialized {
            return Ok(NavigationOutcome::Completed);
        }
        debug_log!("Initializing router at '{}'", state.location.href());
        self.start_navigation(
            NavigationType::Pop,
            state.location.clone(),
            StartOptions {
                initial_hydration: true,
                ..StartOptions::default()
            },
        )
        .await
    }

    /// Navigate to `to`, running its action (for mutation submissions) and loaders.
    pub async fn navigate(&self, to: &str, options: NavigateOptions) -> Result<NavigationOutcome, RouterError> {
        self.ensure_alive()?;
        let state = self.state();
        let from = options
            .relative_to
            .clone()
            .unwrap_or_else(|| state.location.pathname.clone());
        let mut path = self.resolve_to(to, &from);
        if let Some(submission) = options.submission.as_ref() {
            if !submission.form_method.is_mutation() {
                apply_get_submission(&mut path, submission);
            }
        }
        let location = Location::from_path(path, options.state.clone(), create_key());
        let is_mutation = options
            .submission
            .as_ref()
            .is_some_and(|s| s.form_method.is_mutation());
        let same_url = location.pathname == state.location.pathname && location.search == state.location.search;
        let history_action = match options.replace {
            Some(true) => NavigationType::Replace,
            Some(false) => NavigationType::Push,
            None if is_mutation && same_url => NavigationType::Replace,
            None if !is_mutation && location.href() == state.location.href() => NavigationType::Replace,
            None => NavigationType::Push,
        };

        let start = StartOptions {
            submission: options.submission,
            replace: options.replace,
            prevent_scroll_reset: options.prevent_scroll_reset,
            ..StartOptions::default()
        };
        if let Some(key) = self.blocking_key(&state, &location, history_action) {
            self.park(
                key,
                ParkedNavigation::Navigate {
                    history_action,
                    location,
                    options: start,
                },
            );
            return Ok(NavigationOutcome::Blocked);
        }
        self.start_navigation(history_action, location, start).await
    }

    /// Move `delta` entries through history (a POP navigation).
    ///
    /// Out-of-range deltas do nothing.
    pub async fn go(&self, delta: isize) -> Result<NavigationOutcome, RouterError> {
        self.ensure_alive()?;
        let state = self.state();
        let next = self.control().history.peek(delta);
        let Some(next) = next else {
            debug_log!("History delta {} is out of range", delta);
            return Ok(NavigationOutcome::Completed);
        };
        if let Some(key) = self.blocking_key(&state, &next, NavigationType::Pop) {
            self.park(key, ParkedNavigation::Pop { delta, location: next });
            return Ok(NavigationOutcome::Blocked);
        }
        self.pop(delta).await
    }

    pub async fn back(&self) -> Result<NavigationOutcome, RouterError> {
        self.go(-1).await
    }

    pub async fn forward(&self) -> Result<NavigationOutcome, RouterError> {
        self.go(1).await
    }

    /// Re-run the loaders of the current location (or of the in-flight
    /// navigation's target). Submissions revalidate on their own.
    pub async fn revalidate(&self) -> Result<NavigationOutcome, RouterError> {
        let state = self.state();
        let target = {
            let mut control = self.control();
            if control.disposed {
                return Err(RouterError::Disposed);
            }
            control.is_revalidation_required = true;
            match (&state.navigation, control.pending_navigation.as_ref()) {
                (Navigation::Submitting { .. }, _) => None,
                (Navigation::Loading { .. }, Some(pending)) => Some((
                    pending.history_action,
                    pending.location.clone(),
                    Some(state.navigation.clone()),
                )),
                _ => Some((state.history_action, state.location.clone(), None)),
            }
        };
        self.update(|_, state| {
            state.revalidation = RevalidationState::Loading;
            Some(())
        });
        let Some((history_action, location, override_navigation)) = target else {
            return Ok(NavigationOutcome::Completed);
        };
        debug_log!("Revalidating '{}'", location.href());
        let revalidation = override_navigation.is_none();
        self.start_navigation(
            history_action,
            location,
            StartOptions {
                override_navigation,
                revalidation,
                ..StartOptions::default()
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Fetchers
    // ------------------------------------------------------------------------

    /// Load (or submit to) `href` on behalf of fetcher `key`, independently
    /// of the current navigation. A newer call with the same key supersedes
    /// this one.
    pub async fn fetch(
        &self,
        key: &str,
        route_id: &str,
        href: &str,
        options: FetchOptions,
    ) -> Result<NavigationOutcome, RouterError> {
        let state = self.state();
        let mut path = self.resolve_to(href, &state.location.pathname);
        let submission = options.submission;
        if let Some(submission) = submission.as_ref() {
            if !submission.form_method.is_mutation() {
                apply_get_submission(&mut path, submission);
            }
        }
        let href = create_path(&path);
        let token = CancellationToken::new();
        let generation = {
            let mut control = self.control();
            if control.disposed {
                return Err(RouterError::Disposed);
            }
            control.deleted_fetchers.remove(key);
            control.start_fetch(key, token.clone())
        };
        debug_log!("Fetcher '{}' fetching '{}' (generation {})", key, href, generation);

        let routes = self.routes();
        let matches = match match_routes(&routes, &href, &self.inner.basename) {
            Some(matches) => matches,
            None => match self.discover_routes(&href, Some(key)).await? {
                Some(matches) => matches,
                None => {
                    self.set_fetcher_error(key, generation, route_id, ErrorResponse::not_found(&path.pathname).into());
                    return Ok(NavigationOutcome::Completed);
                }
            },
        };

        match submission {
            Some(submission) if submission.form_method.is_mutation() => {
                self.fetcher_action(key, generation, token, route_id, href, matches, submission)
                    .await
            }
            submission => {
                self.fetcher_loader(key, generation, token, route_id, href, matches, submission)
                    .await
            }
        }
    }

    /// Current state of fetcher `key` (idle when unknown).
    pub fn get_fetcher(&self, key: &str) -> FetcherState {
        self.state().fetcher(key)
    }

    /// Forget fetcher `key`, cancelling whatever it has in flight.
    pub fn delete_fetcher(&self, key: &str) {
        debug_log!("Deleting fetcher '{}'", key);
        self.update(|control, state| {
            if let Some(controller) = control.fetch_controllers.remove(key) {
                controller.token.cancel();
            }
            control.fetch_load_matches.remove(key);
            control.fetch_redirect_ids.remove(key);
            control.deleted_fetchers.insert(key.to_string());
            state.fetchers.remove(key);
            Some(())
        });
    }

    // ------------------------------------------------------------------------
    // Blockers
    // ------------------------------------------------------------------------

    /// Register (or update) blocker `key` and return its state.
    pub fn get_blocker(&self, key: &str, predicate: BlockerFunction) -> BlockerState {
        self.update(|control, state| {
            match control.blocker_functions.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = predicate,
                None => control.blocker_functions.push((key.to_string(), predicate)),
            }
            Some(state.blockers.entry(key.to_string()).or_default().clone())
        })
        .unwrap_or_default()
    }

    /// Let the navigation parked by `key` through.
    pub async fn proceed_blocker(&self, key: &str) -> Result<NavigationOutcome, RouterError> {
        let parked = self.update(|control, state| {
            let (parked_key, parked) = control.parked.take()?;
            if parked_key != key {
                control.parked = Some((parked_key, parked));
                return None;
            }
            state.blockers.insert(
                key.to_string(),
                BlockerState::Proceeding {
                    location: parked.location().clone(),
                },
            );
            Some(parked)
        });
        match parked {
            None => {
                debug_log!("Blocker '{}' has no parked navigation", key);
                Ok(NavigationOutcome::Completed)
            }
            Some(ParkedNavigation::Navigate {
                history_action,
                location,
                options,
            }) => self.start_navigation(history_action, location, options).await,
            Some(ParkedNavigation::Pop { delta, .. }) => self.pop(delta).await,
        }
    }

    /// Drop the navigation parked by `key` and unblock it.
    pub fn reset_blocker(&self, key: &str) {
        self.update(|control, state| {
            if control.parked.as_ref().is_some_and(|(k, _)| k == key) {
                control.parked = None;
            }
            state.blockers.insert(key.to_string(), BlockerState::Unblocked);
            Some(())
        });
    }

    pub fn delete_blocker(&self, key: &str) {
        self.update(|control, state| {
            control.blocker_functions.retain(|(k, _)| k != key);
            if control.parked.as_ref().is_some_and(|(k, _)| k == key) {
                control.parked = None;
            }
            state.blockers.remove(key);
            Some(())
        });
    }

    // ------------------------------------------------------------------------
    // Routes, subscribers, lifecycle
    // ------------------------------------------------------------------------

    /// Add `children` under `parent_id` (or at the top level). Registered
    /// instrumentations are applied to the new handlers.
    pub fn patch_routes(&self, parent_id: Option<&str>, children: Vec<Route>) -> Result<bool, RouterError> {
        let mut guard = self.control();
        let control = &mut *guard;
        let mut routes = DataRoutes::clone(&control.routes);
        if !routes.patch_routes(parent_id, children)? {
            return Ok(false);
        }
        for instrumentation in &control.instrumentations {
            control.instrumentation.instrument(&mut routes, instrumentation);
        }
        debug_log!("Patched routes under {:?}; {} routes registered", parent_id, routes.len());
        control.routes = Arc::new(routes);
        Ok(true)
    }

    /// Call `listener` with every new snapshot.
    pub fn subscribe<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&RouterState) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Record the scroll position of the current location now, for example
    /// before the embedding layer unloads.
    pub fn save_scroll_position(&self) {
        if let Some(scroll) = &self.inner.scroll {
            let state = self.state();
            scroll.save(&state.location, &state.matches);
        }
    }

    /// Cancel everything in flight and stop accepting navigations.
    pub fn dispose(&self) {
        {
            let mut control = self.control();
            if control.disposed {
                return;
            }
            control.disposed = true;
            if let Some(pending) = control.pending_navigation.take() {
                pending.token.cancel();
            }
            for (_, controller) in control.fetch_controllers.drain() {
                controller.token.cancel();
            }
            control.blocker_functions.clear();
            control.parked = None;
        }
        self.inner.subscribers.lock().clear();
        info_log!("Router disposed");
    }

    // ========================================================================
    // Navigation pipeline
    // ========================================================================

    fn start_navigation(
        &self,
        history_action: NavigationType,
        location: Location,
        options: StartOptions,
    ) -> BoxFuture<'static, Result<NavigationOutcome, RouterError>> {
        let router = self.clone();
        async move { router.run_navigation(history_action, location, options).await }.boxed()
    }

    async fn run_navigation(
        &self,
        history_action: NavigationType,
        location: Location,
        options: StartOptions,
    ) -> Result<NavigationOutcome, RouterError> {
        let token = CancellationToken::new();
        let is_mutation = options
            .submission
            .as_ref()
            .is_some_and(|s| s.form_method.is_mutation());
        let (id, is_revalidation_required) = {
            let mut control = self.control();
            if control.disposed {
                return Err(RouterError::Disposed);
            }
            // Stays set until a navigation commits, so redirects out of the
            // action revalidate too.
            if is_mutation {
                control.is_revalidation_required = true;
            }
            if let Some(previous) = control.pending_navigation.take() {
                debug_log!("Aborting navigation to '{}'", previous.location.href());
                previous.token.cancel();
            }
            control.next_navigation_id += 1;
            let id = control.next_navigation_id;
            control.pending_navigation = Some(PendingNavigation {
                id,
                token: token.clone(),
                history_action,
                location: location.clone(),
            });
            (id, control.is_revalidation_required)
        };
        debug_log!("Navigation {} ({:?}) to '{}'", id, history_action, location.href());

        let state = self.state();

        if state.initialized
            && !is_revalidation_required
            && !is_mutation
            && state.location.is_hash_change_only(&location)
        {
            trace_log!("Hash-only change to '{}'", location.hash);
            let commit = NavigationCommit {
                matches: state.matches.clone(),
                ..NavigationCommit::default()
            };
            return Ok(self.complete_navigation(id, history_action, location, commit, &options));
        }

        let href = location.href();
        let routes = self.routes();
        let matches = match match_routes(&routes, &href, &self.inner.basename) {
            Some(matches) => Some(matches),
            None => self.discover_routes(&href, None).await?,
        };
        let Some(matches) = matches else {
            debug_log!("No routes match '{}'", location.pathname);
            let routes = self.routes();
            let matches = short_circuit_matches(&routes);
            let mut errors = HashMap::new();
            if let Some(root) = matches.first() {
                errors.insert(
                    root.route.id.clone(),
                    RouteError::from(ErrorResponse::not_found(&location.pathname)),
                );
            }
            let commit = NavigationCommit {
                matches,
                loader_data: Some(HashMap::new()),
                errors: Some(errors),
                ..NavigationCommit::default()
            };
            return Ok(self.complete_navigation(id, history_action, location, commit, &options));
        };

        let context = self.new_context();
        let current_url = self.create_url(&state.location.href())?;
        let next_url = self.create_url(&href)?;

        // Action
        let mut history_action = history_action;
        let mut pending_action_error = None;
        let mut action_outcome = None;
        let mut action_data = None;
        if let Some(submission) = options.submission.as_ref().filter(|s| s.form_method.is_mutation()) {
            let submitting = self.update(|control, state| {
                if !control.is_current_navigation(id) {
                    return None;
                }
                state.navigation = Navigation::Submitting {
                    location: location.clone(),
                    submission: submission.clone(),
                };
                Some(())
            });
            if submitting.is_none() {
                return Ok(NavigationOutcome::Superseded);
            }

            let request = Request::from_submission(next_url.clone(), submission).with_signal(token.clone());
            let (target_id, result) = self
                .call_target(&matches, request, HandlerKind::Action, None, &location.search, context.clone())
                .await;
            if !self.is_current_navigation(id) {
                return Ok(NavigationOutcome::Superseded);
            }
            match result {
                TargetResult::Redirect(redirect) => {
                    debug_log!("Action of '{}' redirected to '{}'", target_id, redirect.location);
                    return self
                        .start_redirect_navigation(
                            redirect,
                            RedirectOptions {
                                submission: Some(submission.clone()),
                                replace: options.replace,
                                from_pathname: location.pathname.clone(),
                                prevent_scroll_reset: options.prevent_scroll_reset,
                            },
                        )
                        .await;
                }
                TargetResult::Error(error) => {
                    let boundary_id = find_nearest_boundary(&matches, Some(&target_id))
                        .map_or_else(|| target_id.clone(), |m| m.route.id.clone());
                    debug_log!("Action of '{}' failed; rendering at '{}'", target_id, boundary_id);
                    if options.replace != Some(true) {
                        history_action = NavigationType::Push;
                    }
                    action_outcome = Some(ActionOutcome::Error {
                        boundary_id: boundary_id.clone(),
                    });
                    action_data = Some(None);
                    pending_action_error = Some((boundary_id, error));
                }
                TargetResult::Data { data, status } => {
                    action_outcome = Some(ActionOutcome::Data {
                        data: data.clone(),
                        status,
                    });
                    let mut data_map = HashMap::new();
                    data_map.insert(target_id, data);
                    action_data = Some(Some(data_map));
                }
            }
        }

        // Loaders and revalidating fetchers
        let state = self.state();
        let (matches_to_load, revalidating) = {
            let mut control = self.control();
            let skip: HashSet<String> = control
                .deleted_fetchers
                .union(&control.fetch_redirect_ids)
                .cloned()
                .collect();
            let revalidation = RevalidationContext {
                current_matches: &state.matches,
                loader_data: &state.loader_data,
                errors: state.errors.as_ref(),
                current_url: &current_url,
                next_url: &next_url,
                submission: options.submission.as_ref(),
                action: action_outcome.as_ref(),
                is_revalidation_required,
                initial_hydration: options.initial_hydration,
            };
            let to_load = revalidation.matches_to_load(&matches);
            let fetchers = revalidation.fetchers_to_revalidate(
                &control.routes,
                &self.inner.basename,
                &matches,
                &control.fetch_load_matches,
                &state.fetchers,
                &skip,
            );
            control.fetch_redirect_ids.clear();
            (to_load, fetchers)
        };

        if !matches_to_load.iter().any(|m| m.should_load) && revalidating.is_empty() {
            trace_log!("Navigation {} has no loaders to run", id);
            let processed = process_loader_data(&matches, DataResults::new(), pending_action_error, false);
            let commit = NavigationCommit {
                matches,
                loader_data: Some(processed.loader_data),
                cleared: processed.cleared,
                action_data,
                errors: processed.errors,
                fetchers: Vec::new(),
            };
            return Ok(self.complete_navigation(id, history_action, location, commit, &options));
        }

        let show_loading = !options.initial_hydration && !(options.revalidation && options.override_navigation.is_none());
        let loading = options.override_navigation.clone().unwrap_or_else(|| Navigation::Loading {
            location: location.clone(),
            submission: options.submission.clone(),
        });
        let reloads = self.update(|control, state| {
            if !control.is_current_navigation(id) {
                return None;
            }
            if show_loading {
                state.navigation = loading;
            }
            Some(start_fetcher_reloads(control, state, revalidating, &token))
        });
        let Some(reloads) = reloads else {
            return Ok(NavigationOutcome::Superseded);
        };

        let loader_args = DataStrategyArgs {
            request: Request::new(Method::GET, next_url).with_signal(token.clone()),
            params: leaf_params(&matches),
            matches: matches_to_load,
            context: context.clone(),
            kind: HandlerKind::Loader,
            fetcher_key: None,
        };
        let (results, fetcher_results) = join(
            self.run_loaders(loader_args),
            self.run_fetcher_reloads(&reloads, &context),
        )
        .await;
        if !self.is_current_navigation(id) {
            return Ok(NavigationOutcome::Superseded);
        }

        if let Some(redirect) = find_redirect(&matches, &results) {
            debug_log!("Loader redirected navigation {} to '{}'", id, redirect.location);
            return self
                .start_redirect_navigation(
                    redirect,
                    RedirectOptions {
                        submission: None,
                        replace: options.replace,
                        from_pathname: location.pathname.clone(),
                        prevent_scroll_reset: options.prevent_scroll_reset,
                    },
                )
                .await;
        }
        if let Some((key, redirect)) = fetcher_redirect(&reloads, &fetcher_results) {
            self.control().fetch_redirect_ids.insert(key);
            return self
                .start_redirect_navigation(
                    redirect,
                    RedirectOptions {
                        submission: None,
                        replace: None,
                        from_pathname: location.pathname.clone(),
                        prevent_scroll_reset: options.prevent_scroll_reset,
                    },
                )
                .await;
        }

        let mut processed = process_loader_data(&matches, results, pending_action_error, false);
        let fetchers = fold_fetcher_results(&matches, reloads, fetcher_results, &mut processed.errors);
        let commit = NavigationCommit {
            matches,
            loader_data: Some(processed.loader_data),
            cleared: processed.cleared,
            action_data,
            errors: processed.errors,
            fetchers,
        };
        Ok(self.complete_navigation(id, history_action, location, commit, &options))
    }

    /// Commit a navigation if it is still the current one.
    fn complete_navigation(
        &self,
        id: u64,
        history_action: NavigationType,
        location: Location,
        commit: NavigationCommit,
        options: &StartOptions,
    ) -> NavigationOutcome {
        let scroll = self.inner.scroll.clone();
        let committed = self.update(|control, state| {
            if !control.is_current_navigation(id) {
                return None;
            }
            let is_action_reload = matches!(
                &state.navigation,
                Navigation::Loading { submission: Some(s), .. } if s.form_method.is_mutation()
            );
            let submitted = is_action_reload
                || commit.action_data.is_some()
                || options.submission.as_ref().is_some_and(|s| s.form_method.is_mutation());

            state.action_data = match commit.action_data {
                Some(action_data) => action_data,
                None if is_action_reload => state.action_data.take(),
                None => None,
            };
            if let Some(fresh) = commit.loader_data.as_ref() {
                state.loader_data = merge_loader_data(
                    &state.loader_data,
                    fresh,
                    &commit.cleared,
                    &commit.matches,
                    commit.errors.as_ref(),
                );
            }

            if !options.revalidation && !options.initial_hydration {
                match history_action {
                    NavigationType::Push => control.history.push(location.clone()),
                    NavigationType::Replace => control.history.replace(location.clone()),
                    NavigationType::Pop => {}
                }
            }

            state.restore_scroll_position = if submitted || options.revalidation {
                RestoreScroll::Skip
            } else {
                let saved = scroll.as_ref().and_then(|scroll| {
                    scroll.save(&state.location, &state.matches);
                    (history_action == NavigationType::Pop)
                        .then(|| scroll.saved(&location, &commit.matches))
                        .flatten()
                });
                saved.map_or(RestoreScroll::Reset, RestoreScroll::Position)
            };
            state.prevent_scroll_reset = options.prevent_scroll_reset;

            for (key, generation, fetcher) in commit.fetchers {
                if !control.finish_fetch(&key, generation) {
                    continue;
                }
                match fetcher {
                    Some(fetcher) => {
                        state.fetchers.insert(key, fetcher);
                    }
                    None => {
                        control.fetch_load_matches.remove(&key);
                        state.fetchers.remove(&key);
                    }
                }
            }
            for blocker in state.blockers.values_mut() {
                *blocker = BlockerState::Unblocked;
            }
            control.parked = None;

            state.location = location;
            state.history_action = history_action;
            state.navigation = Navigation::Idle;
            state.matches = commit.matches;
            state.errors = commit.errors;
            state.revalidation = RevalidationState::Idle;
            state.initialized = true;

            control.pending_navigation = None;
            control.is_revalidation_required = false;
            Some(())
        });

        match committed {
            Some(()) => {
                debug_log!("Navigation {} committed", id);
                NavigationOutcome::Completed
            }
            None => {
                debug_log!("Navigation {} was superseded before commit", id);
                NavigationOutcome::Superseded
            }
        }
    }

    fn start_redirect_navigation(
        &self,
        redirect: Redirect,
        options: RedirectOptions,
    ) -> BoxFuture<'static, Result<NavigationOutcome, RouterError>> {
        let router = self.clone();
        async move {
            if redirect.revalidate {
                router.control().is_revalidation_required = true;
            }
            let target = router.normalize_redirect(&redirect.location, &options.from_pathname)?;
            let href = match target {
                RedirectTarget::External(url) => {
                    info_log!("Redirect to external URL '{}'", url);
                    router.abandon_navigation();
                    return Ok(NavigationOutcome::Reload(url));
                }
                RedirectTarget::Internal(href) if redirect.reload_document => {
                    router.abandon_navigation();
                    return Ok(NavigationOutcome::Reload(format!("{}{}", router.inner.origin, href)));
                }
                RedirectTarget::Internal(href) => href,
            };

            let location = Location::from_path(parse_path(&href), None, create_key());
            let history_action = if options.replace == Some(true) || redirect.replace {
                NavigationType::Replace
            } else {
                NavigationType::Push
            };
            let base = StartOptions {
                prevent_scroll_reset: options.prevent_scroll_reset,
                replace: options.replace,
                ..StartOptions::default()
            };
            let start = match options.submission.filter(|s| s.form_method.is_mutation()) {
                Some(mut submission) if REDIRECT_PRESERVE_METHOD_STATUSES.contains(&redirect.status) => {
                    trace_log!("Re-submitting to '{}' after {}", href, redirect.status);
                    submission.form_action = href.clone();
                    StartOptions {
                        submission: Some(submission),
                        ..base
                    }
                }
                Some(submission) => StartOptions {
                    override_navigation: Some(Navigation::Loading {
                        location: location.clone(),
                        submission: Some(submission),
                    }),
                    ..base
                },
                None => base,
            };
            router.start_navigation(history_action, location, start).await
        }
        .boxed()
    }

    fn normalize_redirect(&self, location: &str, from_pathname: &str) -> Result<RedirectTarget, RouterError> {
        let origin = parse_url(&self.inner.origin)?;
        let absolute = if location.starts_with("//") {
            Url::parse(&format!("{}:{}", origin.scheme(), location)).ok()
        } else {
            Url::parse(location).ok()
        };
        if let Some(url) = absolute {
            if url.origin() == origin.origin() && strip_basename(url.path(), &self.inner.basename).is_some() {
                let mut href = url.path().to_string();
                if let Some(query) = url.query() {
                    href.push('?');
                    href.push_str(query);
                }
                if let Some(fragment) = url.fragment() {
                    href.push('#');
                    href.push_str(fragment);
                }
                return Ok(RedirectTarget::Internal(href));
            }
            return Ok(RedirectTarget::External(location.to_string()));
        }
        Ok(RedirectTarget::Internal(create_path(&self.resolve_to(location, from_pathname))))
    }

    /// Leave the in-flight navigation without committing anything.
    fn abandon_navigation(&self) {
        self.update(|control, state| {
            control.pending_navigation = None;
            state.navigation = Navigation::Idle;
            state.revalidation = RevalidationState::Idle;
            Some(())
        });
    }

    async fn pop(&self, delta: isize) -> Result<NavigationOutcome, RouterError> {
        let location = self.control().history.go(delta);
        match location {
            Some(location) => {
                self.start_navigation(NavigationType::Pop, location, StartOptions::default())
                    .await
            }
            None => Ok(NavigationOutcome::Completed),
        }
    }

    // ========================================================================
    // Fetcher pipeline
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn fetcher_loader(
        &self,
        key: &str,
        generation: u64,
        token: CancellationToken,
        route_id: &str,
        href: String,
        matches: Vec<RouteMatch>,
        submission: Option<Submission>,
    ) -> Result<NavigationOutcome, RouterError> {
        let started = self.update(|control, state| {
            if !control.is_current_fetch(key, generation) {
                return None;
            }
            control.fetch_load_matches.insert(
                key.to_string(),
                FetchLoadMatch {
                    route_id: route_id.to_string(),
                    path: href.clone(),
                },
            );
            let data = state.fetchers.get(key).and_then(|f| f.data.clone());
            state
                .fetchers
                .insert(key.to_string(), FetcherState::loading(submission.clone(), data));
            Some(())
        });
        if started.is_none() {
            return Ok(NavigationOutcome::Superseded);
        }

        let request = Request::new(Method::GET, self.create_url(&href)?).with_signal(token);
        let search = parse_path(&href).search;
        let (_, result) = self
            .call_target(
                &matches,
                request,
                HandlerKind::Loader,
                Some(key),
                &search,
                self.new_context(),
            )
            .await;
        if !self.is_current_fetch(key, generation) {
            trace_log!("Dropping stale result of fetcher '{}'", key);
            return Ok(NavigationOutcome::Superseded);
        }

        match result {
            TargetResult::Redirect(redirect) => {
                debug_log!("Fetcher '{}' redirected to '{}'", key, redirect.location);
                self.update(|control, state| {
                    control.finish_fetch(key, generation);
                    control.fetch_redirect_ids.insert(key.to_string());
                    let data = state.fetchers.get(key).and_then(|f| f.data.clone());
                    state.fetchers.insert(key.to_string(), FetcherState::idle(data));
                    Some(())
                });
                self.start_redirect_navigation(
                    redirect,
                    RedirectOptions {
                        submission: None,
                        replace: None,
                        from_pathname: parse_path(&href).pathname,
                        prevent_scroll_reset: false,
                    },
                )
                .await
            }
            TargetResult::Error(error) => {
                self.set_fetcher_error(key, generation, route_id, error);
                Ok(NavigationOutcome::Completed)
            }
            TargetResult::Data { data, .. } => {
                self.update(|control, state| {
                    if !control.finish_fetch(key, generation) {
                        return None;
                    }
                    state.fetchers.insert(key.to_string(), FetcherState::idle(Some(data)));
                    Some(())
                });
                Ok(NavigationOutcome::Completed)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetcher_action(
        &self,
        key: &str,
        generation: u64,
        token: CancellationToken,
        route_id: &str,
        href: String,
        matches: Vec<RouteMatch>,
        submission: Submission,
    ) -> Result<NavigationOutcome, RouterError> {
        let started = self.update(|control, state| {
            if !control.is_current_fetch(key, generation) {
                return None;
            }
            control.is_revalidation_required = true;
            let data = state.fetchers.get(key).and_then(|f| f.data.clone());
            state
                .fetchers
                .insert(key.to_string(), FetcherState::submitting(submission.clone(), data));
            Some(())
        });
        if started.is_none() {
            return Ok(NavigationOutcome::Superseded);
        }

        let context = self.new_context();
        let request = Request::from_submission(self.create_url(&href)?, &submission).with_signal(token.clone());
        let search = parse_path(&href).search;
        let (_, result) = self
            .call_target(&matches, request, HandlerKind::Action, Some(key), &search, context.clone())
            .await;
        if !self.is_current_fetch(key, generation) {
            trace_log!("Dropping stale action result of fetcher '{}'", key);
            return Ok(NavigationOutcome::Superseded);
        }

        let (action_data, action_status) = match result {
            TargetResult::Redirect(redirect) => {
                debug_log!("Fetcher '{}' action redirected to '{}'", key, redirect.location);
                self.update(|control, state| {
                    control.finish_fetch(key, generation);
                    control.fetch_redirect_ids.insert(key.to_string());
                    let data = state.fetchers.get(key).and_then(|f| f.data.clone());
                    state.fetchers.insert(key.to_string(), FetcherState::idle(data));
                    Some(())
                });
                return self
                    .start_redirect_navigation(
                        redirect,
                        RedirectOptions {
                            submission: Some(submission),
                            replace: None,
                            from_pathname: parse_path(&href).pathname,
                            prevent_scroll_reset: false,
                        },
                    )
                    .await;
            }
            TargetResult::Error(error) => {
                self.set_fetcher_error(key, generation, route_id, error);
                return Ok(NavigationOutcome::Completed);
            }
            TargetResult::Data { data, status } => (data, status),
        };

        // Revalidate the page, against the in-flight navigation if there is one.
        let state = self.state();
        let routes = self.routes();
        let next_location = state
            .navigation
            .location()
            .cloned()
            .unwrap_or_else(|| state.location.clone());
        let matches = if state.navigation.is_idle() {
            state.matches.clone()
        } else {
            match_routes(&routes, &next_location.href(), &self.inner.basename).unwrap_or_else(|| state.matches.clone())
        };
        let current_url = self.create_url(&state.location.href())?;
        let next_url = self.create_url(&next_location.href())?;
        let outcome = ActionOutcome::Data {
            data: action_data.clone(),
            status: action_status,
        };

        let (matches_to_load, revalidating, navigation_id) = {
            let mut control = self.control();
            let mut skip: HashSet<String> = control
                .deleted_fetchers
                .union(&control.fetch_redirect_ids)
                .cloned()
                .collect();
            skip.insert(key.to_string());
            let revalidation = RevalidationContext {
                current_matches: &state.matches,
                loader_data: &state.loader_data,
                errors: state.errors.as_ref(),
                current_url: &current_url,
                next_url: &next_url,
                submission: Some(&submission),
                action: Some(&outcome),
                is_revalidation_required: true,
                initial_hydration: false,
            };
            let to_load = revalidation.matches_to_load(&matches);
            let fetchers = revalidation.fetchers_to_revalidate(
                &control.routes,
                &self.inner.basename,
                &matches,
                &control.fetch_load_matches,
                &state.fetchers,
                &skip,
            );
            control.fetch_redirect_ids.clear();
            (to_load, fetchers, control.next_navigation_id)
        };

        let reloads = self.update(|control, state| {
            if !control.is_current_fetch(key, generation) {
                return None;
            }
            state.fetchers.insert(
                key.to_string(),
                FetcherState::loading(Some(submission.clone()), Some(action_data.clone())),
            );
            Some(start_fetcher_reloads(control, state, revalidating, &token))
        });
        let Some(reloads) = reloads else {
            return Ok(NavigationOutcome::Superseded);
        };

        let loader_args = DataStrategyArgs {
            request: Request::new(Method::GET, next_url).with_signal(token.clone()),
            params: leaf_params(&matches),
            matches: matches_to_load,
            context: context.clone(),
            kind: HandlerKind::Loader,
            fetcher_key: None,
        };
        let (results, fetcher_results) = join(
            self.run_loaders(loader_args),
            self.run_fetcher_reloads(&reloads, &context),
        )
        .await;
        if !self.is_current_fetch(key, generation) {
            return Ok(NavigationOutcome::Superseded);
        }

        let redirect = find_redirect(&matches, &results).or_else(|| {
            fetcher_redirect(&reloads, &fetcher_results).map(|(reload_key, redirect)| {
                self.control().fetch_redirect_ids.insert(reload_key);
                redirect
            })
        });
        if let Some(redirect) = redirect {
            self.update(|control, state| {
                control.finish_fetch(key, generation);
                state.fetchers.insert(key.to_string(), FetcherState::idle(Some(action_data.clone())));
                Some(())
            });
            return self
                .start_redirect_navigation(
                    redirect,
                    RedirectOptions {
                        submission: None,
                        replace: None,
                        from_pathname: next_location.pathname.clone(),
                        prevent_scroll_reset: false,
                    },
                )
                .await;
        }

        let mut processed = process_loader_data(&matches, results, None, false);
        let fetchers = fold_fetcher_results(&matches, reloads, fetcher_results, &mut processed.errors);
        self.update(|control, state| {
            if !control.finish_fetch(key, generation) {
                return None;
            }
            state
                .fetchers
                .insert(key.to_string(), FetcherState::idle(Some(action_data)));
            for (reload_key, reload_generation, fetcher) in fetchers {
                if !control.finish_fetch(&reload_key, reload_generation) {
                    continue;
                }
                match fetcher {
                    Some(fetcher) => {
                        state.fetchers.insert(reload_key, fetcher);
                    }
                    None => {
                        control.fetch_load_matches.remove(&reload_key);
                        state.fetchers.remove(&reload_key);
                    }
                }
            }
            // A navigation that started meanwhile owns loader data now.
            if control.next_navigation_id == navigation_id && state.navigation.is_idle() {
                state.loader_data = merge_loader_data(
                    &state.loader_data,
                    &processed.loader_data,
                    &processed.cleared,
                    &matches,
                    processed.errors.as_ref(),
                );
                state.errors = processed.errors;
                control.is_revalidation_required = false;
            }
            Some(())
        });
        debug_log!("Fetcher '{}' submission complete", key);
        Ok(NavigationOutcome::Completed)
    }

    /// Put a fetcher failure on the nearest boundary of the current page and
    /// drop the fetcher.
    fn set_fetcher_error(&self, key: &str, generation: u64, route_id: &str, error: RouteError) {
        self.update(|control, state| {
            if !control.is_current_fetch(key, generation) {
                return None;
            }
            control.fetch_controllers.remove(key);
            control.fetch_load_matches.remove(key);
            let boundary_id = find_nearest_boundary(&state.matches, Some(route_id))
                .map_or_else(|| route_id.to_string(), |m| m.route.id.clone());
            debug_log!("Fetcher '{}' failed; rendering at '{}'", key, boundary_id);
            let mut errors = HashMap::new();
            errors.insert(boundary_id, error);
            state.errors = Some(errors);
            state.fetchers.remove(key);
            Some(())
        });
    }

    // ========================================================================
    // Handler execution
    // ========================================================================

    /// Run the loader or action of the target match only.
    async fn call_target(
        &self,
        matches: &[RouteMatch],
        request: Request,
        kind: HandlerKind,
        fetcher_key: Option<&str>,
        search: &str,
        context: RouterContextProvider,
    ) -> (String, TargetResult) {
        let target_id = get_target_match(matches, search)
            .map(|m| m.route.id.clone())
            .unwrap_or_default();
        let args = DataStrategyArgs {
            request,
            matches: matches
                .iter()
                .map(|m| DataStrategyMatch {
                    should_load: m.route.id == target_id,
                    route_match: m.clone(),
                })
                .collect(),
            params: leaf_params(matches),
            context,
            kind,
            fetcher_key: fetcher_key.map(str::to_string),
        };
        let mut results = run_data_strategy(Arc::clone(&self.inner.strategy), args).await;
        let result = match results.remove(&target_id) {
            Some(result) => result,
            None => results
                .into_values()
                .next()
                .unwrap_or_else(|| DataResult::data(Value::Null)),
        };
        (target_id, result.settle().await.into())
    }

    /// Run loaders and settle deferred values.
    async fn run_loaders(&self, args: DataStrategyArgs) -> DataResults {
        if args.to_load().next().is_none() {
            return DataResults::new();
        }
        let results = run_data_strategy(Arc::clone(&self.inner.strategy), args).await;
        join_all(
            results
                .into_iter()
                .map(|(id, result)| async move { (id, result.settle().await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn run_fetcher_reloads(&self, reloads: &[FetcherReload], context: &RouterContextProvider) -> Vec<TargetResult> {
        join_all(reloads.iter().map(|reload| {
            let context = context.clone();
            async move {
                let fetcher = &reload.fetcher;
                let Some(matches) = fetcher.matches.as_ref() else {
                    let pathname = parse_path(&fetcher.path).pathname;
                    return TargetResult::Error(ErrorResponse::not_found(&pathname).into());
                };
                let url = match self.create_url(&fetcher.path) {
                    Ok(url) => url,
                    Err(error) => return TargetResult::Error(RouteError::exception(error.to_string())),
                };
                let request = Request::new(Method::GET, url).with_signal(reload.token.clone());
                let search = parse_path(&fetcher.path).search;
                let (_, result) = self
                    .call_target(matches, request, HandlerKind::Loader, Some(&fetcher.key), &search, context)
                    .await;
                result
            }
        }))
        .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock()
    }

    fn ensure_alive(&self) -> Result<(), RouterError> {
        if self.control().disposed {
            return Err(RouterError::Disposed);
        }
        Ok(())
    }

    fn is_current_navigation(&self, id: u64) -> bool {
        self.control().is_current_navigation(id)
    }

    fn is_current_fetch(&self, key: &str, generation: u64) -> bool {
        self.control().is_current_fetch(key, generation)
    }

    /// Apply `f` to a copy of the current state and publish it, unless `f`
    /// returns `None`. Subscribers run after the lock is released.
    fn update<R>(&self, f: impl FnOnce(&mut Control, &mut RouterState) -> Option<R>) -> Option<R> {
        let (result, snapshot) = {
            let mut control = self.control();
            let mut next = RouterState::clone(&self.inner.state.load());
            let result = f(&mut control, &mut next)?;
            let snapshot = Arc::new(next);
            self.inner.state.store(Arc::clone(&snapshot));
            (result, snapshot)
        };
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(&snapshot);
        }
        Some(result)
    }

    fn new_context(&self) -> RouterContextProvider {
        self.inner
            .context
            .as_ref()
            .map_or_else(RouterContextProvider::new, |factory| factory())
    }

    fn create_url(&self, href: &str) -> Result<Url, RouterError> {
        parse_url(&format!("{}{}", self.inner.origin, href))
    }

    /// Resolve `to` against `from`; absolute paths get the basename.
    fn resolve_to(&self, to: &str, from: &str) -> Path {
        let mut path = resolve_path(to, from);
        let basename = &self.inner.basename;
        if to.starts_with('/') && basename != "/" {
            path.pathname = if path.pathname == "/" {
                basename.clone()
            } else {
                join_paths(&[basename.as_str(), path.pathname.as_str()])
            };
        }
        path
    }

    /// Key of the blocker that stops this transition, if any.
    fn blocking_key(&self, state: &RouterState, next: &Location, history_action: NavigationType) -> Option<String> {
        let (key, predicate) = {
            let control = self.control();
            let (key, predicate) = control.blocker_functions.last()?;
            (key.clone(), Arc::clone(predicate))
        };
        if matches!(state.blocker(&key), BlockerState::Proceeding { .. }) {
            return None;
        }
        let args = BlockerFunctionArgs {
            current_location: state.location.clone(),
            next_location: next.clone(),
            history_action,
        };
        predicate(&args).then_some(key)
    }

    fn park(&self, key: String, navigation: ParkedNavigation) {
        debug_log!("Blocker '{}' parked navigation to '{}'", key, navigation.location().href());
        self.update(|control, state| {
            state.blockers.insert(
                key.clone(),
                BlockerState::Blocked {
                    location: navigation.location().clone(),
                },
            );
            control.parked = Some((key, navigation));
            Some(())
        });
    }

    /// Ask the discovery hook for routes until `path` matches or nothing new
    /// is added.
    async fn discover_routes(&self, path: &str, fetcher_key: Option<&str>) -> Result<Option<Vec<RouteMatch>>, RouterError> {
        let Some(discover) = self.inner.discover.clone() else {
            return Ok(None);
        };
        for round in 0..MAX_DISCOVERY_ROUNDS {
            let routes = self.routes();
            let partial = match_routes_partial(&routes, path, &self.inner.basename).unwrap_or_default();
            trace_log!("Discovery round {} for '{}' ({} partial matches)", round, path, partial.len());
            let patches = discover(PatchRoutesArgs {
                path: path.to_string(),
                matches: partial,
                fetcher_key: fetcher_key.map(str::to_string),
            })
            .await
            .map_err(|error| {
                warn_log!("Route discovery for '{}' failed: {}", path, error);
                error
            })?;

            let mut changed = false;
            for patch in patches {
                changed |= self.patch_routes(patch.parent_id.as_deref(), patch.routes)?;
            }
            if let Some(matches) = match_routes(&self.routes(), path, &self.inner.basename) {
                return Ok(Some(matches));
            }
            if !changed {
                break;
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Router")
            .field("basename", &self.inner.basename)
            .field("location", &state.location.href())
            .field("navigation", &state.navigation.state())
            .field("fetchers", &state.fetchers.len())
            .finish()
    }
}

// ============================================================================
// Free helpers
// ============================================================================

pub(crate) fn leaf_params(matches: &[RouteMatch]) -> RouteParams {
    matches.last().map(|m| m.params.clone()).unwrap_or_default()
}

/// Every matched loader has data, up to the first hydrated error.
fn is_hydrated(matches: &[RouteMatch], state: &RouterState) -> bool {
    for route_match in matches {
        let id = &route_match.route.id;
        if state.route_error(id).is_some() {
            return true;
        }
        if route_match.route.has_loader() && !state.loader_data.contains_key(id) {
            return false;
        }
    }
    true
}

/// GET submissions replace the search with the form fields, keeping `?index`.
fn apply_get_submission(path: &mut Path, submission: &Submission) {
    let keep_index = SearchParams::parse(&path.search).has_naked("index");
    let mut search = match &submission.payload {
        SubmissionPayload::FormData(form_data) => form_data.to_search_params(),
        _ => SearchParams::new(),
    };
    if keep_index {
        search.append("index", "");
    }
    path.search = search.to_search_string();
}

/// Mark revalidating fetchers loading and give each a controller tied to
/// `parent`, so cancelling the parent cancels them too.
fn start_fetcher_reloads(
    control: &mut Control,
    state: &mut RouterState,
    revalidating: Vec<RevalidatingFetcher>,
    parent: &CancellationToken,
) -> Vec<FetcherReload> {
    revalidating
        .into_iter()
        .map(|fetcher| {
            let token = parent.child_token();
            let generation = control.start_fetch(&fetcher.key, token.clone());
            let data = state.fetchers.get(&fetcher.key).and_then(|f| f.data.clone());
            state
                .fetchers
                .insert(fetcher.key.clone(), FetcherState::loading(None, data));
            FetcherReload {
                fetcher,
                generation,
                token,
            }
        })
        .collect()
}

fn fetcher_redirect(reloads: &[FetcherReload], results: &[TargetResult]) -> Option<(String, Redirect)> {
    reloads.iter().zip(results).find_map(|(reload, result)| match result {
        TargetResult::Redirect(redirect) => Some((reload.fetcher.key.clone(), redirect.clone())),
        _ => None,
    })
}

/// Turn revalidated fetcher results into state updates; failures land on the
/// nearest boundary and delete the fetcher.
fn fold_fetcher_results(
    matches: &[RouteMatch],
    reloads: Vec<FetcherReload>,
    results: Vec<TargetResult>,
    errors: &mut Option<HashMap<String, RouteError>>,
) -> Vec<(String, u64, Option<FetcherState>)> {
    reloads
        .into_iter()
        .zip(results)
        .map(|(reload, result)| {
            let key = reload.fetcher.key;
            match result {
                TargetResult::Data { data, .. } => (key, reload.generation, Some(FetcherState::idle(Some(data)))),
                TargetResult::Error(error) => {
                    let boundary_id = find_nearest_boundary(matches, Some(&reload.fetcher.route_id))
                        .map_or_else(|| reload.fetcher.route_id.clone(), |m| m.route.id.clone());
                    errors
                        .get_or_insert_with(HashMap::new)
                        .entry(boundary_id)
                        .or_insert(error);
                    (key, reload.generation, None)
                }
                TargetResult::Redirect(_) => (key, reload.generation, Some(FetcherState::idle(None))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::blocker_fn;
    use crate::error::Thrown;
    use crate::request::{FormData, FormMethod, Response};
    use crate::scroll::ScrollPositions;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn app_routes(root_loads: Arc<AtomicUsize>) -> Vec<Route> {
        vec![Route::new("/")
            .id("root")
            .error_boundary(true)
            .loader(move |_| {
                let root_loads = Arc::clone(&root_loads);
                async move {
                    let n = root_loads.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(json!({ "loads": n }))
                }
            })
            .children(vec![
                Route::index().id("home").loader(|_| async { Ok(json!("home")) }),
                Route::new("projects/:id")
                    .id("project")
                    .loader(|args| async move {
                        Ok(json!({ "id": args.params.get("id").unwrap_or_default() }))
                    })
                    .action(|args| async move {
                        let name = args
                            .request
                            .form_data()
                            .and_then(|f| f.get("name"))
                            .unwrap_or_default()
                            .to_string();
                        if name.is_empty() {
                            return Err(Thrown::message("name required"));
                        }
                        Ok(json!({ "saved": name }))
                    }),
                Route::new("login").id("login"),
                Route::new("old").id("old").loader(|_| async {
                    Ok(Response::redirect("/login"))
                }),
            ])]
    }

    fn router_at(path: &str) -> (Router, Arc<AtomicUsize>) {
        init_logger();
        let loads = Arc::new(AtomicUsize::new(0));
        let router = Router::new(
            app_routes(Arc::clone(&loads)),
            RouterOptions::new().history(MemoryHistory::new(path)),
        )
        .unwrap();
        (router, loads)
    }

    #[tokio::test]
    async fn test_initialize_runs_loaders() {
        let (router, loads) = router_at("/");
        assert!(!router.state().initialized);
        assert_eq!(router.initialize().await.unwrap(), NavigationOutcome::Completed);

        let state = router.state();
        assert!(state.initialized);
        assert!(state.navigation.is_idle());
        assert_eq!(state.route_data("home"), Some(&json!("home")));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hydrated_router_is_initialized() {
        init_logger();
        let mut loader_data = HashMap::new();
        loader_data.insert("root".to_string(), json!({ "loads": 0 }));
        loader_data.insert("home".to_string(), json!("home"));
        let router = Router::new(
            app_routes(Arc::new(AtomicUsize::new(0))),
            RouterOptions::new().hydration_data(HydrationData {
                loader_data,
                ..HydrationData::default()
            }),
        )
        .unwrap();
        assert!(router.state().initialized);
    }

    #[tokio::test]
    async fn test_navigate_keeps_parent_data() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        router
            .navigate("/projects/1", NavigateOptions::new())
            .await
            .unwrap();

        let state = router.state();
        assert_eq!(state.location.pathname, "/projects/1");
        assert_eq!(state.history_action, NavigationType::Push);
        assert_eq!(state.route_ids(), vec!["root", "project"]);
        assert_eq!(state.route_data("project"), Some(&json!({ "id": "1" })));
        // Root did not reload
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(state.route_data("home").is_none());
    }

    #[tokio::test]
    async fn test_no_match_is_404_on_root() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router.navigate("/missing", NavigateOptions::new()).await.unwrap();

        let state = router.state();
        assert_eq!(state.route_ids(), vec!["root"]);
        assert_eq!(state.route_error("root").map(RouteError::status), Some(404));
    }

    #[tokio::test]
    async fn test_hash_change_skips_loaders() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        router.navigate("/#section", NavigateOptions::new()).await.unwrap();
        assert_eq!(router.state().location.hash, "#section");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_redirect() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        let outcome = router.navigate("/old", NavigateOptions::new()).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Completed);
        assert_eq!(router.state().location.pathname, "/login");
    }

    #[tokio::test]
    async fn test_action_error_renders_at_boundary() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        let submission = Submission::form(FormMethod::Post, "/projects/1", FormData::new());
        router
            .navigate("/projects/1", NavigateOptions::new().submit(submission))
            .await
            .unwrap();

        let state = router.state();
        assert!(state.route_error("root").is_some());
        assert!(state.route_data("project").is_none());
        assert!(state.action_data.is_none());
        // Nothing above the root boundary, so nothing reloads
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_data_and_revalidation() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        let form = FormData::new().field("name", "apollo");
        router
            .navigate(
                "/projects/2",
                NavigateOptions::new().submit(Submission::form(FormMethod::Post, "/projects/2", form)),
            )
            .await
            .unwrap();

        let state = router.state();
        let action_data = state.action_data.as_ref().unwrap();
        assert_eq!(action_data.get("project"), Some(&json!({ "saved": "apollo" })));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submission_without_action_is_405() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router
            .navigate(
                "/login",
                NavigateOptions::new().submit(Submission::form(FormMethod::Post, "/login", FormData::new())),
            )
            .await
            .unwrap();
        assert_eq!(router.state().route_error("root").map(RouteError::status), Some(405));
    }

    #[tokio::test]
    async fn test_concurrent_navigations_last_wins() {
        init_logger();
        let routes = vec![Route::new("/").id("root").children(vec![
            Route::new("one").id("one").loader(|_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("one"))
            }),
            Route::new("two").id("two").loader(|_| async { Ok(json!("two")) }),
        ])];
        let router = Router::new(routes, RouterOptions::new()).unwrap();
        router.initialize().await.unwrap();

        let first = router.navigate("/one", NavigateOptions::new());
        let second = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            router.navigate("/two", NavigateOptions::new()).await
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), NavigationOutcome::Superseded);
        assert_eq!(second.unwrap(), NavigationOutcome::Completed);

        let state = router.state();
        assert_eq!(state.location.pathname, "/two");
        assert!(state.route_data("one").is_none());
        assert_eq!(state.route_data("two"), Some(&json!("two")));
    }

    #[tokio::test]
    async fn test_fetcher_load_and_delete() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router
            .fetch("f1", "root", "/projects/9", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(router.get_fetcher("f1").data, Some(json!({ "id": "9" })));
        assert!(router.get_fetcher("f1").is_idle());

        router.delete_fetcher("f1");
        assert!(router.state().fetchers.get("f1").is_none());
    }

    #[tokio::test]
    async fn test_fetcher_submission_revalidates_page() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        let form = FormData::new().field("name", "x");
        router
            .fetch(
                "save",
                "root",
                "/projects/3",
                FetchOptions::submit(Submission::form(FormMethod::Post, "/projects/3", form)),
            )
            .await
            .unwrap();

        assert_eq!(router.get_fetcher("save").data, Some(json!({ "saved": "x" })));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(router.state().location.pathname, "/");
    }

    #[tokio::test]
    async fn test_fetcher_error_goes_to_boundary() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router
            .fetch(
                "bad",
                "project",
                "/projects/3",
                FetchOptions::submit(Submission::form(FormMethod::Post, "/projects/3", FormData::new())),
            )
            .await
            .unwrap();
        let state = router.state();
        assert!(state.route_error("root").is_some());
        assert!(state.fetchers.get("bad").is_none());
    }

    #[tokio::test]
    async fn test_blocker_parks_until_proceed() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router.get_blocker("form", blocker_fn(|args| args.next_location.pathname == "/login"));

        let outcome = router.navigate("/login", NavigateOptions::new()).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Blocked);
        assert!(router.state().blocker("form").is_blocked());
        assert_eq!(router.state().location.pathname, "/");

        let outcome = router.proceed_blocker("form").await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Completed);
        assert_eq!(router.state().location.pathname, "/login");
        assert_eq!(router.state().blocker("form"), BlockerState::Unblocked);
    }

    #[tokio::test]
    async fn test_reset_blocker_drops_navigation() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router.get_blocker("b", blocker_fn(|_| true));
        router.navigate("/login", NavigateOptions::new()).await.unwrap();
        router.reset_blocker("b");
        assert_eq!(router.proceed_blocker("b").await.unwrap(), NavigationOutcome::Completed);
        assert_eq!(router.state().location.pathname, "/");
        assert_eq!(router.state().blocker("b"), BlockerState::Unblocked);
    }

    #[tokio::test]
    async fn test_go_back_is_pop() {
        let (router, _) = router_at("/");
        router.initialize().await.unwrap();
        router.navigate("/login", NavigateOptions::new()).await.unwrap();
        router.back().await.unwrap();
        let state = router.state();
        assert_eq!(state.location.pathname, "/");
        assert_eq!(state.history_action, NavigationType::Pop);
    }

    #[tokio::test]
    async fn test_revalidate_reruns_loaders() {
        let (router, loads) = router_at("/");
        router.initialize().await.unwrap();
        router.revalidate().await.unwrap();
        let state = router.state();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(state.revalidation, RevalidationState::Idle);
        assert_eq!(state.route_data("root"), Some(&json!({ "loads": 2 })));
    }

    #[tokio::test]
    async fn test_subscribers_see_every_commit() {
        let (router, _) = router_at("/");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = router.subscribe(move |state| sink.lock().push(state.navigation.state()));
        router.initialize().await.unwrap();
        router.navigate("/projects/1", NavigateOptions::new()).await.unwrap();
        assert_eq!(seen.lock().last(), Some(&"idle"));
        assert!(seen.lock().contains(&"loading"));
        assert!(router.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_external_redirect_reloads() {
        init_logger();
        let routes = vec![Route::new("/")
            .id("root")
            .child(Route::new("out").id("out").loader(|_| async {
                Ok(Response::redirect("https://other.example/x"))
            }))];
        let router = Router::new(routes, RouterOptions::new()).unwrap();
        router.initialize().await.unwrap();
        let outcome = router.navigate("/out", NavigateOptions::new()).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Reload("https://other.example/x".to_string()));
        assert!(router.state().navigation.is_idle());
    }

    #[tokio::test]
    async fn test_basename_prefixes_absolute_paths() {
        init_logger();
        let routes = vec![Route::new("/").id("root").child(Route::new("inbox").id("inbox"))];
        let router = Router::new(
            routes,
            RouterOptions::new()
                .basename("/app")
                .history(MemoryHistory::new("/app")),
        )
        .unwrap();
        router.initialize().await.unwrap();
        router.navigate("/inbox", NavigateOptions::new()).await.unwrap();
        let state = router.state();
        assert_eq!(state.location.pathname, "/app/inbox");
        assert_eq!(state.route_ids(), vec!["root", "inbox"]);
        assert_eq!(router.create_href("/inbox"), "/app/inbox");
    }

    #[tokio::test]
    async fn test_route_discovery() {
        init_logger();
        let routes = vec![Route::new("/").id("root")];
        let router = Router::new(
            routes,
            RouterOptions::new().patch_routes_on_navigation(|args: PatchRoutesArgs| async move {
                if args.path == "/lazy" {
                    Ok(vec![RoutePatch::new(
                        Some("root"),
                        vec![Route::new("lazy").id("lazy").loader(|_| async { Ok(json!("found")) })],
                    )])
                } else {
                    Ok(Vec::new())
                }
            }),
        )
        .unwrap();
        router.initialize().await.unwrap();
        router.navigate("/lazy", NavigateOptions::new()).await.unwrap();
        assert_eq!(router.state().route_data("lazy"), Some(&json!("found")));
        assert!(router.routes().contains("lazy"));
    }

    #[tokio::test]
    async fn test_scroll_positions_restore_on_pop() {
        let positions = Arc::new(ScrollPositions::new());
        let offset = Arc::new(Mutex::new(0.0));
        let reader = Arc::clone(&offset);
        let loads = Arc::new(AtomicUsize::new(0));
        let router = Router::new(
            app_routes(loads),
            RouterOptions::new().scroll_restoration(ScrollRestoration::new(
                Arc::clone(&positions),
                Arc::new(move || *reader.lock()),
            )),
        )
        .unwrap();
        router.initialize().await.unwrap();

        *offset.lock() = 300.0;
        router.navigate("/login", NavigateOptions::new()).await.unwrap();
        assert_eq!(router.state().restore_scroll_position, RestoreScroll::Reset);

        router.back().await.unwrap();
        assert_eq!(router.state().restore_scroll_position, RestoreScroll::Position(300.0));
    }

    #[tokio::test]
    async fn test_dispose_rejects_navigation() {
        let (router, _) = router_at("/");
        router.dispose();
        assert!(matches!(
            router.navigate("/login", NavigateOptions::new()).await,
            Err(RouterError::Disposed)
        ));
    }
}
