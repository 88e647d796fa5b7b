//! Deciding which loaders re-run
//!
//! A loader runs when its route is new to the match chain or has no data.
//! Otherwise the route's `should_revalidate` policy decides, given a
//! suggested default: reload when revalidation was explicitly required, when
//! the URL is unchanged (a reload of the same page), when the search changed,
//! or when the route's own pathname (or splat) changed. After a submission
//! that returned a 4xx/5xx, the default turns to "don't".
//!
//! After an action *error*, only loaders above the boundary that renders the
//! error are eligible, and they always re-run regardless of policy.

use crate::data::{get_loader_matches_until_boundary, DataStrategyMatch};
use crate::error::RouteError;
use crate::fetcher::{FetchLoadMatch, FetcherState};
use crate::manifest::DataRoutes;
use crate::matcher::{get_target_match, match_routes, RouteMatch};
use crate::params::{RouteParams, SPLAT};
use crate::request::{FormMethod, Submission};
use crate::trace_log;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use url::Url;

/// What a route's revalidation policy is asked.
#[derive(Debug, Clone)]
pub struct ShouldRevalidateArgs {
    pub current_url: Url,
    pub current_params: RouteParams,
    pub next_url: Url,
    pub next_params: RouteParams,
    pub submission: Option<Submission>,
    /// Data returned by the action, if one ran
    pub action_result: Option<Value>,
    pub action_status: Option<u16>,
    /// What the router would do without a policy
    pub default_should_revalidate: bool,
}

impl ShouldRevalidateArgs {
    pub fn form_method(&self) -> Option<FormMethod> {
        self.submission.as_ref().map(|s| s.form_method)
    }

    pub fn form_action(&self) -> Option<&str> {
        self.submission.as_ref().map(|s| s.form_action.as_str())
    }
}

/// How the action of the current submission ended.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Data { data: Value, status: Option<u16> },
    /// The action failed; the error renders at `boundary_id`
    Error { boundary_id: String },
}

/// Inputs shared by every revalidation decision of one navigation.
#[derive(Debug, Clone, Copy)]
pub struct RevalidationContext<'a> {
    pub current_matches: &'a [RouteMatch],
    pub loader_data: &'a HashMap<String, Value>,
    pub errors: Option<&'a HashMap<String, RouteError>>,
    pub current_url: &'a Url,
    pub next_url: &'a Url,
    pub submission: Option<&'a Submission>,
    pub action: Option<&'a ActionOutcome>,
    pub is_revalidation_required: bool,
    pub initial_hydration: bool,
}

/// A fetcher that will reload alongside a navigation.
#[derive(Debug, Clone)]
pub struct RevalidatingFetcher {
    pub key: String,
    pub route_id: String,
    pub path: String,
    /// `None` when the fetcher's path no longer matches anything
    pub matches: Option<Vec<RouteMatch>>,
}

impl<'a> RevalidationContext<'a> {
    fn action_status(&self) -> Option<u16> {
        match self.action {
            Some(ActionOutcome::Data { status, .. }) => *status,
            _ => None,
        }
    }

    fn skips_revalidation(&self) -> bool {
        self.action_status().is_some_and(|status| status >= 400)
    }

    fn args(&self, current_params: RouteParams, next_params: RouteParams, default: bool) -> ShouldRevalidateArgs {
        ShouldRevalidateArgs {
            current_url: self.current_url.clone(),
            current_params,
            next_url: self.next_url.clone(),
            next_params,
            submission: self.submission.cloned(),
            action_result: match self.action {
                Some(ActionOutcome::Data { data, .. }) => Some(data.clone()),
                _ => None,
            },
            action_status: self.action_status(),
            default_should_revalidate: default,
        }
    }

    fn url_unchanged(&self) -> bool {
        self.current_url.path() == self.next_url.path() && self.current_url.query() == self.next_url.query()
    }

    fn search_changed(&self) -> bool {
        self.current_url.query() != self.next_url.query()
    }

    /// Every next match, flagged with whether its loader runs.
    pub fn matches_to_load(&self, next_matches: &[RouteMatch]) -> Vec<DataStrategyMatch> {
        let eligible = match self.action {
            Some(ActionOutcome::Error { boundary_id }) => {
                get_loader_matches_until_boundary(next_matches, boundary_id).len()
            }
            _ => next_matches.len(),
        };
        let action_errored = matches!(self.action, Some(ActionOutcome::Error { .. }));

        next_matches
            .iter()
            .enumerate()
            .map(|(index, next)| {
                let should_load = index < eligible
                    && next.route.has_loader()
                    && (action_errored || self.should_load(index, next));
                DataStrategyMatch {
                    route_match: next.clone(),
                    should_load,
                }
            })
            .collect()
    }

    fn should_load(&self, index: usize, next: &RouteMatch) -> bool {
        let id = next.route.id.as_str();
        if self.initial_hydration {
            return !self.loader_data.contains_key(id)
                && !self.errors.is_some_and(|errors| errors.contains_key(id));
        }

        let current = self.current_matches.get(index);
        let is_new = current.map_or(true, |c| c.route.id != next.route.id);
        if is_new || !self.loader_data.contains_key(id) {
            return true;
        }
        let Some(current) = current else {
            return true;
        };

        let default = if self.skips_revalidation() {
            false
        } else {
            self.is_revalidation_required
                || self.url_unchanged()
                || self.search_changed()
                || is_new_route_instance(current, next)
        };
        match next.route.should_revalidate.as_ref() {
            Some(policy) => {
                let decision = policy(&self.args(current.params.clone(), next.params.clone(), default));
                trace_log!("Revalidation policy of '{}' returned {}", id, decision);
                decision
            }
            None => default,
        }
    }

    /// Idle fetchers that loaded data and whose route is still matched.
    ///
    /// Fetchers in `skip` (deleted, or just redirected) are left alone.
    pub fn fetchers_to_revalidate(
        &self,
        routes: &DataRoutes,
        basename: &str,
        next_matches: &[RouteMatch],
        fetch_loads: &HashMap<String, FetchLoadMatch>,
        fetchers: &HashMap<String, FetcherState>,
        skip: &HashSet<String>,
    ) -> Vec<RevalidatingFetcher> {
        if self.initial_hydration {
            return Vec::new();
        }
        let current_params = self
            .current_matches
            .last()
            .map(|m| m.params.clone())
            .unwrap_or_default();
        let next_params = next_matches.last().map(|m| m.params.clone()).unwrap_or_default();

        let mut keys: Vec<&String> = fetch_loads.keys().collect();
        keys.sort();

        keys.into_iter()
            .filter_map(|key| {
                let load = fetch_loads.get(key)?;
                if skip.contains(key) || !next_matches.iter().any(|m| m.route.id == load.route_id) {
                    return None;
                }
                let Some(fetcher_matches) = match_routes(routes, &load.path, basename) else {
                    return Some(RevalidatingFetcher {
                        key: key.clone(),
                        route_id: load.route_id.clone(),
                        path: load.path.clone(),
                        matches: None,
                    });
                };

                let fetcher = fetchers.get(key);
                let should_revalidate = if fetcher.is_some_and(|f| !f.is_idle() && f.data.is_none()) {
                    self.is_revalidation_required
                } else {
                    let search = crate::location::parse_path(&load.path).search;
                    let target = get_target_match(&fetcher_matches, &search)?;
                    let default = !self.skips_revalidation() && self.is_revalidation_required;
                    match target.route.should_revalidate.as_ref() {
                        Some(policy) => policy(&self.args(current_params.clone(), next_params.clone(), default)),
                        None => default,
                    }
                };

                should_revalidate.then(|| RevalidatingFetcher {
                    key: key.clone(),
                    route_id: load.route_id.clone(),
                    path: load.path.clone(),
                    matches: Some(fetcher_matches),
                })
            })
            .collect()
    }
}

/// The route instance changed: a different pathname, or a different splat on
/// a `*` route.
pub fn is_new_route_instance(current: &RouteMatch, next: &RouteMatch) -> bool {
    let splat_route = current.route.path.as_deref().is_some_and(|p| p.ends_with('*'));
    current.pathname != next.pathname || (splat_route && current.params.get(SPLAT) != next.params.get(SPLAT))
}
