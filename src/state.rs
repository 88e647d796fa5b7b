//! Router state snapshots
//!
//! A [`RouterState`] is never mutated once published: every transition
//! builds a new one and swaps it in, so a reader holding a snapshot never
//! sees a half-applied update.

use crate::blocker::BlockerState;
use crate::error::RouteError;
use crate::fetcher::FetcherState;
use crate::location::{Location, NavigationType};
use crate::matcher::RouteMatch;
use crate::request::Submission;
use crate::scroll::RestoreScroll;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// The in-flight navigation, if any.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Navigation {
    #[default]
    Idle,
    /// Loaders are running; `submission` is set after a submission that
    /// redirected, or for GET submissions
    Loading {
        location: Location,
        submission: Option<Submission>,
    },
    /// An action is running
    Submitting {
        location: Location,
        submission: Submission,
    },
}

impl Navigation {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Idle => None,
            Self::Loading { location, .. } | Self::Submitting { location, .. } => Some(location),
        }
    }

    pub fn submission(&self) -> Option<&Submission> {
        match self {
            Self::Idle => None,
            Self::Loading { submission, .. } => submission.as_ref(),
            Self::Submitting { submission, .. } => Some(submission),
        }
    }

    /// `"idle"`, `"loading"` or `"submitting"`.
    pub fn state(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading { .. } => "loading",
            Self::Submitting { .. } => "submitting",
        }
    }
}

/// Whether a [`Router::revalidate`](crate::Router::revalidate) is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevalidationState {
    #[default]
    Idle,
    Loading,
}

/// Server-rendered data the router starts from.
#[derive(Debug, Clone, Default)]
pub struct HydrationData {
    pub loader_data: HashMap<String, Value>,
    pub action_data: Option<HashMap<String, Value>>,
    pub errors: Option<HashMap<String, RouteError>>,
}

/// Immutable snapshot of the router.
#[derive(Debug, Clone, Default)]
pub struct RouterState {
    pub location: Location,
    pub history_action: NavigationType,
    pub navigation: Navigation,
    pub matches: Vec<RouteMatch>,
    pub loader_data: HashMap<String, Value>,
    pub action_data: Option<HashMap<String, Value>>,
    pub errors: Option<HashMap<String, RouteError>>,
    pub fetchers: HashMap<String, FetcherState>,
    pub blockers: HashMap<String, BlockerState>,
    pub revalidation: RevalidationState,
    /// Initial loaders have finished
    pub initialized: bool,
    pub restore_scroll_position: RestoreScroll,
    pub prevent_scroll_reset: bool,
}

impl RouterState {
    /// A fetcher's state; unknown keys read as idle.
    pub fn fetcher(&self, key: &str) -> FetcherState {
        self.fetchers.get(key).cloned().unwrap_or_default()
    }

    /// A blocker's state; unknown keys read as unblocked.
    pub fn blocker(&self, key: &str) -> BlockerState {
        self.blockers.get(key).cloned().unwrap_or_default()
    }

    pub fn route_data(&self, route_id: &str) -> Option<&Value> {
        self.loader_data.get(route_id)
    }

    pub fn route_error(&self, route_id: &str) -> Option<&RouteError> {
        self.errors.as_ref().and_then(|errors| errors.get(route_id))
    }

    pub fn route_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.route.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FormData, FormMethod};

    #[test]
    fn test_navigation_accessors() {
        assert!(Navigation::default().is_idle());
        let submission = Submission::form(FormMethod::Post, "/x", FormData::new());
        let navigation = Navigation::Submitting {
            location: Location::new("/x"),
            submission: submission.clone(),
        };
        assert_eq!(navigation.state(), "submitting");
        assert_eq!(navigation.submission(), Some(&submission));
        assert_eq!(navigation.location().unwrap().pathname, "/x");
    }

    #[test]
    fn test_unknown_keys_read_as_idle() {
        let state = RouterState::default();
        assert!(state.fetcher("nope").is_idle());
        assert_eq!(state.blocker("nope"), BlockerState::Unblocked);
        assert!(state.route_error("root").is_none());
    }
}
