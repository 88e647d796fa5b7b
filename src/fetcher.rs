//! Fetcher state
//!
//! Fetchers load or submit to a single route without touching the current
//! navigation. Each key has at most one request in flight.

use crate::request::Submission;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of a fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherStatus {
    #[default]
    Idle,
    Loading,
    Submitting,
}

/// Snapshot of one fetcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetcherState {
    pub state: FetcherStatus,
    /// Last data the fetcher received; kept across loads
    pub data: Option<Value>,
    pub submission: Option<Submission>,
}

impl FetcherState {
    pub fn idle(data: Option<Value>) -> Self {
        Self {
            state: FetcherStatus::Idle,
            data,
            submission: None,
        }
    }

    pub fn loading(submission: Option<Submission>, data: Option<Value>) -> Self {
        Self {
            state: FetcherStatus::Loading,
            data,
            submission,
        }
    }

    pub fn submitting(submission: Submission, data: Option<Value>) -> Self {
        Self {
            state: FetcherStatus::Submitting,
            data,
            submission: Some(submission),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == FetcherStatus::Idle
    }
}

/// Options for [`Router::fetch`](crate::Router::fetch).
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Submit instead of loading
    pub submission: Option<Submission>,
}

impl FetchOptions {
    pub fn submit(submission: Submission) -> Self {
        Self {
            submission: Some(submission),
        }
    }
}

/// Where a fetcher last loaded from; used to revalidate it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLoadMatch {
    pub route_id: String,
    /// `pathname + search`, including the basename
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FormData, FormMethod};
    use serde_json::json;

    #[test]
    fn test_default_is_idle_without_data() {
        let fetcher = FetcherState::default();
        assert!(fetcher.is_idle());
        assert!(fetcher.data.is_none());
    }

    #[test]
    fn test_transitions_keep_data() {
        let submission = Submission::form(FormMethod::Post, "/todos", FormData::new().field("t", "x"));
        let fetcher = FetcherState::submitting(submission.clone(), Some(json!([1])));
        assert_eq!(fetcher.state, FetcherStatus::Submitting);
        assert_eq!(fetcher.data, Some(json!([1])));
        assert_eq!(fetcher.submission, Some(submission));
        assert_eq!(serde_json::to_value(fetcher.state).unwrap(), json!("submitting"));
    }
}
