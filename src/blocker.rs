//! Navigation blockers
//!
//! A blocker is a predicate consulted before a navigation commits. When it
//! returns `true` the navigation is parked and the blocker turns
//! [`BlockerState::Blocked`] until the caller proceeds or resets it.

use crate::location::{Location, NavigationType};
use std::sync::Arc;

/// Key used for the blocker created by [`Router::get_blocker`](crate::Router::get_blocker)
/// when callers don't need several.
pub const DEFAULT_BLOCKER_KEY: &str = "blocker";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum BlockerState {
    #[default]
    Unblocked,
    /// A navigation to `location` is parked
    Blocked { location: Location },
    /// The parked navigation was allowed and is running
    Proceeding { location: Location },
}

impl BlockerState {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Unblocked => None,
            Self::Blocked { location } | Self::Proceeding { location } => Some(location),
        }
    }
}

/// What a blocker predicate sees.
#[derive(Debug, Clone)]
pub struct BlockerFunctionArgs {
    pub current_location: Location,
    pub next_location: Location,
    pub history_action: NavigationType,
}

pub type BlockerFunction = Arc<dyn Fn(&BlockerFunctionArgs) -> bool + Send + Sync>;

/// Wrap a closure as a [`BlockerFunction`].
pub fn blocker_fn<F>(f: F) -> BlockerFunction
where
    F: Fn(&BlockerFunctionArgs) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_state_location() {
        assert!(BlockerState::default().location().is_none());
        let blocked = BlockerState::Blocked {
            location: Location::new("/next"),
        };
        assert!(blocked.is_blocked());
        assert_eq!(blocked.location().unwrap().pathname, "/next");
    }

    #[test]
    fn test_blocker_fn_predicate() {
        let block_leaving_form = blocker_fn(|args| {
            args.current_location.pathname == "/form" && args.next_location.pathname != "/form"
        });
        let args = BlockerFunctionArgs {
            current_location: Location::new("/form"),
            next_location: Location::new("/home"),
            history_action: NavigationType::Push,
        };
        assert!(block_leaving_form(&args));
    }
}
