//! Scroll restoration
//!
//! Saved positions live in a [`ScrollPositions`] cache owned by the
//! embedding layer and shared with the router by `Arc`, so several routers in
//! one process keep separate caches.

use crate::location::Location;
use crate::matcher::RouteMatch;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Saved vertical scroll offsets keyed by location (or a custom key).
#[derive(Debug, Default)]
pub struct ScrollPositions {
    positions: Mutex<HashMap<String, f64>>,
}

impl ScrollPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, key: impl Into<String>, position: f64) {
        self.positions.lock().insert(key.into(), position);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.positions.lock().get(key).copied()
    }

    pub fn remove(&self, key: &str) -> Option<f64> {
        self.positions.lock().remove(key)
    }

    pub fn clear(&self) {
        self.positions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the UI should do with scroll after a navigation commits.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RestoreScroll {
    /// Leave scroll where it is (submissions, `prevent_scroll_reset`)
    Skip,
    /// Scroll to the top, or to the hash target
    #[default]
    Reset,
    /// Restore a saved offset
    Position(f64),
}

/// Computes the key a location's position is saved under.
pub type GetScrollKey = Arc<dyn Fn(&Location, &[RouteMatch]) -> String + Send + Sync>;

/// Reads the current scroll offset from the UI.
pub type GetScrollPosition = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Scroll restoration wiring passed in [`RouterOptions`](crate::RouterOptions).
#[derive(Clone)]
pub struct ScrollRestoration {
    pub positions: Arc<ScrollPositions>,
    pub get_position: GetScrollPosition,
    /// Defaults to the location key
    pub get_key: Option<GetScrollKey>,
}

impl ScrollRestoration {
    pub fn new(positions: Arc<ScrollPositions>, get_position: GetScrollPosition) -> Self {
        Self {
            positions,
            get_position,
            get_key: None,
        }
    }

    /// Key by something else than the location key, for example the pathname.
    pub fn key_by(mut self, get_key: GetScrollKey) -> Self {
        self.get_key = Some(get_key);
        self
    }

    pub(crate) fn key_for(&self, location: &Location, matches: &[RouteMatch]) -> String {
        match &self.get_key {
            Some(get_key) => get_key(location, matches),
            None => location.key.clone(),
        }
    }

    /// Remember where the user was on `location`.
    pub(crate) fn save(&self, location: &Location, matches: &[RouteMatch]) {
        let key = self.key_for(location, matches);
        self.positions.save(key, (self.get_position)());
    }

    pub(crate) fn saved(&self, location: &Location, matches: &[RouteMatch]) -> Option<f64> {
        self.positions.get(&self.key_for(location, matches))
    }
}

impl fmt::Debug for ScrollRestoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollRestoration")
            .field("positions", &self.positions.len())
            .field("custom_key", &self.get_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_per_cache() {
        let a = ScrollPositions::new();
        let b = ScrollPositions::new();
        a.save("k", 120.0);
        assert_eq!(a.get("k"), Some(120.0));
        assert_eq!(b.get("k"), None);
    }

    #[test]
    fn test_custom_key() {
        let positions = Arc::new(ScrollPositions::new());
        let restoration = ScrollRestoration::new(Arc::clone(&positions), Arc::new(|| 42.0))
            .key_by(Arc::new(|location: &Location, _matches: &[RouteMatch]| location.pathname.clone()));
        let location = Location::new("/feed");
        restoration.save(&location, &[]);
        assert_eq!(positions.get("/feed"), Some(42.0));
        assert_eq!(restoration.saved(&Location::new("/feed"), &[]), Some(42.0));
    }
}
