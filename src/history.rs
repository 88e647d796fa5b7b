//! Location stacks
//!
//! The router talks to history through the [`History`] trait; browser or
//! native integrations provide their own implementation. [`MemoryHistory`]
//! keeps the stack in memory, drops forward entries on push and caps its
//! length by discarding the oldest entries.

use crate::location::{create_path, Location, NavigationType, Path};

/// Storage for the location stack the router navigates through.
pub trait History: Send + 'static {
    /// How the current entry became current.
    fn action(&self) -> NavigationType;

    /// The current entry.
    fn location(&self) -> Location;

    /// Push a new entry, dropping any forward entries.
    fn push(&mut self, location: Location);

    /// Replace the current entry.
    fn replace(&mut self, location: Location);

    /// The entry `delta` steps away, without moving.
    fn peek(&self, delta: isize) -> Option<Location>;

    /// Move `delta` steps; returns the new current entry, `None` if out of range.
    fn go(&mut self, delta: isize) -> Option<Location>;

    /// Href for a path, as it would appear in a link.
    fn create_href(&self, path: &Path) -> String {
        create_path(path)
    }
}

/// History for servers, tests and non-browser hosts.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    entries: Vec<Location>,
    current: usize,
    action: NavigationType,
    /// 0 keeps every entry
    max_size: usize,
}

impl MemoryHistory {
    const DEFAULT_MAX_SIZE: usize = 1000;

    /// One entry, keyed `"default"`.
    pub fn new(initial_path: &str) -> Self {
        Self::with_max_size(initial_path, Self::DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(initial_path: &str, max_size: usize) -> Self {
        Self {
            entries: vec![Location::initial(initial_path)],
            current: 0,
            action: NavigationType::Pop,
            max_size,
        }
    }

    /// Several entries with `index` current; the index is clamped.
    pub fn with_entries(paths: &[&str], index: usize) -> Self {
        let mut entries: Vec<Location> = paths.iter().map(|p| Location::new(p)).collect();
        if entries.is_empty() {
            entries.push(Location::initial("/"));
        }
        entries[0].key = Location::DEFAULT_KEY.to_string();
        let current = index.min(entries.len() - 1);
        Self {
            entries,
            current,
            action: NavigationType::Pop,
            max_size: Self::DEFAULT_MAX_SIZE,
        }
    }

    pub fn can_go_back(&self) -> bool {
        self.current > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.current + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a history has at least one entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the current entry.
    pub fn index(&self) -> usize {
        self.current
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[Location] {
        &self.entries
    }

    fn target_index(&self, delta: isize) -> Option<usize> {
        let target = self.current as isize + delta;
        (target >= 0 && (target as usize) < self.entries.len()).then_some(target as usize)
    }

    fn trim_oldest(&mut self) {
        if self.max_size == 0 || self.entries.len() <= self.max_size {
            return;
        }
        let dropped = self.entries.len() - self.max_size;
        self.entries.drain(..dropped);
        self.current = self.current.saturating_sub(dropped);
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("/")
    }
}

impl History for MemoryHistory {
    fn action(&self) -> NavigationType {
        self.action
    }

    fn location(&self) -> Location {
        self.entries[self.current].clone()
    }

    fn push(&mut self, location: Location) {
        self.entries.truncate(self.current + 1);
        self.entries.push(location);
        self.current += 1;
        self.action = NavigationType::Push;
        self.trim_oldest();
    }

    fn replace(&mut self, location: Location) {
        self.entries[self.current] = location;
        self.action = NavigationType::Replace;
    }

    fn peek(&self, delta: isize) -> Option<Location> {
        self.target_index(delta).map(|i| self.entries[i].clone())
    }

    fn go(&mut self, delta: isize) -> Option<Location> {
        let target = self.target_index(delta)?;
        self.current = target;
        self.action = NavigationType::Pop;
        Some(self.location())
    }
}
