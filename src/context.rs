//! Per-request router context
//!
//! A [`RouterContextProvider`] is a typed registry handed to middleware,
//! loaders and actions. Values are looked up by [`ContextKey`]; a key may
//! carry a default, and reading a key with neither a value nor a default
//! fails with [`RouterError::MissingContextValue`].
//!
//! Providers are cheap to clone and every navigation, fetch and server query
//! starts from its own copy, so concurrent requests never share mutable
//! context.
//!
//! # Example
//!
//! ```
//! use datarouter::{ContextKey, RouterContextProvider};
//!
//! let user = ContextKey::<String>::new("user");
//! let locale = ContextKey::with_default("locale", "en".to_string());
//!
//! let mut context = RouterContextProvider::new();
//! context.set(&user, "ada".to_string());
//!
//! assert_eq!(context.get(&user).unwrap(), "ada");
//! assert_eq!(context.get(&locale).unwrap(), "en");
//! ```

use crate::error::RouterError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a context value of type `T`.
pub struct ContextKey<T> {
    id: u64,
    name: String,
    default: Option<Arc<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ContextKey<T> {
    /// A key without a default; reading it before it is set is an error.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            default: None,
            _marker: PhantomData,
        }
    }

    /// A key that falls back to `default` when unset.
    pub fn with_default(name: impl Into<String>, default: T) -> Self {
        Self {
            default: Some(Arc::new(default)),
            ..Self::new(name)
        }
    }
}

impl<T> ContextKey<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Typed context values for one request.
#[derive(Clone, Default)]
pub struct RouterContextProvider {
    values: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl RouterContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value, falling back to the key's default.
    pub fn get<'a, T: Send + Sync + 'static>(
        &'a self,
        key: &'a ContextKey<T>,
    ) -> Result<&'a T, RouterError> {
        if let Some(value) = self.values.get(&key.id) {
            if let Some(value) = value.downcast_ref::<T>() {
                return Ok(value);
            }
        }
        key.default
            .as_deref()
            .ok_or_else(|| RouterError::MissingContextValue(key.name.clone()))
    }

    /// Set (or overwrite) a value.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &ContextKey<T>, value: T) {
        self.values.insert(key.id, Arc::new(value));
    }

    /// Builder-style [`set`](Self::set).
    pub fn with<T: Send + Sync + 'static>(mut self, key: &ContextKey<T>, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Whether an explicit value is present (defaults don't count).
    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.values.contains_key(&key.id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for RouterContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterContextProvider")
            .field("values", &self.values.len())
            .finish()
    }
}

/// Produces a fresh context for each navigation, fetch or query.
pub type ContextFactory = Arc<dyn Fn() -> RouterContextProvider + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_value_errors() {
        let key = ContextKey::<u32>::new("count");
        let context = RouterContextProvider::new();
        match context.get(&key) {
            Err(RouterError::MissingContextValue(name)) => assert_eq!(name, "count"),
            other => panic!("expected missing value, got {:?}", other),
        }
    }

    #[test]
    fn test_default_and_override() {
        let key = ContextKey::with_default("limit", 10_u32);
        let mut context = RouterContextProvider::new();
        assert_eq!(*context.get(&key).unwrap(), 10);
        assert!(!context.contains(&key));

        context.set(&key, 25);
        assert_eq!(*context.get(&key).unwrap(), 25);
    }

    #[test]
    fn test_keys_with_same_name_are_distinct() {
        let a = ContextKey::<&'static str>::new("user");
        let b = ContextKey::<&'static str>::new("user");
        let context = RouterContextProvider::new().with(&a, "ada");
        assert!(context.get(&b).is_err());
        assert_eq!(*context.get(&a.clone()).unwrap(), "ada");
    }

    #[test]
    fn test_clones_are_independent() {
        let key = ContextKey::<u8>::new("n");
        let base = RouterContextProvider::new().with(&key, 1);
        let mut copy = base.clone();
        copy.set(&key, 2);
        assert_eq!(*base.get(&key).unwrap(), 1);
        assert_eq!(*copy.get(&key).unwrap(), 2);
    }
}
