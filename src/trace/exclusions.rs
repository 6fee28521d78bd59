//! Denylist of endpoint identities suppressed from tracing.

use std::collections::HashSet;
use std::sync::RwLock;

/// A concurrent set of `"Owner#action"` endpoint identities that should
/// never produce spans.
///
/// Reads (from normalizers) and inserts (from operator-facing
/// registration) may happen concurrently without external
/// synchronization. With no configuration loaded, nothing is excluded.
#[derive(Debug, Default)]
pub struct ExclusionFilter {
    inner: RwLock<HashSet<String>>,
}

impl ExclusionFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        ExclusionFilter::default()
    }

    /// Adds an endpoint identity to the denylist. Idempotent.
    pub fn add(&self, identifier: impl Into<String>) {
        if let Ok(mut set) = self.inner.write() {
            set.insert(identifier.into());
        }
    }

    /// Whether the given endpoint identity is excluded. Returns `false`
    /// when nothing has been configured or the lock is unavailable.
    pub fn is_excluded(&self, identifier: &str) -> bool {
        self.inner
            .read()
            .map(|set| set.contains(identifier))
            .unwrap_or(false)
    }

    /// Number of configured exclusions.
    pub fn len(&self) -> usize {
        self.inner.read().map(|set| set.len()).unwrap_or(0)
    }

    /// Whether no exclusions are configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unconfigured_filter_excludes_nothing() {
        let filter = ExclusionFilter::new();
        assert!(!filter.is_excluded("UsersController#index"));
        assert!(filter.is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let filter = ExclusionFilter::new();
        filter.add("UsersController#show");
        filter.add("UsersController#show");

        assert_eq!(filter.len(), 1);
        assert!(filter.is_excluded("UsersController#show"));
        assert!(!filter.is_excluded("UsersController#index"));
    }

    #[test]
    fn inserts_are_visible_across_threads() {
        let filter = Arc::new(ExclusionFilter::new());
        let writer = {
            let filter = Arc::clone(&filter);
            std::thread::spawn(move || filter.add("PostsController#create"))
        };
        writer.join().unwrap();

        assert!(filter.is_excluded("PostsController#create"));
    }
}
