//! Target routine matching

use std::collections::HashSet;

/// Names of the routines whose dynamic extent turns tracing on
///
/// Keeps the names in the order they were supplied; lookups go through a
/// set. Duplicates are harmless.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    names: Vec<String>,
    index: HashSet<String>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a target name
    pub fn push(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.index.insert(name.clone());
        self.names.push(name);
    }

    /// Exact-match membership test
    pub fn is_target(&self, routine_name: &str) -> bool {
        self.index.contains(routine_name)
    }

    /// Names in the order supplied
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TargetSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.push(name);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let targets: TargetSet = ["compute", "hash_block"].into_iter().collect();
        assert!(targets.is_target("compute"));
        assert!(targets.is_target("hash_block"));
        assert!(!targets.is_target("comput"));
        assert!(!targets.is_target("compute2"));
        assert!(!targets.is_target("Compute"));
    }

    #[test]
    fn test_duplicates_and_order() {
        let targets: TargetSet = ["b", "a", "b"].into_iter().collect();
        assert_eq!(targets.names(), ["b", "a", "b"]);
        assert!(targets.is_target("a"));
        assert!(targets.is_target("b"));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let targets = TargetSet::new();
        assert!(targets.is_empty());
        assert!(!targets.is_target(""));
        assert!(!targets.is_target("main"));
    }
}
