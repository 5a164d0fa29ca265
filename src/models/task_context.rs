//! Hierarchical task-context ids.
//!
//! A task-context id is a dotted path identifying which (possibly
//! dynamically generated) branch of the graph a task belongs to: `"#1"` is
//! the root context, `"#1.2"` the second permutation branch spawned under
//! it. Treating a whole sub-path as one unit is what keeps concurrently
//! produced fan-out branches distinguishable.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{CONTEXT_SEPARATOR, ROOT_CONTEXT_ID};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContextId(String);

impl TaskContextId {
    /// The root context every execution graph starts in.
    pub fn root() -> Self {
        Self(ROOT_CONTEXT_ID.to_string())
    }

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Mint a child context by appending a 1-based branch index.
    pub fn child(&self, index: usize) -> Self {
        Self(format!("{}{}{}", self.0, CONTEXT_SEPARATOR, index))
    }

    /// Whether `other` lies underneath this context path.
    pub fn contains(&self, other: &TaskContextId) -> bool {
        other.0 == self.0
            || other
                .0
                .strip_prefix(&self.0)
                .is_some_and(|rest| rest.starts_with(CONTEXT_SEPARATOR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(CONTEXT_SEPARATOR)
    }
}

impl fmt::Display for TaskContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for TaskContextId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskContextId {
    /// Components compare numerically when both are numeric, otherwise
    /// lexicographically, so `#1.2` sorts before `#1.10`.
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.components();
        let mut right = other.components();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(na), Ok(nb)) => na.cmp(&nb),
                        _ => a.cmp(b),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_appends_index() {
        let root = TaskContextId::root();
        assert_eq!(root.as_str(), "#1");
        assert_eq!(root.child(2).as_str(), "#1.2");
        assert_eq!(root.child(2).child(1).as_str(), "#1.2.1");
    }

    #[test]
    fn test_contains_sub_paths() {
        let root = TaskContextId::root();
        let branch = root.child(3);
        assert!(root.contains(&branch));
        assert!(root.contains(&branch.child(1)));
        assert!(!branch.contains(&root));
        // "#1.3" does not contain "#1.30"
        assert!(!branch.contains(&TaskContextId::new("#1.30")));
    }

    #[test]
    fn test_numeric_ordering() {
        let a = TaskContextId::new("#1.2");
        let b = TaskContextId::new("#1.10");
        assert!(a < b);
        assert!(TaskContextId::new("#1") < a);
    }
}
