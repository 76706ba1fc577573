//! Node selectors and selector-set matching.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A `(type, value)` label attached to an agent, used for authorization and
/// registration matching. Selector sets are deduplicated by `(type, value)`;
/// ordering carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selector {
    pub r#type: String,
    pub value: String,
}

impl Selector {
    pub fn new(r#type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            value: value.into(),
        }
    }
}

/// How a selector filter is matched against an agent's selector set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchBehavior {
    /// The agent's selector set equals the filter set.
    #[default]
    Exact,
    /// The agent's selector set is a subset of the filter set.
    Subset,
    /// The filter set is a subset of the agent's selector set.
    Superset,
    /// The agent's selector set intersects the filter set.
    Any,
}

impl MatchBehavior {
    /// Whether an agent with the given selector set matches the filter.
    ///
    /// An agent with no selectors never matches a selector filter.
    pub fn matches(&self, agent: &[Selector], filter: &[Selector]) -> bool {
        if agent.is_empty() {
            return false;
        }
        let agent: BTreeSet<&Selector> = agent.iter().collect();
        let filter: BTreeSet<&Selector> = filter.iter().collect();
        match self {
            MatchBehavior::Exact => agent == filter,
            MatchBehavior::Subset => agent.is_subset(&filter),
            MatchBehavior::Superset => filter.is_subset(&agent),
            MatchBehavior::Any => !agent.is_disjoint(&filter),
        }
    }
}

/// Deduplicate a selector list by `(type, value)`, keeping a stable order.
pub fn dedupe(selectors: Vec<Selector>) -> Vec<Selector> {
    let set: BTreeSet<Selector> = selectors.into_iter().collect();
    set.into_iter().collect()
}

/// Render selectors as `type:value,...` for log and audit fields.
pub fn format_list(selectors: &[Selector]) -> String {
    selectors
        .iter()
        .map(|s| format!("{}:{}", s.r#type, s.value))
        .collect::<Vec<_>>()
        .join(",")
}
