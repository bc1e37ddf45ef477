//! Trie node shape shared by the `SINGLE` and `DATED` tree flavors.

use std::sync::Arc;

use uuid::Uuid;

use crate::driver::InputDriver;
use crate::time::DateRange;
use std::collections::HashMap;

/// Which tree shape a [`super::DecisionTree`] was built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFlavor {
    /// Time-agnostic trie; used when temporal activity is not a selection
    /// criterion.
    Single,
    /// Every node carries a `[start, end)`; nodes at the same level with
    /// the same driver value but disjoint ranges are distinct.
    Dated,
    /// A sorted slice boundary list plus a lazily-built `Single` sub-tree
    /// per slice.
    Sliced,
}

/// A terminal rule match reached at the end of a driver path.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub rule_identifier: Uuid,
    pub rule_code: String,
    pub outputs: HashMap<String, String>,
    pub weight: u64,
    pub range: DateRange,
    pub evaluations: Vec<Arc<InputDriver>>,
}

/// One level of the trie.
///
/// Descent at a level tries `children` (keyed by the literal driver value
/// at this depth) first; if none of them match, or if descent beyond a
/// matching child later dead-ends, evaluation falls back to
/// `wildcard_child` — the "same level, one-step-more-wildcard" failure
/// path. Representing the fallback structurally (as the wildcard child
/// already present in the tree) rather than as a raw pointer keeps the
/// tree an owned, acyclic structure.
#[derive(Debug, Clone)]
pub struct Node {
    /// The driver that must match an input to descend into this node; `None`
    /// only at the root.
    pub driver: Option<Arc<InputDriver>>,
    pub children: Vec<Node>,
    pub wildcard_child: Option<Box<Node>>,
    pub leaves: Vec<Leaf>,
    /// Union of every rule range that passes through this node. Only
    /// meaningful for `Dated` trees; left at `DateRange::UNBOUNDED` for
    /// `Single` trees. Starts unset so that a node touched by exactly one
    /// unbounded-range rule stays unbounded rather than being shrunk by a
    /// later, narrower-range rule through the same slot.
    pub range: DateRange,
    range_set: bool,
}

impl Node {
    pub fn new_root() -> Self {
        Node { driver: None, children: Vec::new(), wildcard_child: None, leaves: Vec::new(), range: DateRange::UNBOUNDED, range_set: false }
    }

    pub fn new_child(driver: Arc<InputDriver>) -> Self {
        Node { driver: Some(driver), children: Vec::new(), wildcard_child: None, leaves: Vec::new(), range: DateRange::UNBOUNDED, range_set: false }
    }

    pub fn is_wildcard(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| d.is_wildcard())
    }

    /// Expand this node's covering range to include `range` (`Dated` trees,
    /// "inserting a rule expands the range of every matched
    /// intermediate node to cover the rule's interval").
    pub fn expand_range(&mut self, range: DateRange) {
        if !self.range_set {
            self.range = range;
            self.range_set = true;
            return;
        }
        self.range = DateRange {
            start: if self.range.start < range.start { self.range.start } else { range.start },
            finish: if self.range.finish > range.finish { self.range.finish } else { range.finish },
        };
    }

    /// Find (or create) the non-wildcard child matching `driver`'s cache
    /// key, or the wildcard child if `driver` is itself a wildcard.
    pub fn child_mut(&mut self, driver: Arc<InputDriver>) -> &mut Node {
        if driver.is_wildcard() {
            if self.wildcard_child.is_none() {
                self.wildcard_child = Some(Box::new(Node::new_child(driver)));
            }
            return self.wildcard_child.as_mut().unwrap();
        }
        if let Some(pos) = self.children.iter().position(|c| c.driver.as_ref().is_some_and(|d| d.cache_key() == driver.cache_key())) {
            return &mut self.children[pos];
        }
        self.children.push(Node::new_child(driver));
        self.children.last_mut().unwrap()
    }
}
