//! Decision-tree construction and evaluation (components C5/C6).
//!
//! ```text
//!   RuleSet ── build(flavor) ──► DecisionTree
//!                                   │
//!                SINGLE ───────────┼─────────── trie, failure-path linked
//!                DATED  ───────────┼─────────── trie, range-carrying nodes
//!                SLICED ───────────┘─────────── lazily-built SINGLE per slice
//!
//!   DecisionTree ── evaluate(inputs, instant?) ──► Option<Match>
//!                ── evaluate_all(inputs, instant?) ──► Vec<Match>
//! ```
//!
//! `node.rs` defines the trie node shape shared by SINGLE and DATED trees;
//! `build.rs` inserts rules into a tree; `eval.rs` walks one.

mod build;
mod eval;
mod node;

pub use build::build_tree;
pub use eval::{EvalOptions, Match};
pub use node::{Node, TreeFlavor};

use std::collections::HashMap;

use crate::time::Instant;
use crate::Error;

/// A constructed tree, ready for repeated evaluation against a fixed set
/// of rules.
pub struct DecisionTree {
    pub(crate) flavor: TreeFlavor,
    pub(crate) root: Node,
    /// For `SLICED` trees: the sorted distinct instants bounding each
    /// slice, and a lazily-populated cache of the SINGLE sub-tree for each
    /// slice index.
    pub(crate) slice_bounds: Vec<Instant>,
    pub(crate) slice_cache: std::sync::RwLock<HashMap<usize, Node>>,
    pub(crate) driver_count: usize,
    /// Retained only for `SLICED` trees, which build their per-slice
    /// sub-trees on first query rather than upfront.
    pub(crate) rule_set: Option<std::sync::Arc<crate::ruleset::RuleSet>>,
}

impl DecisionTree {
    /// Build a tree of the given `flavor` over every rule in `rule_set`.
    pub fn build(rule_set: &crate::ruleset::RuleSet, flavor: TreeFlavor) -> Result<DecisionTree, Error> {
        build::build_tree(rule_set, flavor)
    }

    pub fn flavor(&self) -> TreeFlavor {
        self.flavor
    }

    /// Weighted single-match evaluation.
    pub fn evaluate(&self, inputs: &[String], instant: Option<Instant>, options: &EvalOptions) -> Result<Option<Match>, Error> {
        eval::evaluate(self, inputs, instant, options)
    }

    /// All-matches evaluation.
    pub fn evaluate_all(&self, inputs: &[String], instant: Option<Instant>, options: &EvalOptions) -> Result<Vec<Match>, Error> {
        eval::evaluate_all(self, inputs, instant, options)
    }
}
