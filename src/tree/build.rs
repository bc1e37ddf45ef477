//! Inserting rules into a [`super::DecisionTree`].

use tracing::debug;

use super::node::{Node, TreeFlavor};
use super::DecisionTree;
use crate::ruleset::RuleSet;
use crate::Error;

/// Build a tree of the given `flavor` over every rule in `rule_set`.
///
/// Rules are inserted in descending weight order so the most specific
/// paths are built before wildcard paths share their prefix.
pub fn build_tree(rule_set: &RuleSet, flavor: TreeFlavor) -> Result<DecisionTree, Error> {
    let driver_count = rule_set.driver_names().len();

    match flavor {
        TreeFlavor::Single | TreeFlavor::Dated => {
            let root = build_trie(rule_set, flavor, None)?;
            debug!(rule_set = %rule_set.name, flavor = ?flavor, "built decision tree");
            Ok(DecisionTree {
                flavor,
                root,
                slice_bounds: Vec::new(),
                slice_cache: std::sync::RwLock::new(std::collections::HashMap::new()),
                driver_count,
                rule_set: None,
            })
        }
        TreeFlavor::Sliced => {
            let mut bounds: Vec<_> = rule_set.rules().flat_map(|r| [r.range.start, r.range.finish]).collect();
            bounds.sort();
            bounds.dedup();
            debug!(rule_set = %rule_set.name, slices = bounds.len().saturating_sub(1), "built sliced decision tree boundaries");
            Ok(DecisionTree {
                flavor,
                root: Node::new_root(),
                slice_bounds: bounds,
                slice_cache: std::sync::RwLock::new(std::collections::HashMap::new()),
                driver_count,
                rule_set: Some(std::sync::Arc::new(rule_set.clone())),
            })
        }
    }
}

/// Build a `SINGLE`/`DATED` trie, optionally restricted to rules active
/// within `active_range` (used by the `SLICED` flavor's per-slice builds).
pub(super) fn build_trie(
    rule_set: &RuleSet,
    flavor: TreeFlavor,
    active_range: Option<crate::time::DateRange>,
) -> Result<Node, Error> {
    let mut rules: Vec<_> = rule_set
        .rules()
        .filter(|r| active_range.is_none_or(|range| r.range.overlaps(&range)))
        .collect();
    rules.sort_by(|a, b| b.weight().cmp(&a.weight()));

    let mut root = Node::new_root();
    for rule in rules {
        let mut node = &mut root;
        for driver in &rule.drivers {
            node = node.child_mut(driver.clone());
            if flavor == TreeFlavor::Dated {
                node.expand_range(rule.range);
            }
        }
        node.leaves.push(super::node::Leaf {
            rule_identifier: rule.rule_identifier,
            rule_code: rule.rule_code.clone(),
            outputs: rule.outputs.clone(),
            weight: rule.weight(),
            range: rule.range,
            evaluations: rule.evaluations.clone(),
        });
    }
    Ok(root)
}
