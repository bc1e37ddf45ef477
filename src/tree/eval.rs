//! Walking a built [`super::DecisionTree`] against a row of inputs.

use std::collections::HashMap;

use uuid::Uuid;

use super::node::{Leaf, Node, TreeFlavor};
use super::DecisionTree;
use crate::time::{DateRange, Instant};
use crate::Error;

/// Evaluation-time configuration.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// When true, [`evaluate_all`] includes rules whose entire driver path
    /// is wildcards (zero weight); otherwise they are filtered out.
    pub include_wildcard_matches: bool,
}

/// A single rule match returned by evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub rule_identifier: Uuid,
    pub rule_code: String,
    pub outputs: HashMap<String, String>,
    pub weight: u64,
    pub range: DateRange,
}

impl From<&Leaf> for Match {
    fn from(leaf: &Leaf) -> Self {
        Match { rule_identifier: leaf.rule_identifier, rule_code: leaf.rule_code.clone(), outputs: leaf.outputs.clone(), weight: leaf.weight, range: leaf.range }
    }
}

fn check_arity(tree: &DecisionTree, inputs: &[String]) -> Result<(), Error> {
    if inputs.len() != tree.driver_count {
        return Err(Error::InputArity { expected: tree.driver_count, actual: inputs.len() });
    }
    Ok(())
}

fn resolve_root<'a>(tree: &'a DecisionTree, instant: Option<Instant>, scratch: &'a mut Option<Node>) -> Result<&'a Node, Error> {
    match tree.flavor {
        TreeFlavor::Single | TreeFlavor::Dated => Ok(&tree.root),
        TreeFlavor::Sliced => {
            let instant = instant.ok_or(Error::MissingInstant)?;
            let slice_index = slice_index_for(&tree.slice_bounds, instant)?;

            {
                let cache = tree.slice_cache.read().unwrap();
                if let Some(node) = cache.get(&slice_index) {
                    *scratch = Some(node.clone());
                    return Ok(scratch.as_ref().unwrap());
                }
            }

            let rule_set = tree.rule_set.as_ref().expect("sliced tree always retains its rule set");
            let active_range = DateRange { start: tree.slice_bounds[slice_index], finish: tree.slice_bounds[slice_index + 1] };
            let built = super::build::build_trie(rule_set, TreeFlavor::Single, Some(active_range))?;

            let mut cache = tree.slice_cache.write().unwrap();
            let node = cache.entry(slice_index).or_insert(built);
            *scratch = Some(node.clone());
            Ok(scratch.as_ref().unwrap())
        }
    }
}

fn slice_index_for(bounds: &[Instant], instant: Instant) -> Result<usize, Error> {
    if bounds.len() < 2 {
        return Err(Error::MissingData { reason: "sliced tree has no rule-derived slice boundaries".to_string() });
    }
    for (i, window) in bounds.windows(2).enumerate() {
        if instant >= window[0] && instant < window[1] {
            return Ok(i);
        }
    }
    Err(Error::MissingData { reason: format!("instant {instant} falls outside every rule slice") })
}

fn collect_leaves<'a>(node: &'a Node, inputs: &[String], depth: usize, out: &mut Vec<&'a Leaf>) -> Result<(), Error> {
    if depth == inputs.len() {
        out.extend(node.leaves.iter());
        return Ok(());
    }
    let input = &inputs[depth];
    for child in &node.children {
        let driver = child.driver.as_ref().expect("non-root nodes always carry a driver");
        if driver.evaluate(input)? {
            collect_leaves(child, inputs, depth + 1, out)?;
        }
    }
    if let Some(wildcard) = &node.wildcard_child {
        collect_leaves(wildcard, inputs, depth + 1, out)?;
    }
    Ok(())
}

fn leaf_evaluations_pass(leaf: &Leaf) -> Result<bool, Error> {
    for evaluation in &leaf.evaluations {
        let mut any_match = false;
        for value in leaf.outputs.values() {
            if evaluation.evaluate(value)? {
                any_match = true;
                break;
            }
        }
        if !any_match {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Weighted single-match evaluation: the candidate with the highest weight
/// wins; ties keep the first-encountered candidate, giving deterministic,
/// stable results for a fixed tree.
pub fn evaluate(tree: &DecisionTree, inputs: &[String], instant: Option<Instant>, _options: &EvalOptions) -> Result<Option<Match>, Error> {
    check_arity(tree, inputs)?;
    let mut scratch = None;
    let root = resolve_root(tree, instant, &mut scratch)?;

    let mut leaves = Vec::new();
    collect_leaves(root, inputs, 0, &mut leaves)?;

    let mut best: Option<&Leaf> = None;
    for leaf in leaves {
        if matches!(tree.flavor, TreeFlavor::Dated | TreeFlavor::Sliced) {
            let Some(instant) = instant else { return Err(Error::MissingInstant) };
            if !leaf.range.contains_instant(instant) {
                continue;
            }
        }
        if !leaf_evaluations_pass(leaf)? {
            continue;
        }
        if best.is_none_or(|b| leaf.weight > b.weight) {
            best = Some(leaf);
        }
    }

    Ok(best.map(Match::from))
}

/// All-matches evaluation: every candidate whose path succeeded, optionally
/// including wildcard-only (zero-weight) matches.
pub fn evaluate_all(tree: &DecisionTree, inputs: &[String], instant: Option<Instant>, options: &EvalOptions) -> Result<Vec<Match>, Error> {
    check_arity(tree, inputs)?;
    let mut scratch = None;
    let root = resolve_root(tree, instant, &mut scratch)?;

    let mut leaves = Vec::new();
    collect_leaves(root, inputs, 0, &mut leaves)?;

    let mut matches = Vec::new();
    for leaf in leaves {
        if matches!(tree.flavor, TreeFlavor::Dated | TreeFlavor::Sliced) {
            let Some(instant) = instant else { return Err(Error::MissingInstant) };
            if !leaf.range.contains_instant(instant) {
                continue;
            }
        }
        if !options.include_wildcard_matches && leaf.weight == 0 {
            continue;
        }
        if !leaf_evaluations_pass(leaf)? {
            continue;
        }
        matches.push(Match::from(leaf));
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::RuleSetBuilder;
    use std::collections::HashMap;

    fn outputs(v: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("price".to_string(), v.to_string());
        m
    }

    #[test]
    fn empty_input_fails_arity() {
        let builder = RuleSetBuilder::new("rs", vec!["a".to_string()], vec![]).unwrap();
        let rule_set = builder.build().unwrap();
        let tree = DecisionTree::build(&rule_set, TreeFlavor::Single).unwrap();
        let err = tree.evaluate(&[], None, &EvalOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InputArity { expected: 1, actual: 0 }));
    }

    #[test]
    fn specific_path_beats_wildcard_path() {
        let mut builder = RuleSetBuilder::new("rs", vec!["a".to_string(), "b".to_string()], vec![]).unwrap();
        builder.add_rule("R1", vec!["*".to_string(), "*".to_string()], outputs("wild"), DateRange::UNBOUNDED).unwrap();
        builder.add_rule("R2", vec!["x".to_string(), "y".to_string()], outputs("specific"), DateRange::UNBOUNDED).unwrap();
        let rule_set = builder.build().unwrap();
        let tree = DecisionTree::build(&rule_set, TreeFlavor::Single).unwrap();

        let result = tree.evaluate(&["x".to_string(), "y".to_string()], None, &EvalOptions::default()).unwrap().unwrap();
        assert_eq!(result.outputs.get("price"), Some(&"specific".to_string()));
    }

    #[test]
    fn literal_slot_mismatch_excludes_rule_even_with_higher_nominal_weight() {
        // r1: (*, CME, ED, US, RATE); r2: (VOICE, CME, ED, *, INDEX).
        // Input ("VOICE","CME","ED","US","RATE") only matches r1: r2's last
        // slot requires the literal "INDEX", which the input does not supply.
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string()];
        let mut builder = RuleSetBuilder::new("rs", names, vec![]).unwrap();
        builder
            .add_rule(
                "R1",
                vec!["*".to_string(), "CME".to_string(), "ED".to_string(), "US".to_string(), "RATE".to_string()],
                outputs("r1"),
                DateRange::UNBOUNDED,
            )
            .unwrap();
        builder
            .add_rule(
                "R2",
                vec!["VOICE".to_string(), "CME".to_string(), "ED".to_string(), "*".to_string(), "INDEX".to_string()],
                outputs("r2"),
                DateRange::UNBOUNDED,
            )
            .unwrap();
        let rule_set = builder.build().unwrap();
        let tree = DecisionTree::build(&rule_set, TreeFlavor::Single).unwrap();

        let inputs = vec!["VOICE".to_string(), "CME".to_string(), "ED".to_string(), "US".to_string(), "RATE".to_string()];
        let result = tree.evaluate(&inputs, None, &EvalOptions::default()).unwrap().unwrap();
        assert_eq!(result.outputs.get("price"), Some(&"r1".to_string()));
    }

    #[test]
    fn dated_tree_requires_instant() {
        let mut builder = RuleSetBuilder::new("rs", vec!["a".to_string()], vec![]).unwrap();
        builder.add_rule("R1", vec!["x".to_string()], outputs("1"), DateRange::UNBOUNDED).unwrap();
        let rule_set = builder.build().unwrap();
        let tree = DecisionTree::build(&rule_set, TreeFlavor::Dated).unwrap();
        let err = tree.evaluate(&["x".to_string()], None, &EvalOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingInstant));
    }

    #[test]
    fn dated_tree_excludes_rules_outside_query_instant() {
        let r0 = Instant::from_millis(0);
        let r100 = Instant::from_millis(100);
        let r200 = Instant::from_millis(200);
        let mut builder = RuleSetBuilder::new("rs", vec!["a".to_string()], vec![]).unwrap();
        builder.add_rule("R1", vec!["x".to_string()], outputs("early"), DateRange::new(r0, r100).unwrap()).unwrap();
        let rule_set = builder.build().unwrap();
        let tree = DecisionTree::build(&rule_set, TreeFlavor::Dated).unwrap();

        let inside = tree.evaluate(&["x".to_string()], Some(Instant::from_millis(50)), &EvalOptions::default()).unwrap();
        assert!(inside.is_some());
        let outside = tree.evaluate(&["x".to_string()], Some(r200), &EvalOptions::default()).unwrap();
        assert!(outside.is_none());
    }
}
