//! Integration coverage for the segment algebra and tree evaluation across
//! realistic, week-scale rule timelines.

use std::collections::HashMap;
use std::sync::Arc;

use chronotree::change::DeltaType;
use chronotree::driver::string_driver;
use chronotree::segment::{compute_rule_deltas, ChangeSpec, RuleAttributes};
use chronotree::value_group::ValueGroup;
use chronotree::{DateRange, DriverCache, Instant, RuleSetBuilder, TreeFlavor};

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

fn week(n: i64) -> Instant {
    Instant::from_millis(n * WEEK_MS)
}

fn outputs(v: &str) -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("price".to_string(), v.to_string());
    m
}

fn rule_with_range(range: DateRange, label: &str) -> chronotree::DecisionTreeRule {
    let mut cache = DriverCache::new();
    chronotree::DecisionTreeRule {
        rule_identifier: uuid::Uuid::new_v4(),
        rule_code: "R".to_string(),
        drivers: vec![string_driver(&mut cache, "x")],
        evaluations: Vec::new(),
        outputs: outputs(label),
        range,
    }
}

#[test]
fn scenario_a_extend_first_segment_forward() {
    let seg1 = rule_with_range(DateRange::new(week(2), week(4)).unwrap(), "1");
    let seg2 = rule_with_range(DateRange::new(week(4), week(6)).unwrap(), "2");
    let seg3 = rule_with_range(DateRange::new(week(6), week(8)).unwrap(), "3");
    let seg1_id = seg1.rule_identifier;
    let segments = vec![seg1, seg2, seg3];
    let groups = HashMap::new();

    let deltas = compute_rule_deltas(
        "R",
        &segments,
        ChangeSpec { id: Some(seg1_id), start: Some(week(1)), finish: None, attributes: None },
        week(0),
        &groups,
    )
    .unwrap();

    assert_eq!(deltas.len(), 2);
    let originals: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::Original).collect();
    let news: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::New).collect();
    assert_eq!(originals.len(), 1);
    assert_eq!(originals[0].segment.rule_identifier, seg1_id);
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].segment.range, DateRange::new(week(1), week(4)).unwrap());
    assert_eq!(news[0].segment.outputs, segments_by_label(&segments, "1").outputs);
}

fn segments_by_label(segments: &[chronotree::DecisionTreeRule], label: &str) -> chronotree::DecisionTreeRule {
    segments.iter().find(|s| s.outputs.get("price") == Some(&label.to_string())).unwrap().clone()
}

#[test]
fn scenario_b_span_first_to_last_swallows_the_middle() {
    let seg1 = rule_with_range(DateRange::new(week(2), week(4)).unwrap(), "1");
    let seg2 = rule_with_range(DateRange::new(week(4), week(6)).unwrap(), "2");
    let seg3 = rule_with_range(DateRange::new(week(6), week(8)).unwrap(), "3");
    let seg1_id = seg1.rule_identifier;
    let segments = vec![seg1, seg2, seg3];
    let groups = HashMap::new();

    let deltas = compute_rule_deltas(
        "R",
        &segments,
        ChangeSpec { id: Some(seg1_id), start: Some(week(1)), finish: Some(week(9)), attributes: None },
        week(0),
        &groups,
    )
    .unwrap();

    let originals: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::Original).collect();
    let news: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::New).collect();
    assert_eq!(originals.len(), 3);
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].segment.range, DateRange::new(week(1), week(9)).unwrap());
    assert_eq!(news[0].segment.outputs, outputs("1"));
}

#[test]
fn scenario_c_new_change_inside_segment_two() {
    let seg1 = rule_with_range(DateRange::new(week(2), week(4)).unwrap(), "1");
    let seg2 = rule_with_range(DateRange::new(week(4), week(6)).unwrap(), "2");
    let seg3 = rule_with_range(DateRange::new(week(6), week(8)).unwrap(), "3");
    let segments = vec![seg1, seg2, seg3];
    let groups = HashMap::new();

    let two_days = 2 * 24 * 60 * 60 * 1000;
    let start = Instant::from_millis(week(5).millis());
    let finish = Instant::from_millis(week(5).millis() + two_days);

    let mut cache = DriverCache::new();
    let deltas = compute_rule_deltas(
        "R",
        &segments,
        ChangeSpec {
            id: None,
            start: Some(start),
            finish: Some(finish),
            attributes: Some(RuleAttributes { drivers: Some(vec![string_driver(&mut cache, "y")]), evaluations: None, outputs: Some(outputs("inserted")) }),
        },
        week(0),
        &groups,
    )
    .unwrap();

    let originals: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::Original).collect();
    let mut news: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::New).collect();
    news.sort_by_key(|d| d.segment.range.start);

    assert_eq!(originals.len(), 1);
    assert_eq!(news.len(), 3);
    assert_eq!(news[0].segment.range, DateRange::new(week(4), start).unwrap());
    assert_eq!(news[0].segment.outputs, outputs("2"));
    assert_eq!(news[1].segment.range, DateRange::new(start, finish).unwrap());
    assert_eq!(news[1].segment.outputs, outputs("inserted"));
    assert_eq!(news[2].segment.range, DateRange::new(finish, week(6)).unwrap());
    assert_eq!(news[2].segment.outputs, outputs("2"));
}

#[test]
fn scenario_d_group_driver_range_check_fails() {
    let mut cache = DriverCache::new();
    let group = ValueGroup::new("G", vec!["US".to_string()]).unwrap().with_range(DateRange::new(week(0), week(6)).unwrap());
    let mut groups = HashMap::new();
    groups.insert(group.id, group.clone());

    let group_driver = group.build_driver(&mut cache, &groups).unwrap();
    let seg = chronotree::DecisionTreeRule {
        rule_identifier: uuid::Uuid::new_v4(),
        rule_code: "R".to_string(),
        drivers: vec![group_driver.clone()],
        evaluations: Vec::new(),
        outputs: outputs("1"),
        range: DateRange::new(week(2), week(4)).unwrap(),
    };
    let seg_id = seg.rule_identifier;
    let segments = vec![seg];

    let result = compute_rule_deltas(
        "R",
        &segments,
        ChangeSpec {
            id: Some(seg_id),
            start: Some(week(3)),
            finish: Some(week(7)),
            attributes: Some(RuleAttributes { drivers: Some(vec![group_driver]), evaluations: None, outputs: Some(outputs("1")) }),
        },
        week(0),
        &groups,
    );

    assert!(matches!(result, Err(chronotree::Error::GroupDriverOutOfRange { .. })));
}

#[test]
fn scenario_e_wildcard_rule_loses_when_literal_slot_mismatches() {
    let names: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
    let mut builder = RuleSetBuilder::new("rates", names, vec![]).unwrap();
    builder
        .add_rule("R1", vec!["*".to_string(), "CME".to_string(), "ED".to_string(), "US".to_string(), "RATE".to_string()], outputs("r1"), DateRange::UNBOUNDED)
        .unwrap();
    builder
        .add_rule("R2", vec!["VOICE".to_string(), "CME".to_string(), "ED".to_string(), "*".to_string(), "INDEX".to_string()], outputs("r2"), DateRange::UNBOUNDED)
        .unwrap();
    let rule_set = builder.build().unwrap();
    let tree = chronotree::tree::DecisionTree::build(&rule_set, TreeFlavor::Single).unwrap();

    let inputs = vec!["VOICE".to_string(), "CME".to_string(), "ED".to_string(), "US".to_string(), "RATE".to_string()];
    let result = tree.evaluate(&inputs, None, &Default::default()).unwrap().unwrap();
    assert_eq!(result.outputs.get("price"), Some(&"r1".to_string()));
}

#[test]
fn scenario_f_dated_evaluation_excludes_outside_window() {
    let mut builder = RuleSetBuilder::new("rates", vec!["a".to_string()], vec![]).unwrap();
    builder.add_rule("R1", vec!["x".to_string()], outputs("1"), DateRange::new(week(2), week(4)).unwrap()).unwrap();
    let rule_set = builder.build().unwrap();
    let tree = chronotree::tree::DecisionTree::build(&rule_set, TreeFlavor::Dated).unwrap();

    let result = tree.evaluate(&["x".to_string()], Some(week(5)), &Default::default()).unwrap();
    assert!(result.is_none());
}

#[test]
fn driver_interning_invariant_holds_after_build() {
    let mut builder = RuleSetBuilder::new("rates", vec!["a".to_string(), "b".to_string()], vec![]).unwrap();
    builder.add_rule("R1", vec!["x".to_string(), "y".to_string()], outputs("1"), DateRange::UNBOUNDED).unwrap();
    builder.add_rule("R2", vec!["x".to_string(), "z".to_string()], outputs("2"), DateRange::UNBOUNDED).unwrap();
    let rule_set = builder.build().unwrap();

    let xs: Vec<Arc<chronotree::InputDriver>> =
        rule_set.rules().flat_map(|r| r.drivers.iter()).filter(|d| d.value() == "x").cloned().collect();
    assert!(xs.len() >= 2);
    assert!(xs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn build_change_rollback_apply_round_trip_restores_original_by_value() {
    let mut builder = RuleSetBuilder::new("rates", vec!["a".to_string()], vec![]).unwrap();
    builder.add_rule("R1", vec!["x".to_string()], outputs("1"), DateRange::UNBOUNDED).unwrap();
    let original = builder.build().unwrap();

    let existing_rule = original.rules().next().unwrap().clone();
    let mut cache = DriverCache::new();
    let new_rule = chronotree::DecisionTreeRule {
        rule_identifier: uuid::Uuid::new_v4(),
        rule_code: "R2".to_string(),
        drivers: vec![string_driver(&mut cache, "y")],
        evaluations: Vec::new(),
        outputs: outputs("2"),
        range: DateRange::UNBOUNDED,
    };

    let change = chronotree::Change::new(
        "rates",
        DateRange::UNBOUNDED,
        chronotree::Audit::new("tester", Instant::EPOCH),
        vec![chronotree::RuleDelta { change_type: DeltaType::New, rule: new_rule }],
        vec![],
    );
    let changed = original.apply(&change).unwrap();
    assert_eq!(changed.rules().count(), 2);

    let inverse = chronotree::change::rollback(&change, chronotree::Audit::new("tester", Instant::EPOCH).authorised_by("approver", Instant::EPOCH));
    let restored = changed.apply(&inverse).unwrap();

    assert_eq!(restored.rules().count(), 1);
    let remaining = restored.rules().next().unwrap();
    assert_eq!(remaining.rule_code, existing_rule.rule_code);
    assert_eq!(remaining.outputs, existing_rule.outputs);
}
