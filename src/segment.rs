//! Segment algebra (component C3): the shared slicing algorithm behind both
//! rule-code edits and value-group edits.
//!
//! Rules (keyed by `rule_code`) and value groups (keyed by `name`) are both
//! *temporal entities*: several segments share one logical identity but
//! partition time into disjoint `[start, end)` windows. [`compute_deltas`]
//! implements the slicing algorithm once, generic over a [`SegmentFamily`];
//! [`RuleSegmentFamily`] and [`GroupSegmentFamily`] are its two instances.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::driver::{DriverCache, InputDriver};
use crate::rule::DecisionTreeRule;
use crate::time::{DateRange, Instant};
use crate::value_group::ValueGroup;
use crate::Error;

/// How a created or removed segment relates to the pre-change partition;
/// re-exported through [`crate::change::DeltaType`] once a [`Change`](crate::Change)
/// is assembled from these deltas.
pub use crate::change::DeltaType;

#[derive(Debug, Clone)]
pub struct SegmentDelta<S> {
    pub change_type: DeltaType,
    pub segment: S,
}

/// The caller-supplied description of an edit.
///
/// `start`/`finish` of `None` mean, respectively, "from the matched
/// segment's start" and "to the matched segment's end" when `id` is set; an
/// entirely empty change (`id`, `start`, and `finish` all `None`) defaults
/// to `[now, MAX)` (step 1).
pub struct ChangeSpec<A> {
    pub id: Option<Uuid>,
    pub start: Option<Instant>,
    pub finish: Option<Instant>,
    pub attributes: Option<A>,
}

/// The operations the shared algorithm needs from one entity family.
///
/// A "segment" here is one family's domain object (a [`DecisionTreeRule`]
/// or a [`ValueGroup`]); `Attributes` is the subset of that object's fields
/// a change may supply (drivers/outputs for rules, values for groups).
pub trait SegmentFamily {
    type Segment: Clone;
    type Attributes: Clone;
    /// Ambient data the family needs to validate a newly created segment
    /// (the value-group map, for the rule family's group-range check).
    type Context;

    fn id(segment: &Self::Segment) -> Uuid;
    fn range(segment: &Self::Segment) -> DateRange;

    /// A brand-new segment built entirely from the change's attributes.
    /// Fails if required attributes are missing (step 3 preconditions).
    fn new_from_change(range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error>;

    /// A pure re-slice of `existing` narrowed to `range`, attributes
    /// untouched (the "adjacent boundary piece" case of step 5).
    fn new_from_existing(existing: &Self::Segment, range: DateRange) -> Self::Segment;

    /// `existing`'s attributes merged with the change's, change-supplied
    /// fields winning, narrowed to `range`.
    fn new_merged(existing: &Self::Segment, range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error>;

    /// True if `a` and `b` carry equal attributes (range and id ignored),
    /// for the adjacent-merge pass (step 7).
    fn attributes_equal(a: &Self::Segment, b: &Self::Segment) -> bool;

    /// `segment`'s own fields, expressed as the attributes a change could
    /// carry. Used to default an id-targeted amendment's attributes to the
    /// matched segment's own when the caller supplied none (step 2).
    fn attributes_of(segment: &Self::Segment) -> Self::Attributes;

    /// Family-specific validation of a newly created segment (step 6:
    /// group-driver-range check for rules; a no-op for groups).
    fn validate_new_segment(segment: &Self::Segment, context: &Self::Context) -> Result<(), Error>;
}

/// Run the segment algebra for one identity's
/// existing `segments` against `change`.
pub fn compute_deltas<F: SegmentFamily>(
    segments: &[F::Segment],
    mut change: ChangeSpec<F::Attributes>,
    now: Instant,
    context: &F::Context,
) -> Result<Vec<SegmentDelta<F::Segment>>, Error> {
    // Step 1: defaulting.
    if change.id.is_none() && change.start.is_none() && change.finish.is_none() {
        change.start = Some(now);
        change.finish = Some(Instant::MAX);
    }

    let mut working: Vec<F::Segment> = segments.to_vec();

    // Step 2: id-targeted amendment (plus the segment-matched-deactivation
    // early return). The matched segment's own removal delta is deferred to
    // step 8, alongside every other removal, so a no-op amendment (the
    // change reproduces the matched segment's range and attributes exactly)
    // can cancel out to zero deltas rather than an ORIGINAL/NEW pair.
    let mut matched_original: Option<F::Segment> = None;
    if let Some(id) = change.id {
        let position = working
            .iter()
            .position(|s| F::id(s) == id)
            .ok_or(Error::SegmentNotFound { id })?;
        let matched = working.remove(position);
        let matched_range = F::range(&matched);

        if change.start.is_none() && change.finish.is_none() {
            return Ok(vec![SegmentDelta { change_type: DeltaType::Original, segment: matched }]);
        }

        change.start.get_or_insert(matched_range.start);
        change.finish.get_or_insert(matched_range.finish);
        if change.attributes.is_none() {
            change.attributes = Some(F::attributes_of(&matched));
        }
        matched_original = Some(matched);
    }

    let change_start = change.start.ok_or_else(|| Error::MissingData { reason: "change has no start instant".to_string() })?;
    let change_finish = change.finish.unwrap_or(Instant::MAX);
    let change_range = DateRange::new(change_start, change_finish)?;

    // Step 4: slice the timeline.
    let mut instants: Vec<Instant> = working.iter().flat_map(|s| [F::range(s).start, F::range(s).finish]).collect();
    instants.push(change_range.start);
    instants.push(change_range.finish);
    instants.sort();
    instants.dedup();

    let mut removed_ids: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
    let mut created: Vec<F::Segment> = Vec::new();

    for window in instants.windows(2) {
        let slice = DateRange { start: window[0], finish: window[1] };
        if slice.start >= slice.finish {
            continue;
        }

        let containing = working.iter().find(|seg| {
            let r = F::range(seg);
            (r.start <= slice.start && slice.start < r.finish) || (r.start < slice.finish && slice.finish <= r.finish)
        });

        let aligns = slice.start == change_range.start || slice.finish == change_range.finish;
        let strictly_inside = change_range.start < slice.start && change_range.finish > slice.finish;

        match containing {
            None => {
                if aligns || strictly_inside {
                    let new_segment = change
                        .attributes
                        .as_ref()
                        .ok_or_else(|| Error::MissingData { reason: "change requires attributes to create a new segment".to_string() })
                        .and_then(|attrs| F::new_from_change(slice, attrs))?;
                    created.push(new_segment);
                }
            }
            Some(seg) => {
                let seg_range = F::range(seg);
                let adjacent = (change_range.start == slice.finish && slice.finish != seg_range.finish)
                    || (change_range.finish == slice.start && slice.start != seg_range.start);

                if aligns || strictly_inside || adjacent {
                    removed_ids.insert(F::id(seg));
                    let new_segment = if adjacent && !aligns && !strictly_inside {
                        F::new_from_existing(seg, slice)
                    } else if let Some(attrs) = change.attributes.as_ref() {
                        F::new_merged(seg, slice, attrs)?
                    } else {
                        F::new_from_existing(seg, slice)
                    };
                    created.push(new_segment);
                }
            }
        }
    }

    // Step 6: family-specific validation of every created segment.
    for segment in &created {
        F::validate_new_segment(segment, context)?;
    }

    // Step 7: merge adjacent created segments with equal attributes.
    created.sort_by_key(|s| F::range(s).start);
    let mut merged: Vec<F::Segment> = Vec::new();
    for segment in created {
        if let Some(last) = merged.last() {
            let last_range = F::range(last);
            let this_range = F::range(&segment);
            if last_range.finish == this_range.start && F::attributes_equal(last, &segment) {
                let combined = DateRange { start: last_range.start, finish: this_range.finish };
                let replacement = F::new_from_existing(last, combined);
                *merged.last_mut().unwrap() = replacement;
                continue;
            }
        }
        merged.push(segment);
    }

    // Step 8: emit, collapsing an exact no-op replacement (same range, same
    // attributes as the segment it would remove) into zero deltas instead
    // of an ORIGINAL/NEW pair (merge idempotence).
    let mut removed_segments: Vec<F::Segment> = working.iter().filter(|seg| removed_ids.contains(&F::id(seg))).cloned().collect();
    removed_segments.extend(matched_original);

    let mut deltas: Vec<SegmentDelta<F::Segment>> = Vec::new();
    let mut final_new: Vec<F::Segment> = Vec::new();
    for segment in merged {
        let seg_range = F::range(&segment);
        match removed_segments.iter().position(|orig| F::range(orig) == seg_range && F::attributes_equal(orig, &segment)) {
            Some(pos) => {
                removed_segments.remove(pos);
            }
            None => final_new.push(segment),
        }
    }

    for segment in removed_segments {
        deltas.push(SegmentDelta { change_type: DeltaType::Original, segment });
    }
    for segment in final_new {
        deltas.push(SegmentDelta { change_type: DeltaType::New, segment });
    }

    Ok(deltas)
}

// --- Rule family -------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RuleAttributes {
    pub drivers: Option<Vec<Arc<InputDriver>>>,
    pub evaluations: Option<Vec<Arc<InputDriver>>>,
    pub outputs: Option<HashMap<String, String>>,
}

pub struct RuleSegmentFamily {
    pub rule_code: String,
}

impl SegmentFamily for RuleSegmentFamily {
    type Segment = DecisionTreeRule;
    type Attributes = RuleAttributes;
    type Context = HashMap<Uuid, ValueGroup>;

    fn id(segment: &Self::Segment) -> Uuid {
        segment.rule_identifier
    }

    fn range(segment: &Self::Segment) -> DateRange {
        segment.range
    }

    fn new_from_change(range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error> {
        let drivers = attrs.drivers.clone().ok_or_else(|| Error::MissingData { reason: "new rule segment requires drivers".to_string() })?;
        let outputs = attrs.outputs.clone().ok_or_else(|| Error::MissingData { reason: "new rule segment requires outputs".to_string() })?;
        Ok(DecisionTreeRule {
            rule_identifier: Uuid::new_v4(),
            rule_code: String::new(),
            drivers,
            evaluations: attrs.evaluations.clone().unwrap_or_default(),
            outputs,
            range,
        })
    }

    fn new_from_existing(existing: &Self::Segment, range: DateRange) -> Self::Segment {
        DecisionTreeRule { rule_identifier: Uuid::new_v4(), range, ..existing.clone() }
    }

    fn new_merged(existing: &Self::Segment, range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error> {
        Ok(DecisionTreeRule {
            rule_identifier: Uuid::new_v4(),
            rule_code: existing.rule_code.clone(),
            drivers: attrs.drivers.clone().unwrap_or_else(|| existing.drivers.clone()),
            evaluations: attrs.evaluations.clone().unwrap_or_else(|| existing.evaluations.clone()),
            outputs: attrs.outputs.clone().unwrap_or_else(|| existing.outputs.clone()),
            range,
        })
    }

    fn attributes_equal(a: &Self::Segment, b: &Self::Segment) -> bool {
        a.rule_code == b.rule_code
            && a.outputs == b.outputs
            && a.drivers.len() == b.drivers.len()
            && a.drivers.iter().zip(&b.drivers).all(|(x, y)| x.cache_key() == y.cache_key())
            && a.evaluations.len() == b.evaluations.len()
            && a.evaluations.iter().zip(&b.evaluations).all(|(x, y)| x.cache_key() == y.cache_key())
    }

    fn attributes_of(segment: &Self::Segment) -> Self::Attributes {
        RuleAttributes {
            drivers: Some(segment.drivers.clone()),
            evaluations: Some(segment.evaluations.clone()),
            outputs: Some(segment.outputs.clone()),
        }
    }

    fn validate_new_segment(segment: &Self::Segment, groups: &Self::Context) -> Result<(), Error> {
        for driver in &segment.drivers {
            if let InputDriver::ValueGroup { id, .. } = driver.as_ref() {
                let group = groups.get(id).ok_or_else(|| Error::InvalidArgument { reason: format!("value group {id} does not exist") })?;
                if !group.range.contains_instant(segment.range.start) || !(group.range.finish >= segment.range.finish) {
                    return Err(Error::GroupDriverOutOfRange {
                        rule_segment: segment.rule_identifier,
                        group: *id,
                        group_range: group.range.to_string(),
                        segment_range: segment.range.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Run the segment algebra for one rule code, stamping `rule_code` onto
/// every freshly created segment (the family's `new_from_change` cannot
/// know it, since it only sees attributes).
pub fn compute_rule_deltas(
    rule_code: &str,
    segments: &[DecisionTreeRule],
    change: ChangeSpec<RuleAttributes>,
    now: Instant,
    groups: &HashMap<Uuid, ValueGroup>,
) -> Result<Vec<SegmentDelta<DecisionTreeRule>>, Error> {
    let mut deltas = compute_deltas::<RuleSegmentFamily>(segments, change, now, groups)?;
    for delta in &mut deltas {
        if delta.change_type == DeltaType::New && delta.segment.rule_code.is_empty() {
            delta.segment.rule_code = rule_code.to_string();
        }
    }
    Ok(deltas)
}

// --- Value-group family -------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GroupAttributes {
    pub values: Option<Vec<String>>,
}

pub struct GroupSegmentFamily;

impl SegmentFamily for GroupSegmentFamily {
    type Segment = ValueGroup;
    type Attributes = GroupAttributes;
    type Context = ();

    fn id(segment: &Self::Segment) -> Uuid {
        segment.id
    }

    fn range(segment: &Self::Segment) -> DateRange {
        segment.range
    }

    fn new_from_change(range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error> {
        let values = attrs.values.clone().ok_or_else(|| Error::MissingData { reason: "new value group requires values".to_string() })?;
        let mut group = ValueGroup::new(String::new(), values)?;
        group.range = range;
        Ok(group)
    }

    fn new_from_existing(existing: &Self::Segment, range: DateRange) -> Self::Segment {
        ValueGroup { id: Uuid::new_v4(), range, ..existing.clone() }
    }

    fn new_merged(existing: &Self::Segment, range: DateRange, attrs: &Self::Attributes) -> Result<Self::Segment, Error> {
        Ok(ValueGroup {
            id: Uuid::new_v4(),
            name: existing.name.clone(),
            values: attrs.values.clone().unwrap_or_else(|| existing.values.clone()),
            range,
            driver_name: existing.driver_name.clone(),
            rule_codes: existing.rule_codes.clone(),
        })
    }

    fn attributes_equal(a: &Self::Segment, b: &Self::Segment) -> bool {
        a.name == b.name && a.values == b.values
    }

    fn attributes_of(segment: &Self::Segment) -> Self::Attributes {
        GroupAttributes { values: Some(segment.values.clone()) }
    }

    fn validate_new_segment(_segment: &Self::Segment, _context: &Self::Context) -> Result<(), Error> {
        Ok(())
    }
}

pub fn compute_group_deltas(
    name: &str,
    segments: &[ValueGroup],
    change: ChangeSpec<GroupAttributes>,
    now: Instant,
) -> Result<Vec<SegmentDelta<ValueGroup>>, Error> {
    let mut deltas = compute_deltas::<GroupSegmentFamily>(segments, change, now, &())?;
    for delta in &mut deltas {
        if delta.change_type == DeltaType::New && delta.segment.name.is_empty() {
            delta.segment.name = name.to_string();
        }
    }
    Ok(deltas)
}

/// A value-group change that links an existing group (unsliced) to a set
/// of rule codes under a driver name: returns one `NONE` delta per matching group, carrying the
/// updated linkage, with no slicing performed.
pub fn link_existing_groups(
    matching: &[ValueGroup],
    driver_name: &str,
    rule_codes: &[String],
) -> Vec<SegmentDelta<ValueGroup>> {
    matching
        .iter()
        .map(|group| SegmentDelta {
            change_type: DeltaType::None,
            segment: ValueGroup {
                driver_name: Some(driver_name.to_string()),
                rule_codes: rule_codes.to_vec(),
                ..group.clone()
            },
        })
        .collect()
}

/// The secondary rewrite pass triggered by a value-group change (spec.md
/// §4.3, "RuleGroupChange pass"): rules referencing one of the replaced
/// groups in `driver_name`'s slot, or named directly in `rule_codes`, have
/// that slot re-sliced across the union of the rule's own segment
/// endpoints and `new_groups`' range endpoints, each resulting slice
/// pointing at whichever new group covers it. Adjacent created slices with
/// equal attributes are merged exactly as in `compute_deltas` step 7.
pub fn rewrite_rules_for_group_change(
    rule_set: &crate::ruleset::RuleSet,
    driver_name: &str,
    original_groups: &[ValueGroup],
    new_groups: &[ValueGroup],
    rule_codes: &[String],
    groups_context: &HashMap<Uuid, ValueGroup>,
    cache: &mut DriverCache,
) -> Result<Vec<SegmentDelta<DecisionTreeRule>>, Error> {
    let driver_index = rule_set
        .driver_names()
        .iter()
        .position(|n| n == driver_name)
        .ok_or_else(|| Error::InvalidArgument { reason: format!("unknown driver name {driver_name}") })?;

    let original_ids: HashSet<Uuid> = original_groups.iter().map(|g| g.id).collect();

    let mut affected_codes: HashSet<String> = rule_codes.iter().cloned().collect();
    for rule in rule_set.rules() {
        if let Some(InputDriver::ValueGroup { id, .. }) = rule.drivers.get(driver_index).map(|d| d.as_ref()) {
            if original_ids.contains(id) {
                affected_codes.insert(rule.rule_code.clone());
            }
        }
    }

    let mut deltas = Vec::new();
    for code in affected_codes {
        let mut segments: Vec<&DecisionTreeRule> = rule_set.rule_segments(&code);
        segments.sort_by_key(|r| r.range.start);

        let mut instants: Vec<Instant> = segments.iter().flat_map(|r| [r.range.start, r.range.finish]).collect();
        instants.extend(new_groups.iter().flat_map(|g| [g.range.start, g.range.finish]));
        instants.sort();
        instants.dedup();

        let mut removed: HashSet<Uuid> = HashSet::new();
        let mut created: Vec<DecisionTreeRule> = Vec::new();

        for window in instants.windows(2) {
            let slice = DateRange { start: window[0], finish: window[1] };
            if slice.start >= slice.finish {
                continue;
            }
            let Some(seg) = segments.iter().find(|s| s.range.start <= slice.start && slice.finish <= s.range.finish) else {
                trace!(rule_code = %code, slice = %slice, "group rewrite: no covering rule segment, skipping slice");
                continue;
            };
            let Some(group) = new_groups.iter().find(|g| g.range.start <= slice.start && slice.finish <= g.range.finish) else {
                trace!(rule_code = %code, slice = %slice, "group rewrite: no covering replacement group, skipping slice");
                continue;
            };

            removed.insert(seg.rule_identifier);
            let mut drivers = seg.drivers.clone();
            drivers[driver_index] = group.build_driver(cache, groups_context)?;
            trace!(rule_code = %code, slice = %slice, group = %group.id, "group rewrite: re-sliced rule segment");
            created.push(DecisionTreeRule {
                rule_identifier: Uuid::new_v4(),
                rule_code: code.clone(),
                drivers,
                evaluations: seg.evaluations.clone(),
                outputs: seg.outputs.clone(),
                range: slice,
            });
        }

        created.sort_by_key(|s| s.range.start);
        let mut merged: Vec<DecisionTreeRule> = Vec::new();
        for segment in created {
            if let Some(last) = merged.last() {
                if last.range.finish == segment.range.start && RuleSegmentFamily::attributes_equal(last, &segment) {
                    let combined = DateRange { start: last.range.start, finish: segment.range.finish };
                    let replacement = RuleSegmentFamily::new_from_existing(last, combined);
                    *merged.last_mut().unwrap() = replacement;
                    continue;
                }
            }
            merged.push(segment);
        }

        for seg in &segments {
            if removed.contains(&seg.rule_identifier) {
                deltas.push(SegmentDelta { change_type: DeltaType::Original, segment: (*seg).clone() });
            }
        }
        for segment in merged {
            deltas.push(SegmentDelta { change_type: DeltaType::New, segment });
        }
    }

    Ok(deltas)
}

/// Fail if a solitary group deletion would leave a dangling reference.
pub fn check_group_not_referenced(
    group: &ValueGroup,
    rule_set: &crate::ruleset::RuleSet,
) -> Result<(), Error> {
    if let Some(rule_code) = rule_set.referencing_rule_code(group.id) {
        return Err(Error::GroupStillActive { group_name: group.name.clone(), rule_code: rule_code.to_string() });
    }
    Ok(())
}
