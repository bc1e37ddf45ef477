//! Change model (component C4): committed edits to a rule set, and the
//! audit trail that makes them reversible.
//!
//! A [`Change`] is the output of the segment algebra: a set of rule
//! and value-group deltas, each tagged with a [`DeltaType`] describing
//! whether it removes a segment that existed before the edit (`Original`),
//! introduces a segment that exists only after it (`New`), or passes a
//! segment through unmodified (`None`, carried along so a [`RuleSet::apply`](crate::RuleSet::apply)
//! snapshot is complete without having to re-fetch the untouched segments).

use uuid::Uuid;

use crate::rule::DecisionTreeRule;
use crate::time::{DateRange, Instant};
use crate::value_group::ValueGroup;
use crate::Error;

/// How a delta relates to the pre-change rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaType {
    /// A segment that existed before the change and is removed by it.
    Original,
    /// A segment that exists only after the change.
    New,
    /// A segment carried through unmodified.
    None,
}

#[derive(Debug, Clone)]
pub struct RuleDelta {
    pub change_type: DeltaType,
    pub rule: DecisionTreeRule,
}

#[derive(Debug, Clone)]
pub struct ValueGroupDelta {
    pub change_type: DeltaType,
    pub group: ValueGroup,
}

/// Audit record: who initiated a change and, if applicable, who approved
/// it. A `Change` carries one of these rather than the other way around,
/// matching the data model's `Change = (..., audit, ...)` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audit {
    pub initiator: String,
    pub initiator_time: Instant,
    pub authoriser: Option<String>,
    pub authoriser_time: Option<Instant>,
}

impl Audit {
    /// An audit record with only the initiating party recorded.
    pub fn new(initiator: impl Into<String>, initiator_time: Instant) -> Self {
        Audit { initiator: initiator.into(), initiator_time, authoriser: None, authoriser_time: None }
    }

    /// Record the approving party, returning the completed audit.
    pub fn authorised_by(mut self, authoriser: impl Into<String>, authoriser_time: Instant) -> Self {
        self.authoriser = Some(authoriser.into());
        self.authoriser_time = Some(authoriser_time);
        self
    }
}

/// A committed, self-consistent set of deltas produced by the segment
/// algebra, ready to be applied to a [`crate::RuleSet`].
#[derive(Debug, Clone)]
pub struct Change {
    pub id: Uuid,
    pub rule_set_name: String,
    /// When this change should take visible effect, if different from the
    /// moment it is applied (callers that schedule changes ahead of time
    /// populate this; `apply` itself is unconditional and does not gate on
    /// it — scheduling is a caller concern, per spec.md §1's non-goals).
    pub activation_time: Option<Instant>,
    pub change_range: DateRange,
    pub audit: Audit,
    pub rule_changes: Vec<RuleDelta>,
    pub value_group_changes: Vec<ValueGroupDelta>,
}

impl Change {
    pub fn new(
        rule_set_name: impl Into<String>,
        change_range: DateRange,
        audit: Audit,
        rule_changes: Vec<RuleDelta>,
        value_group_changes: Vec<ValueGroupDelta>,
    ) -> Self {
        Change {
            id: Uuid::new_v4(),
            rule_set_name: rule_set_name.into(),
            activation_time: None,
            change_range,
            audit,
            rule_changes,
            value_group_changes,
        }
    }

    /// True if any two deltas in this change claim the same rule code with
    /// overlapping effect. The segment
    /// algebra is expected to have already merged per-rule-code deltas into
    /// a single consistent set; this is a last-line sanity check before the
    /// change is handed to [`crate::RuleSet::apply`].
    pub fn validate(&self) -> Result<(), Error> {
        use std::collections::HashMap;

        let mut by_code: HashMap<&str, Vec<&RuleDelta>> = HashMap::new();
        for delta in &self.rule_changes {
            by_code.entry(&delta.rule.rule_code).or_default().push(delta);
        }
        for (code, deltas) in &by_code {
            let new_segments: Vec<_> = deltas.iter().filter(|d| d.change_type == DeltaType::New).collect();
            for (i, a) in new_segments.iter().enumerate() {
                for b in new_segments.iter().skip(i + 1) {
                    if a.rule.range.overlaps(&b.rule.range) {
                        return Err(Error::OverlappingChange { rule_code: (*code).to_string() });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A named collection of changes against one rule set, grouped for
/// presentation/approval purposes (e.g. "everything submitted in this
/// review"). Applying a `ChangeSet` is simply applying each of its
/// `changes` in order; there is no additional atomicity across members.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub id: Uuid,
    pub name: String,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(name: impl Into<String>, changes: Vec<Change>) -> Self {
        ChangeSet { id: Uuid::new_v4(), name: name.into(), changes }
    }
}

/// Build the inverse of a committed change: every `New` delta becomes
/// `Original` (it is being removed) and every `Original` delta becomes
/// `New` (it is being restored). `None` deltas pass through unchanged,
/// since they were untouched by the original change. The resulting
/// `Change` carries a fresh id and the caller-supplied `audit` (spec.md
/// §4.4: "fresh id, caller-supplied audit").
pub fn rollback(change: &Change, audit: Audit) -> Change {
    let rule_changes = change.rule_changes.iter().map(|d| RuleDelta { change_type: invert(d.change_type), rule: d.rule.clone() }).collect();
    let value_group_changes = change
        .value_group_changes
        .iter()
        .map(|d| ValueGroupDelta { change_type: invert(d.change_type), group: d.group.clone() })
        .collect();
    Change {
        id: Uuid::new_v4(),
        rule_set_name: change.rule_set_name.clone(),
        activation_time: None,
        change_range: change.change_range,
        audit,
        rule_changes,
        value_group_changes,
    }
}

fn invert(change_type: DeltaType) -> DeltaType {
    match change_type {
        DeltaType::Original => DeltaType::New,
        DeltaType::New => DeltaType::Original,
        DeltaType::None => DeltaType::None,
    }
}

/// Builder that assembles a [`Change`] from individually-proposed deltas,
/// rejecting a rule code touched by more than one builder pass — e.g. a
/// direct rule edit landing on the same rule code a value-group rewrite
/// also touches.
pub struct ChangeBuilder {
    rule_set_name: String,
    change_range: DateRange,
    activation_time: Option<Instant>,
    audit: Option<Audit>,
    rule_changes: Vec<RuleDelta>,
    value_group_changes: Vec<ValueGroupDelta>,
    touched_rule_codes: std::collections::HashSet<String>,
    group_touched_codes: std::collections::HashSet<String>,
}

impl ChangeBuilder {
    pub fn new(rule_set_name: impl Into<String>, change_range: DateRange) -> Self {
        ChangeBuilder {
            rule_set_name: rule_set_name.into(),
            change_range,
            activation_time: None,
            audit: None,
            rule_changes: Vec::new(),
            value_group_changes: Vec::new(),
            touched_rule_codes: std::collections::HashSet::new(),
            group_touched_codes: std::collections::HashSet::new(),
        }
    }

    pub fn activation_time(&mut self, instant: Instant) -> &mut Self {
        self.activation_time = Some(instant);
        self
    }

    pub fn audit(&mut self, audit: Audit) -> &mut Self {
        self.audit = Some(audit);
        self
    }

    pub fn rule_change(&mut self, delta: RuleDelta) -> Result<&mut Self, Error> {
        if self.group_touched_codes.contains(&delta.rule.rule_code) {
            return Err(Error::CombinedChangeConflict { rule_code: delta.rule.rule_code.clone() });
        }
        self.touched_rule_codes.insert(delta.rule.rule_code.clone());
        self.rule_changes.push(delta);
        Ok(self)
    }

    /// Record a rule delta originating from a value-group rewrite pass,
    /// distinct from [`ChangeBuilder::rule_change`] so the two sources
    /// landing on the same rule code can be detected as a conflict.
    pub fn group_driven_rule_change(&mut self, delta: RuleDelta) -> Result<&mut Self, Error> {
        if self.touched_rule_codes.contains(&delta.rule.rule_code) {
            return Err(Error::CombinedChangeConflict { rule_code: delta.rule.rule_code.clone() });
        }
        self.group_touched_codes.insert(delta.rule.rule_code.clone());
        self.rule_changes.push(delta);
        Ok(self)
    }

    pub fn value_group_change(&mut self, delta: ValueGroupDelta) -> &mut Self {
        self.value_group_changes.push(delta);
        self
    }

    pub fn build(self) -> Result<Change, Error> {
        let audit = self.audit.ok_or_else(|| Error::MissingData { reason: "change requires an audit record".to_string() })?;
        let change = Change {
            id: Uuid::new_v4(),
            rule_set_name: self.rule_set_name,
            activation_time: self.activation_time,
            change_range: self.change_range,
            audit,
            rule_changes: self.rule_changes,
            value_group_changes: self.value_group_changes,
        };
        change.validate()?;
        Ok(change)
    }
}
