//! Error kinds, one per failure mode the engine can raise.
//!
//! Propagation policy: segment-algebra/build errors abort the
//! `Change`/`RuleSet` construction they occurred in; applying an
//! already-validated `Change` is fatal-on-error (the candidate snapshot is
//! discarded); evaluation errors are returned to the caller, never
//! swallowed.

use uuid::Uuid;

use crate::DriverType;

/// Errors raised by the driver model, rule-set model, segment algebra,
/// change model, and tree evaluation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("missing data: {reason}")]
    MissingData { reason: String },

    #[error("segment not found: id {id}")]
    SegmentNotFound { id: Uuid },

    #[error(
        "group driver out of range: rule segment {rule_segment} references group {group} \
         whose range {group_range} does not cover the new segment range {segment_range}"
    )]
    GroupDriverOutOfRange { rule_segment: Uuid, group: Uuid, group_range: String, segment_range: String },

    #[error("group still active: {group_name} is referenced by rule code {rule_code}")]
    GroupStillActive { group_name: String, rule_code: String },

    #[error("overlapping change: rule code {rule_code} received deltas from more than one builder pass")]
    OverlappingChange { rule_code: String },

    #[error(
        "combined change conflict: rule code {rule_code} touched both by a direct rule change \
         and by a value-group-driven rewrite"
    )]
    CombinedChangeConflict { rule_code: String },

    #[error("input arity: expected {expected} inputs, got {actual}")]
    InputArity { expected: usize, actual: usize },

    #[error("missing instant: evaluation against a dated/sliced tree requires an instant")]
    MissingInstant,

    #[error("parse error: could not parse {input:?} for driver type {driver_type:?}")]
    ParseError { input: String, driver_type: DriverType },
}
