//! `chronotree`: a time-aware decision-tree rule engine.
//!
//! Inputs are matched against a set of rules through weighted driver slots
//! (string, regex, integer range, date range, or value group); rules carry
//! their own validity window, and a segment algebra ([`segment`]) governs
//! how edits to one rule's temporal window affect its neighbors and the
//! value groups it references. A [`RuleSetHandle`] publishes immutable
//! [`RuleSet`] snapshots for lock-free concurrent reads.
//!
//! ```text
//!   RuleSetBuilder ──build()──► RuleSet ──apply(Change)──► RuleSet (new snapshot)
//!                                   │
//!                                   ├── DriverCache (interned InputDrivers)
//!                                   ├── rules: HashMap<Uuid, DecisionTreeRule>
//!                                   └── value_groups: HashMap<Uuid, ValueGroup>
//!
//!   RuleSet ──build_tree(flavor)──► DecisionTree ──evaluate(inputs, instant?)──► Match
//! ```

pub mod change;
pub mod driver;
pub mod error;
pub mod handle;
pub mod rule;
pub mod ruleset;
pub mod segment;
pub mod time;
pub mod tree;
pub mod value_group;

pub use change::{Audit, Change, ChangeBuilder, ChangeSet, DeltaType, RuleDelta, ValueGroupDelta};
pub use driver::{DriverCache, DriverType, InputDriver};
pub use error::Error;
pub use handle::RuleSetHandle;
pub use rule::{DecisionTreeRule, WeightedDriver, MAX_DRIVERS};
pub use ruleset::{RuleSet, RuleSetBuilder};
pub use time::{DateRange, Instant};
pub use tree::{DecisionTree, EvalOptions, Match, TreeFlavor};
pub use value_group::ValueGroup;
