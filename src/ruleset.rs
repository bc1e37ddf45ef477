//! Rule-set model (component C2): the container of rules, driver names,
//! value groups, and the driver cache they all share.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::change::Change;
use crate::driver::{self, DriverCache, DriverType, InputDriver};
use crate::rule::{DecisionTreeRule, WeightedDriver};
use crate::time::DateRange;
use crate::value_group::ValueGroup;
use crate::Error;

/// The complete, effectively-immutable collection of rules, driver names,
/// value groups, and driver cache over which evaluation operates.
///
/// `RuleSet`s are created by [`RuleSetBuilder`] and are then immutable
/// except via [`RuleSet::apply`], which returns a *new* `RuleSet` rather than mutating in place.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub(crate) rules: HashMap<Uuid, DecisionTreeRule>,
    pub(crate) driver_names: Vec<String>,
    pub(crate) evaluation_names: Vec<String>,
    pub(crate) driver_cache: DriverCache,
    pub(crate) value_groups: HashMap<Uuid, ValueGroup>,
}

impl RuleSet {
    pub fn driver_names(&self) -> &[String] {
        &self.driver_names
    }

    pub fn weighted_driver_names(&self) -> Vec<WeightedDriver> {
        crate::rule::weighted_drivers(&self.driver_names)
    }

    pub fn rules(&self) -> impl Iterator<Item = &DecisionTreeRule> {
        self.rules.values()
    }

    pub fn rule(&self, id: Uuid) -> Option<&DecisionTreeRule> {
        self.rules.get(&id)
    }

    /// All segments sharing `rule_code`, in no particular order.
    pub fn rule_segments(&self, rule_code: &str) -> Vec<&DecisionTreeRule> {
        self.rules.values().filter(|r| r.rule_code == rule_code).collect()
    }

    pub fn value_groups(&self) -> impl Iterator<Item = &ValueGroup> {
        self.value_groups.values()
    }

    pub fn value_group(&self, id: Uuid) -> Option<&ValueGroup> {
        self.value_groups.get(&id)
    }

    /// All groups sharing `name`, in no particular order.
    pub fn value_group_segments(&self, name: &str) -> Vec<&ValueGroup> {
        self.value_groups.values().filter(|g| g.name == name).collect()
    }

    pub fn driver_cache(&self) -> &DriverCache {
        &self.driver_cache
    }

    /// True if any rule segment references `group_id` in one of its driver
    /// slots (used by the `GroupStillActive` check).
    pub fn group_is_referenced(&self, group_id: Uuid) -> bool {
        self.referencing_rule_code(group_id).is_some()
    }

    /// The rule code of a segment that references `group_id` in one of its
    /// driver slots, if any (used to name the offender in
    /// `Error::GroupStillActive`).
    pub fn referencing_rule_code(&self, group_id: Uuid) -> Option<&str> {
        self.rules
            .values()
            .find(|rule| rule.drivers.iter().any(|d| matches!(d.as_ref(), InputDriver::ValueGroup { id, .. } if *id == group_id)))
            .map(|rule| rule.rule_code.as_str())
    }

    /// Apply a committed [`Change`] to this rule set, returning a *new*
    /// rule set. Group deltas are applied first,
    /// then rule deltas, both normalized through a freshly cloned driver
    /// cache for the new snapshot.
    pub fn apply(&self, change: &Change) -> Result<RuleSet, Error> {
        let mut groups = self.value_groups.clone();
        for delta in &change.value_group_changes {
            match delta.change_type {
                crate::change::DeltaType::Original => {
                    groups.remove(&delta.group.id);
                }
                crate::change::DeltaType::New => {
                    groups.insert(delta.group.id, delta.group.clone());
                }
                crate::change::DeltaType::None => {
                    groups.insert(delta.group.id, delta.group.clone());
                }
            }
        }

        let mut rules = self.rules.clone();
        for delta in &change.rule_changes {
            match delta.change_type {
                crate::change::DeltaType::Original => {
                    rules.remove(&delta.rule.rule_identifier);
                }
                crate::change::DeltaType::New | crate::change::DeltaType::None => {
                    rules.insert(delta.rule.rule_identifier, delta.rule.clone());
                }
            }
        }

        let mut cache = DriverCache::new();
        let mut normalized_rules = HashMap::with_capacity(rules.len());
        for (id, rule) in rules {
            let drivers = normalize_drivers(&rule.drivers, &mut cache, &groups)?;
            let evaluations = normalize_drivers(&rule.evaluations, &mut cache, &groups)?;
            normalized_rules.insert(id, DecisionTreeRule { drivers, evaluations, ..rule });
        }

        for group in groups.values() {
            // Re-intern the group driver itself so the new cache contains it
            // even if no rule currently references it.
            let _ = group.build_driver(&mut cache, &groups)?;
        }

        debug!(change_id = %change.id, rule_set = %self.name, "applied change, publishing new snapshot");

        Ok(RuleSet {
            name: self.name.clone(),
            rules: normalized_rules,
            driver_names: self.driver_names.clone(),
            evaluation_names: self.evaluation_names.clone(),
            driver_cache: cache,
            value_groups: groups,
        })
    }
}

fn normalize_drivers(
    drivers: &[Arc<InputDriver>],
    cache: &mut DriverCache,
    groups: &HashMap<Uuid, ValueGroup>,
) -> Result<Vec<Arc<InputDriver>>, Error> {
    drivers
        .iter()
        .map(|d| match d.as_ref() {
            InputDriver::ValueGroup { id, .. } => {
                let group = groups
                    .get(id)
                    .ok_or_else(|| Error::InvalidArgument { reason: format!("value group {id} does not exist") })?;
                group.build_driver(cache, groups)
            }
            other => Ok(cache.put(clone_driver(other))),
        })
        .collect()
}

fn clone_driver(driver: &InputDriver) -> InputDriver {
    match driver {
        InputDriver::String { value } => InputDriver::String { value: value.clone() },
        InputDriver::Regex { value, compiled } => InputDriver::Regex { value: value.clone(), compiled: compiled.clone() },
        InputDriver::IntegerRange { value, lo, hi } => InputDriver::IntegerRange { value: value.clone(), lo: *lo, hi: *hi },
        InputDriver::DateRange { value, lo, hi } => InputDriver::DateRange { value: value.clone(), lo: *lo, hi: *hi },
        InputDriver::ValueGroup { value, id, members } => {
            InputDriver::ValueGroup { value: value.clone(), id: *id, members: members.clone() }
        }
    }
}

/// Direct-constructor builder for [`RuleSet`].
pub struct RuleSetBuilder {
    name: String,
    driver_names: Vec<String>,
    evaluation_names: Vec<String>,
    cache: DriverCache,
    value_groups: HashMap<Uuid, ValueGroup>,
    rules: Vec<DecisionTreeRule>,
}

impl RuleSetBuilder {
    pub fn new(name: impl Into<String>, driver_names: Vec<String>, evaluation_names: Vec<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument { reason: "rule set name must not be empty".to_string() });
        }
        if driver_names.is_empty() {
            return Err(Error::InvalidArgument { reason: "rule set requires at least one driver name".to_string() });
        }
        if driver_names.len() > crate::rule::MAX_DRIVERS {
            return Err(Error::InvalidArgument {
                reason: format!("rule set declares {} driver names, maximum is {}", driver_names.len(), crate::rule::MAX_DRIVERS),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for n in &driver_names {
            if !seen.insert(n.clone()) {
                return Err(Error::InvalidArgument { reason: format!("duplicate driver name {n}") });
            }
        }
        Ok(RuleSetBuilder {
            name,
            driver_names,
            evaluation_names,
            cache: DriverCache::new(),
            value_groups: HashMap::new(),
            rules: Vec::new(),
        })
    }

    pub fn add_value_group(&mut self, group: ValueGroup) -> &mut Self {
        self.value_groups.insert(group.id, group);
        self
    }

    /// The driver cache this builder interns through; expose it so callers
    /// can construct regex/integer-range/date-range drivers with the free
    /// functions in [`crate::driver`] before handing them to
    /// [`RuleSetBuilder::add_rule_with_drivers`].
    pub fn driver_cache_mut(&mut self) -> &mut DriverCache {
        &mut self.cache
    }

    /// Queue a rule built from plain string driver values. `driver_values`
    /// must have one entry per declared driver name, in the same order;
    /// `"*"` becomes a wildcard, `VG:<uuid>` references an already-added
    /// value group, everything else becomes a plain string driver. Use
    /// [`RuleSetBuilder::add_rule_with_drivers`] to supply pre-built
    /// drivers (regex/integer-range/date-range) or evaluations directly.
    pub fn add_rule(
        &mut self,
        rule_code: impl Into<String>,
        driver_values: Vec<String>,
        outputs: HashMap<String, String>,
        range: DateRange,
    ) -> Result<&mut Self, Error> {
        let drivers = driver_values.iter().map(|v| self.resolve_driver_value(v)).collect::<Result<Vec<_>, _>>()?;
        self.add_rule_with_drivers(rule_code, drivers, Vec::new(), outputs, range)
    }

    /// Queue a rule from pre-built driver/evaluation instances, for drivers
    /// [`RuleSetBuilder::add_rule`]'s string shorthand cannot express
    /// (regex, integer-range, date-range) or rules that carry post-match
    /// evaluations. Callers build `drivers`/`evaluations` through
    /// [`RuleSetBuilder::driver_cache_mut`] so they share this builder's
    /// cache.
    pub fn add_rule_with_drivers(
        &mut self,
        rule_code: impl Into<String>,
        drivers: Vec<Arc<InputDriver>>,
        evaluations: Vec<Arc<InputDriver>>,
        outputs: HashMap<String, String>,
        range: DateRange,
    ) -> Result<&mut Self, Error> {
        if drivers.len() != self.driver_names.len() {
            return Err(Error::InvalidArgument {
                reason: format!("rule has {} drivers, rule set declares {}", drivers.len(), self.driver_names.len()),
            });
        }
        if outputs.is_empty() {
            return Err(Error::MissingData { reason: "rule requires at least one output".to_string() });
        }
        self.rules.push(DecisionTreeRule { rule_identifier: Uuid::new_v4(), rule_code: rule_code.into(), drivers, evaluations, outputs, range });
        Ok(self)
    }

    pub fn build(mut self) -> Result<RuleSet, Error> {
        for group in self.value_groups.values() {
            let _ = group.build_driver(&mut self.cache, &self.value_groups)?;
        }

        let rules: HashMap<Uuid, DecisionTreeRule> = self.rules.into_iter().map(|r| (r.rule_identifier, r)).collect();

        debug!(rule_set = %self.name, rule_count = rules.len(), driver_count = self.driver_names.len(), "built rule set");

        Ok(RuleSet {
            name: self.name,
            rules,
            driver_names: self.driver_names,
            evaluation_names: self.evaluation_names,
            driver_cache: self.cache,
            value_groups: self.value_groups,
        })
    }

    fn resolve_driver_value(&mut self, value: &str) -> Result<Arc<InputDriver>, Error> {
        if let Some(id_str) = value.strip_prefix(driver::VALUE_GROUP_PREFIX) {
            let id = Uuid::parse_str(id_str)
                .map_err(|_| Error::InvalidArgument { reason: format!("malformed group reference {value}") })?;
            let group = self
                .value_groups
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::InvalidArgument { reason: format!("value group {id} does not exist") })?;
            group.build_driver(&mut self.cache, &self.value_groups)
        } else {
            Ok(driver::string_driver(&mut self.cache, value))
        }
    }
}

/// Helper used by the driver cache contract's `find_by_type`,
/// re-exported here for callers who only have a `RuleSet` in hand.
pub fn drivers_of_type(rule_set: &RuleSet, driver_type: DriverType) -> Vec<Arc<InputDriver>> {
    rule_set.driver_cache.find_by_type(driver_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_rule_with_wrong_driver_arity() {
        let mut builder = RuleSetBuilder::new("rs", names(&["a", "b"]), vec![]).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("price".to_string(), "1".to_string());
        let err = builder.add_rule("R1", vec!["x".to_string()], outputs, DateRange::UNBOUNDED).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn rejects_rule_with_no_outputs() {
        let mut builder = RuleSetBuilder::new("rs", names(&["a"]), vec![]).unwrap();
        let err = builder.add_rule("R1", vec!["x".to_string()], HashMap::new(), DateRange::UNBOUNDED).unwrap_err();
        assert!(matches!(err, Error::MissingData { .. }));
    }

    #[test]
    fn builds_rule_set_with_interned_drivers() {
        let mut builder = RuleSetBuilder::new("rs", names(&["a", "b"]), vec![]).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("price".to_string(), "1".to_string());
        builder.add_rule("R1", vec!["x".to_string(), "*".to_string()], outputs.clone(), DateRange::UNBOUNDED).unwrap();
        builder.add_rule("R2", vec!["x".to_string(), "y".to_string()], outputs, DateRange::UNBOUNDED).unwrap();
        let rule_set = builder.build().unwrap();
        assert_eq!(rule_set.rules().count(), 2);

        // Invariant: every driver slot shares identity with the cache entry.
        let xs: Vec<_> = rule_set.rules().flat_map(|r| r.drivers.iter()).filter(|d| d.value() == "x").collect();
        assert!(xs.windows(2).all(|w| Arc::ptr_eq(w[0], w[1])));
    }
}
