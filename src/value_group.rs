//! Value groups: named, time-bounded sets of driver values usable as a
//! single matcher.
//!
//! A group's `values` are plain driver-value strings, except a value of the
//! form `VG:<uuid>` which references another group by id, recursively.
//! Flattening resolves those references into an actual member driver list,
//! deduplicating by identity and rejecting cycles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::driver::{self, DriverCache, InputDriver, VALUE_GROUP_PREFIX};
use crate::time::DateRange;
use crate::Error;

/// A named, time-bounded set of driver values.
///
/// Multiple `ValueGroup`s may share a `name` but have disjoint `range`s;
/// their `id`s are always unique. `driver_name`/`rule_codes` record the
/// linkage used by the `RuleGroupChange` pass when a rule's
/// driver slot is rewritten to point at this group.
#[derive(Debug, Clone)]
pub struct ValueGroup {
    pub id: Uuid,
    pub name: String,
    pub values: Vec<String>,
    pub range: DateRange,
    pub driver_name: Option<String>,
    pub rule_codes: Vec<String>,
}

impl ValueGroup {
    /// Construct a group, defaulting `range` to `[EPOCH, MAX)`.
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Result<Self, Error> {
        if values.is_empty() {
            return Err(Error::MissingData { reason: "value group requires at least one value".to_string() });
        }
        Ok(ValueGroup {
            id: Uuid::new_v4(),
            name: name.into(),
            values,
            range: DateRange::UNBOUNDED,
            driver_name: None,
            rule_codes: Vec::new(),
        })
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Build this group's `InputDriver::ValueGroup`, resolving any `VG:<id>`
    /// member references against `groups` and interning every member (and
    /// the group driver itself) through `cache`.
    pub fn build_driver(&self, cache: &mut DriverCache, groups: &HashMap<Uuid, ValueGroup>) -> Result<Arc<InputDriver>, Error> {
        let mut visited = HashSet::new();
        visited.insert(self.id);
        let members = flatten_members(&self.values, cache, groups, &mut visited)?;
        Ok(driver::value_group_driver(cache, self.id, members))
    }
}

fn flatten_members(
    values: &[String],
    cache: &mut DriverCache,
    groups: &HashMap<Uuid, ValueGroup>,
    visited: &mut HashSet<Uuid>,
) -> Result<Vec<Arc<InputDriver>>, Error> {
    let mut members = Vec::with_capacity(values.len());
    let mut seen_keys = HashSet::new();

    for value in values {
        let driver = if let Some(id_str) = value.strip_prefix(VALUE_GROUP_PREFIX) {
            let id = Uuid::parse_str(id_str)
                .map_err(|_| Error::InvalidArgument { reason: format!("malformed group reference {value}") })?;
            if !visited.insert(id) {
                return Err(Error::InvalidArgument { reason: format!("cyclic value group reference through {id}") });
            }
            let nested = groups
                .get(&id)
                .ok_or_else(|| Error::InvalidArgument { reason: format!("value group {id} does not exist") })?;
            let nested_members = flatten_members(&nested.values, cache, groups, visited)?;
            driver::value_group_driver(cache, nested.id, nested_members)
        } else {
            driver::string_driver(cache, value.clone())
        };

        // Deduplicate sub-drivers by cache identity.
        if seen_keys.insert(driver.cache_key()) {
            members.push(driver);
        }
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_plain_values_into_string_drivers() {
        let group = ValueGroup::new("majors", vec!["US".to_string(), "UK".to_string()]).unwrap();
        let mut cache = DriverCache::new();
        let groups = HashMap::new();
        let driver = group.build_driver(&mut cache, &groups).unwrap();
        assert!(driver.evaluate("US").unwrap());
        assert!(!driver.evaluate("DE").unwrap());
    }

    #[test]
    fn flattens_nested_group_references() {
        let inner = ValueGroup::new("g7", vec!["US".to_string(), "JP".to_string()]).unwrap();
        let mut groups = HashMap::new();
        let inner_id = inner.id;
        groups.insert(inner.id, inner);

        let outer = ValueGroup::new("developed", vec![format!("{VALUE_GROUP_PREFIX}{inner_id}"), "UK".to_string()]).unwrap();
        let mut cache = DriverCache::new();
        let driver = outer.build_driver(&mut cache, &groups).unwrap();
        assert!(driver.evaluate("JP").unwrap());
        assert!(driver.evaluate("UK").unwrap());
        assert!(!driver.evaluate("DE").unwrap());
    }

    #[test]
    fn rejects_self_referential_cycle() {
        let mut group = ValueGroup::new("loop", vec!["placeholder".to_string()]).unwrap();
        let self_ref = format!("{VALUE_GROUP_PREFIX}{}", group.id);
        group.values = vec![self_ref];
        let mut groups = HashMap::new();
        let id = group.id;
        groups.insert(id, group.clone());

        let mut cache = DriverCache::new();
        let err = group.build_driver(&mut cache, &groups).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
