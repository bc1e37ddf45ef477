//! Rule model (component C2): a single temporal segment of a decision-tree
//! rule, and the weighted ordering of driver slots.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::driver::InputDriver;
use crate::time::DateRange;
use crate::Error;

/// Maximum number of driver slots a rule set may declare.
pub const MAX_DRIVERS: usize = 31;

/// A driver-name slot with its positional weight.
///
/// Drivers in a rule set are ordered by decreasing weight: the first name
/// carries the highest weight, `2^(N-1)` for an `N`-driver rule set, down to
/// `2^0` for the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedDriver {
    pub name: String,
    pub weight: u32,
}

/// Compute the weighted, descending-weight driver-name list for a rule set
/// with `driver_names` given in already-descending order.
pub fn weighted_drivers(driver_names: &[String]) -> Vec<WeightedDriver> {
    let n = driver_names.len();
    driver_names
        .iter()
        .enumerate()
        .map(|(i, name)| WeightedDriver { name: name.clone(), weight: 1u32 << (n - 1 - i) })
        .collect()
}

/// One temporal segment of a logical rule.
///
/// `rule_identifier` is unique per segment; `rule_code` is the stable
/// logical identity shared across a rule's temporal segments.
#[derive(Debug, Clone)]
pub struct DecisionTreeRule {
    pub rule_identifier: Uuid,
    pub rule_code: String,
    pub drivers: Vec<Arc<InputDriver>>,
    pub evaluations: Vec<Arc<InputDriver>>,
    pub outputs: HashMap<String, String>,
    pub range: DateRange,
}

impl DecisionTreeRule {
    /// Rule weight: treating driver slots in weighted (descending) order,
    /// set a bit if that driver is non-wildcard. The highest-weight slot is
    /// the MSB. Fully specific = `2^N - 1`; all wildcards = 0.
    pub fn weight(&self) -> u64 {
        let n = self.drivers.len();
        let mut weight: u64 = 0;
        for (i, driver) in self.drivers.iter().enumerate() {
            if !driver.is_wildcard() {
                weight |= 1u64 << (n - 1 - i);
            }
        }
        weight
    }

    /// True if outputs satisfy every post-match evaluation predicate.
    pub fn evaluations_pass(&self, outputs: &HashMap<String, String>) -> Result<bool, Error> {
        for evaluation in &self.evaluations {
            let mut any_match = false;
            for (_, value) in outputs.iter() {
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
}
