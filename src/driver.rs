//! Driver model (component C1): polymorphic input matchers, and the cache
//! that interns them so identical drivers share one object.
//!
//! Five kinds, tagged-union style (avoid an inheritance hierarchy, use an
//! enum with match dispatch). The wildcard token `"*"` is not a sixth kind:
//! it is a property of the *value*, recognized regardless of declared kind.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::time::{DateRange, Instant};
use crate::Error;

/// Wildcard token: matches any input, regardless of a driver's declared kind.
pub const WILDCARD: &str = "*";

/// External prefix constants used to build cache keys.
pub const VALUE_GROUP_PREFIX: &str = "VG:";
pub const REGEX_PREFIX: &str = "RX:";
pub const DATE_RANGE_PREFIX: &str = "DR:";
pub const INTEGER_RANGE_PREFIX: &str = "IR:";

/// The five driver kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverType {
    String,
    Regex,
    ValueGroup,
    IntegerRange,
    DateRange,
}

/// A single input matcher.
///
/// Equality and hashing are by `(type, value)`; two `InputDriver`
/// instances built from the same `(type, value)` pair always carry the same
/// cache key (see [`InputDriver::cache_key`]), so the [`DriverCache`] can
/// deduplicate them without comparing `InputDriver` itself (a `Regex` and a
/// value-group's member list are not cheaply comparable).
#[derive(Debug)]
pub enum InputDriver {
    String { value: String },
    Regex { value: String, compiled: Regex },
    IntegerRange { value: String, lo: i64, hi: i64 },
    DateRange { value: String, lo: Instant, hi: Instant },
    ValueGroup { value: String, id: Uuid, members: Vec<Arc<InputDriver>> },
}

impl InputDriver {
    pub fn driver_type(&self) -> DriverType {
        match self {
            InputDriver::String { .. } => DriverType::String,
            InputDriver::Regex { .. } => DriverType::Regex,
            InputDriver::IntegerRange { .. } => DriverType::IntegerRange,
            InputDriver::DateRange { .. } => DriverType::DateRange,
            InputDriver::ValueGroup { .. } => DriverType::ValueGroup,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            InputDriver::String { value }
            | InputDriver::Regex { value, .. }
            | InputDriver::IntegerRange { value, .. }
            | InputDriver::DateRange { value, .. }
            | InputDriver::ValueGroup { value, .. } => value,
        }
    }

    /// True if this driver's value is the universal wildcard token, in which
    /// case it matches any input and contributes no bits to a rule's weight.
    pub fn is_wildcard(&self) -> bool {
        self.value() == WILDCARD
    }

    /// Canonical cache key: the matching prefix constant plus the value, or
    /// for value groups the group id rather than its (non-unique) name.
    pub fn cache_key(&self) -> String {
        match self {
            InputDriver::String { value } => value.clone(),
            InputDriver::Regex { value, .. } => format!("{REGEX_PREFIX}{value}"),
            InputDriver::IntegerRange { value, .. } => format!("{INTEGER_RANGE_PREFIX}{value}"),
            InputDriver::DateRange { value, .. } => format!("{DATE_RANGE_PREFIX}{value}"),
            InputDriver::ValueGroup { id, .. } => format!("{VALUE_GROUP_PREFIX}{id}"),
        }
    }

    /// Evaluate this driver against a single input string.
    ///
    /// Non-wildcard integer-range/date-range drivers that are handed
    /// unparsable input return `Error::ParseError` rather than silently
    /// failing to match; the tree evaluator treats that as "this path does
    /// not match" and continues exploring other paths.
    pub fn evaluate(&self, input: &str) -> Result<bool, Error> {
        if self.is_wildcard() {
            return Ok(true);
        }

        match self {
            InputDriver::String { value } => Ok(input == value),
            InputDriver::Regex { compiled, .. } => Ok(compiled.is_match(input)),
            InputDriver::IntegerRange { lo, hi, .. } => match input.parse::<i64>() {
                Ok(n) => Ok(n >= *lo && n < *hi),
                Err(_) => Err(Error::ParseError { input: input.to_string(), driver_type: DriverType::IntegerRange }),
            },
            InputDriver::DateRange { lo, hi, .. } => {
                // A wildcard *input* (as opposed to a wildcard driver value)
                // matches any date-range driver unconditionally.
                if input == WILDCARD {
                    return Ok(true);
                }
                match input.parse::<i64>() {
                    Ok(millis) => {
                        let instant = Instant::from_millis(millis);
                        Ok(instant >= *lo && instant < *hi)
                    }
                    Err(_) => Err(Error::ParseError { input: input.to_string(), driver_type: DriverType::DateRange }),
                }
            }
            InputDriver::ValueGroup { members, .. } => {
                for member in members {
                    if member.evaluate(input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl PartialEq for InputDriver {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key()
    }
}
impl Eq for InputDriver {}

impl std::hash::Hash for InputDriver {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
    }
}

/// A mapping from `(type, value)` to a unique [`InputDriver`] instance.
///
/// Rule and value-group construction normalizes every driver through a
/// `DriverCache` so identical drivers share one `Arc`. The cache is
/// append-only after a `RuleSet` is published: each `apply` builds a fresh
/// cache for the new snapshot rather than mutating the published one.
#[derive(Debug, Default)]
pub struct DriverCache {
    entries: HashMap<String, Arc<InputDriver>>,
}

impl DriverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<InputDriver>> {
        self.entries.get(key).cloned()
    }

    /// Idempotent insert: returns the canonical (possibly pre-existing)
    /// instance for this driver's cache key.
    pub fn put(&mut self, driver: InputDriver) -> Arc<InputDriver> {
        let key = driver.cache_key();
        self.entries.entry(key).or_insert_with(|| Arc::new(driver)).clone()
    }

    pub fn find_by_type(&self, driver_type: DriverType) -> Vec<Arc<InputDriver>> {
        self.entries.values().filter(|d| d.driver_type() == driver_type).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Construct a plain string driver, interning it through `cache`.
pub fn string_driver(cache: &mut DriverCache, value: impl Into<String>) -> Arc<InputDriver> {
    cache.put(InputDriver::String { value: value.into() })
}

/// Construct a regex driver, interning it through `cache`.
pub fn regex_driver(cache: &mut DriverCache, value: impl Into<String>) -> Result<Arc<InputDriver>, Error> {
    let value = value.into();
    let compiled = Regex::new(&format!("^(?:{value})$"))
        .map_err(|_| Error::ParseError { input: value.clone(), driver_type: DriverType::Regex })?;
    Ok(cache.put(InputDriver::Regex { value, compiled }))
}

/// Construct an integer-range driver `[lo, hi)`, interning it through `cache`.
pub fn integer_range_driver(
    cache: &mut DriverCache,
    name: impl Into<String>,
    lo: i64,
    hi: i64,
) -> Result<Arc<InputDriver>, Error> {
    let value = name.into();
    if lo >= hi {
        return Err(Error::InvalidArgument { reason: format!("integer range [{lo}, {hi}) is non-chronological") });
    }
    Ok(cache.put(InputDriver::IntegerRange { value, lo, hi }))
}

/// Construct a date-range driver `[lo, hi)`, interning it through `cache`.
pub fn date_range_driver(
    cache: &mut DriverCache,
    name: impl Into<String>,
    range: DateRange,
) -> Arc<InputDriver> {
    cache.put(InputDriver::DateRange { value: name.into(), lo: range.start, hi: range.finish })
}

/// Construct a value-group driver referencing `members`, interning it
/// through `cache`. `members` may themselves be other value-group drivers
/// (recursive groups); callers are responsible for cycle avoidance when
/// building the member list (see [`crate::value_group::flatten_members`]).
pub fn value_group_driver(
    cache: &mut DriverCache,
    id: Uuid,
    members: Vec<Arc<InputDriver>>,
) -> Arc<InputDriver> {
    cache.put(InputDriver::ValueGroup { value: format!("{VALUE_GROUP_PREFIX}{id}"), id, members })
}
