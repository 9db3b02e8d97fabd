//! Engine key model and key ranges
//!
//! Index keys follow the IndexedDB key model restricted to what JSON can
//! express: numbers, strings, and arrays of valid keys. Booleans, null and
//! objects are not keys; a record whose indexed field holds one of those is
//! simply absent from that index.
//!
//! Ordering across types is number < string < array. Strings compare by
//! UTF-16 code units, arrays lexicographically.

use std::cmp::Ordering;
use std::ops::Bound;

use serde_json::Value;

/// Primary key of a record (auto-assigned by the store's key generator).
pub type RecordId = u64;

/// Largest record id: 2^53, the last integer a key generator can produce
/// and a JS number can hold exactly.
pub const MAX_RECORD_ID: RecordId = 1 << 53;

/// Whether `id` can be stored and looked up without loss.
pub fn is_valid_record_id(id: RecordId) -> bool {
    id <= MAX_RECORD_ID
}

/// Whether `value` is a valid engine key.
pub fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|f| !f.is_nan()),
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_valid_key),
        _ => false,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Array(_) => 2,
        _ => 3,
    }
}

/// Compare two keys in engine order.
///
/// Returns `None` if either side is not a valid key.
pub fn compare_keys(a: &Value, b: &Value) -> Option<Ordering> {
    if !is_valid_key(a) || !is_valid_key(b) {
        return None;
    }
    Some(compare_valid(a, b))
}

fn compare_valid(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.encode_utf16().cmp(y.encode_utf16()),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_valid(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Resolve a key path (`"field"` or `"nested.field"`) against a record.
pub fn value_at_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.as_object()?.get(segment))
}

/// Key lookup argument for indexed queries.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    /// Every record that has a valid key for the index
    All,
    /// Records whose key equals the value
    Only(Value),
    /// Records whose key falls between the bounds
    Bounded { lower: Bound<Value>, upper: Bound<Value> },
}

impl KeyRange {
    pub fn only(value: impl Into<Value>) -> Self {
        KeyRange::Only(value.into())
    }

    /// Keys `>= lower` (or `> lower` when `open`).
    pub fn lower_bound(lower: impl Into<Value>, open: bool) -> Self {
        KeyRange::Bounded {
            lower: make_bound(lower.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys `<= upper` (or `< upper` when `open`).
    pub fn upper_bound(upper: impl Into<Value>, open: bool) -> Self {
        KeyRange::Bounded {
            lower: Bound::Unbounded,
            upper: make_bound(upper.into(), open),
        }
    }

    pub fn bound(
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        KeyRange::Bounded {
            lower: make_bound(lower.into(), lower_open),
            upper: make_bound(upper.into(), upper_open),
        }
    }

    /// Whether every key used by this range is a valid engine key.
    pub fn is_valid(&self) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Only(v) => is_valid_key(v),
            KeyRange::Bounded { lower, upper } => {
                bound_value(lower).map_or(true, is_valid_key)
                    && bound_value(upper).map_or(true, is_valid_key)
            }
        }
    }

    /// Whether `key` falls within this range.
    pub fn contains(&self, key: &Value) -> bool {
        if !is_valid_key(key) {
            return false;
        }
        match self {
            KeyRange::All => true,
            KeyRange::Only(v) => compare_keys(key, v) == Some(Ordering::Equal),
            KeyRange::Bounded { lower, upper } => {
                let above = match lower {
                    Bound::Unbounded => true,
                    Bound::Included(l) => {
                        matches!(compare_keys(key, l), Some(Ordering::Greater | Ordering::Equal))
                    }
                    Bound::Excluded(l) => compare_keys(key, l) == Some(Ordering::Greater),
                };
                let below = match upper {
                    Bound::Unbounded => true,
                    Bound::Included(u) => {
                        matches!(compare_keys(key, u), Some(Ordering::Less | Ordering::Equal))
                    }
                    Bound::Excluded(u) => compare_keys(key, u) == Some(Ordering::Less),
                };
                above && below
            }
        }
    }
}

fn make_bound(value: Value, open: bool) -> Bound<Value> {
    if open {
        Bound::Excluded(value)
    } else {
        Bound::Included(value)
    }
}

fn bound_value(bound: &Bound<Value>) -> Option<&Value> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

/// `null` selects every key, as an absent query does.
impl From<Value> for KeyRange {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => KeyRange::All,
            value => KeyRange::Only(value),
        }
    }
}

impl From<&str> for KeyRange {
    fn from(value: &str) -> Self {
        KeyRange::Only(Value::from(value))
    }
}

impl From<String> for KeyRange {
    fn from(value: String) -> Self {
        KeyRange::Only(Value::from(value))
    }
}

impl From<i64> for KeyRange {
    fn from(value: i64) -> Self {
        KeyRange::Only(Value::from(value))
    }
}

impl From<f64> for KeyRange {
    fn from(value: f64) -> Self {
        KeyRange::Only(Value::from(value))
    }
}

impl From<Option<Value>> for KeyRange {
    fn from(value: Option<Value>) -> Self {
        value.map_or(KeyRange::All, KeyRange::from)
    }
}
