//! Local evaluation of where clauses against cached entities.
//!
//! Used to keep collection membership current when entities change without a
//! refetch. Semantics follow the backend filter dialect: implicit AND across
//! fields, `$and` / `$or` / `$not` combinators, and array lifting for the
//! comparison operators.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{QueryError, Result};
use crate::types::Entity;

// ============================================================================
// Value Comparison
// ============================================================================

/// Total order over JSON values used for both filtering and sorting.
///
/// Nulls sort last; numbers compare as f64; mismatched types order by rank
/// (number, string, bool, other).
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

/// Returns true if `value` is a non-empty object where every key starts with `$`.
pub fn is_operator(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) if !obj.is_empty() => obj.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Resolve a dot-separated path against an entity's properties.
pub fn field_value<'a>(properties: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = properties.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

// ============================================================================
// Regex Cache
// ============================================================================

const REGEX_CACHE_LIMIT: usize = 256;

static REGEX_CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();

/// Compiled form of `pattern`, shared across every entity a clause is tested against.
fn compiled_regex(pattern: &str) -> Result<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(re) = cache.lock().get(pattern) {
        return Ok(re.clone());
    }

    let re = Regex::new(pattern).map_err(|e| QueryError::InvalidRegex(e.to_string()))?;
    let mut cache = cache.lock();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
    Size,
    Contains,
    ContainsAny,
    All,
    Exists,
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$regex" => Self::Regex,
            "$size" => Self::Size,
            "$contains" => Self::Contains,
            "$containsAny" => Self::ContainsAny,
            "$all" => Self::All,
            "$exists" => Self::Exists,
            other => return Err(QueryError::UnknownOperator(other.to_string())),
        })
    }
}

impl Operator {
    /// Comparison operators that match an array field if ANY element matches.
    fn lifts_any(self) -> bool {
        matches!(self, Self::Eq | Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    fn ordered(value: &Value, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
        !value.is_null() && !operand.is_null() && accept(compare_values(value, operand))
    }

    /// Evaluate against a field that may be absent.
    fn evaluate(self, value: Option<&Value>, operand: &Value) -> Result<bool> {
        if self == Self::Exists {
            return Ok(operand.as_bool().unwrap_or(false) == value.is_some());
        }
        let value = value.unwrap_or(&Value::Null);

        if let (Some(items), false) = (value.as_array(), operand.is_array()) {
            if self.lifts_any() {
                for item in items {
                    if self.evaluate_scalar(item, operand)? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
            if self == Self::Ne {
                return Ok(items.iter().all(|item| item != operand));
            }
        }
        self.evaluate_scalar(value, operand)
    }

    fn evaluate_scalar(self, value: &Value, operand: &Value) -> Result<bool> {
        Ok(match self {
            Self::Eq => value == operand,
            Self::Ne => value != operand,
            Self::Gt => Self::ordered(value, operand, |o| o == Ordering::Greater),
            Self::Gte => Self::ordered(value, operand, |o| o != Ordering::Less),
            Self::Lt => Self::ordered(value, operand, |o| o == Ordering::Less),
            Self::Lte => Self::ordered(value, operand, |o| o != Ordering::Greater),
            Self::In | Self::Nin => {
                let hit = match (operand.as_array(), value.as_array()) {
                    (Some(items), Some(values)) => values.iter().any(|v| items.contains(v)),
                    (Some(items), None) => items.contains(value),
                    (None, _) => false,
                };
                if self == Self::In {
                    hit
                } else {
                    !hit
                }
            }
            Self::Regex => match (value.as_str(), operand.as_str()) {
                (Some(text), Some(pattern)) => compiled_regex(pattern)?.is_match(text),
                _ => false,
            },
            Self::Size => match (value.as_array(), operand.as_u64()) {
                (Some(items), Some(n)) => items.len() as u64 == n,
                _ => false,
            },
            Self::Contains => value.as_array().is_some_and(|items| items.contains(operand)),
            Self::ContainsAny => match (value.as_array(), operand.as_array()) {
                (Some(items), Some(targets)) => targets.iter().any(|t| items.contains(t)),
                _ => false,
            },
            Self::All => match (value.as_array(), operand.as_array()) {
                (Some(items), Some(targets)) => targets.iter().all(|t| items.contains(t)),
                _ => false,
            },
            Self::Exists => unreachable!("handled before scalar evaluation"),
        })
    }
}

// ============================================================================
// Filter Evaluation
// ============================================================================

fn matches_field(value: Option<&Value>, condition: &Value) -> Result<bool> {
    let Some(ops) = condition.as_object().filter(|_| is_operator(condition)) else {
        return Operator::Eq.evaluate(value, condition);
    };
    for (op, operand) in ops {
        if !op.parse::<Operator>()?.evaluate(value, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a where clause against raw properties.
///
/// A missing or non-object clause matches everything.
pub fn matches_properties(properties: &Map<String, Value>, clause: &Value) -> Result<bool> {
    let Some(clause) = clause.as_object() else {
        return Ok(true);
    };

    for (key, condition) in clause {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in condition.as_array().into_iter().flatten() {
                    if !matches_properties(properties, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let branches = condition.as_array().map(Vec::as_slice).unwrap_or_default();
                let mut any = branches.is_empty();
                for sub in branches {
                    if matches_properties(properties, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$not" => !matches_properties(properties, condition)?,
            meta if meta.starts_with('$') => true,
            field => matches_field(field_value(properties, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a where clause against an entity.
pub fn matches_filter(entity: &Entity, clause: &Value) -> Result<bool> {
    matches_properties(&entity.properties, clause)
}

// ============================================================================
// Tests
// ============================================================================
