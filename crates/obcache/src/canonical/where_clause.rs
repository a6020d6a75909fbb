//! Where-clause canonicalization.
//!
//! Clauses are first simplified into a normal form, then interned by the
//! token sequence of that form:
//!
//! - `{ f: { $eq: v } }` is written `{ f: v }`
//! - `$and` / `$or` with no entries vanish, with one entry collapse to it
//! - nested `$and` in `$and` and `$or` in `$or` flatten
//! - plain property filters in an `$and` merge unless a field repeats
//! - `$and` items and `$or` branches are ordered by their JSON text
//! - `$not { $not { x } }` is `x`
//!
//! `serde_json::Map` keeps keys sorted, so object key order never leaks into
//! the token sequence.

use serde_json::{json, Map, Value};

use super::intern::{Canonical, InternTable};

/// Interns where clauses.
pub struct WhereClauseCanonicalizer {
    table: InternTable<Value>,
    empty: Canonical<Value>,
}

impl WhereClauseCanonicalizer {
    pub fn new() -> Self {
        Self {
            table: InternTable::new(),
            empty: Canonical::detached(Value::Object(Map::new())),
        }
    }

    /// Canonical form of `clause`. Missing, null and vacuous clauses all map
    /// to the same "no clause" form.
    pub fn canonicalize(&self, clause: Option<&Value>) -> Canonical<Value> {
        let simplified = match clause {
            Some(clause) => simplify(clause),
            None => return self.empty.clone(),
        };
        if is_empty(&simplified) {
            return self.empty.clone();
        }
        let mut tokens = Vec::new();
        tokenize(&simplified, &mut tokens);
        self.table.intern(tokens, || simplified)
    }

    pub fn empty(&self) -> Canonical<Value> {
        self.empty.clone()
    }

    pub fn live_forms(&self) -> usize {
        self.table.live_forms()
    }
}

impl Default for WhereClauseCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Simplification
// ============================================================================

/// Normal form of a where clause. Non-object input simplifies to `{}`.
pub fn simplify(clause: &Value) -> Value {
    let mut conjuncts = Vec::new();
    collect_conjuncts(clause, &mut conjuncts);
    build(conjuncts)
}

fn is_empty(value: &Value) -> bool {
    value.as_object().map_or(true, Map::is_empty)
}

/// The operand of `key` when `value` is an object with exactly that one key.
fn sole_entry<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    if obj.len() == 1 {
        obj.get(key)
    } else {
        None
    }
}

fn is_plain(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.keys().all(|k| !k.starts_with('$')))
}

fn sort_dedup(items: &mut Vec<Value>) {
    let mut keyed: Vec<(String, Value)> = items.drain(..).map(|v| (v.to_string(), v)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    items.extend(keyed.into_iter().map(|(_, v)| v));
}

fn normalize_condition(condition: &Value) -> Value {
    match sole_entry(condition, "$eq") {
        Some(operand) => operand.clone(),
        None => condition.clone(),
    }
}

/// Split a clause into the conjuncts it requires, already simplified.
fn collect_conjuncts(clause: &Value, out: &mut Vec<Value>) {
    let Some(obj) = clause.as_object() else {
        return;
    };
    for (key, condition) in obj {
        match key.as_str() {
            "$and" => {
                for item in condition.as_array().into_iter().flatten() {
                    collect_conjuncts(item, out);
                }
            }
            "$or" => collect_disjunction(condition, out),
            "$not" => {
                let inner = simplify(condition);
                match sole_entry(&inner, "$not") {
                    Some(cancelled) => collect_conjuncts(cancelled, out),
                    None => out.push(json!({ "$not": inner })),
                }
            }
            field => {
                let mut single = Map::new();
                single.insert(field.to_string(), normalize_condition(condition));
                out.push(Value::Object(single));
            }
        }
    }
}

fn collect_disjunction(branches: &Value, out: &mut Vec<Value>) {
    let mut flat = Vec::new();
    for branch in branches.as_array().into_iter().flatten() {
        let branch = simplify(branch);
        // A branch that matches everything makes the whole disjunction vacuous.
        if is_empty(&branch) {
            return;
        }
        match sole_entry(&branch, "$or").and_then(Value::as_array) {
            Some(nested) => flat.extend(nested.iter().cloned()),
            None => flat.push(branch),
        }
    }
    sort_dedup(&mut flat);
    match flat.len() {
        0 => {}
        1 => collect_conjuncts(&flat[0], out),
        _ => out.push(json!({ "$or": flat })),
    }
}

fn build(mut items: Vec<Value>) -> Value {
    items.retain(|v| !is_empty(v));
    sort_dedup(&mut items);
    if items.len() <= 1 {
        return items.pop().unwrap_or_else(|| Value::Object(Map::new()));
    }

    let (plain, mut parts): (Vec<Value>, Vec<Value>) = items.iter().cloned().partition(is_plain);
    let mut merged = Map::new();
    for item in plain.into_iter().filter_map(|v| match v {
        Value::Object(obj) => Some(obj),
        _ => None,
    }) {
        for (field, condition) in item {
            if merged.insert(field, condition).is_some() {
                return json!({ "$and": items });
            }
        }
    }

    if !merged.is_empty() {
        parts.push(Value::Object(merged));
    }
    sort_dedup(&mut parts);
    if parts.len() == 1 {
        return parts.pop().unwrap_or_else(|| Value::Object(Map::new()));
    }
    json!({ "$and": parts })
}

// ============================================================================
// Tokens
// ============================================================================

fn tokenize(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            out.push("{".to_string());
            for (key, v) in obj {
                out.push(format!("k:{key}"));
                tokenize(v, out);
            }
            out.push("}".to_string());
        }
        Value::Array(items) => {
            out.push("[".to_string());
            for item in items {
                tokenize(item, out);
            }
            out.push("]".to_string());
        }
        scalar => out.push(format!("v:{scalar}")),
    }
}
