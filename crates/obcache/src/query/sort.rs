//! Ordering of entities under an order-by, and sorted insertion into member lists.

use std::cmp::Ordering;

use serde_json::Value;

use super::operators::{compare_values, field_value};
use super::types::{SortDirection, SortEntry};
use crate::types::Entity;

/// Compare two entities field by field; the first non-equal field decides.
pub fn compare_entities(a: &Entity, b: &Entity, sort: &[SortEntry]) -> Ordering {
    for entry in sort {
        let va = field_value(&a.properties, &entry.field).unwrap_or(&Value::Null);
        let vb = field_value(&b.properties, &entry.field).unwrap_or(&Value::Null);
        let cmp = compare_values(va, vb);
        if cmp != Ordering::Equal {
            return match entry.direction {
                SortDirection::Desc => cmp.reverse(),
                SortDirection::Asc => cmp,
            };
        }
    }
    Ordering::Equal
}

/// Index at which `entity` belongs in an already sorted sequence.
///
/// Ties go after existing elements. With no order-by every position ties, so
/// new entities are appended.
pub fn insertion_index<'a, I>(existing: I, entity: &Entity, sort: &[SortEntry]) -> usize
where
    I: IntoIterator<Item = Option<&'a Entity>>,
{
    let mut index = 0;
    for (i, current) in existing.into_iter().enumerate() {
        index = i + 1;
        if let Some(current) = current {
            if compare_entities(entity, current, sort) == Ordering::Less {
                return i;
            }
        }
    }
    index
}
