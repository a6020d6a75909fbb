//! Structural interning of query fragments.
//!
//! Deep-equal where clauses, order-bys and field sets canonicalize to the same
//! [`Canonical`] handle for as long as any handle to that form is alive, so
//! cache keys built from them can compare by identity.

pub mod field_set;
pub mod intern;
pub mod order_by;
pub mod where_clause;

pub use field_set::FieldSetCanonicalizer;
pub use intern::{Canonical, InternTable};
pub use order_by::OrderByCanonicalizer;
pub use where_clause::WhereClauseCanonicalizer;

/// The canonicalizers one store shares across all of its keys.
#[derive(Default)]
pub struct Canonicalizers {
    pub where_clause: WhereClauseCanonicalizer,
    pub order_by: OrderByCanonicalizer,
    pub field_set: FieldSetCanonicalizer,
}

impl Canonicalizers {
    pub fn new() -> Self {
        Self::default()
    }
}
