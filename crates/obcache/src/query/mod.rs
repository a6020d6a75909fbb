pub mod operators;
pub mod sort;
pub mod types;

pub use operators::{compare_values, matches_filter, matches_properties};
pub use sort::{compare_entities, insertion_index};
pub use types::{normalize_sort, SortDirection, SortEntry, SortInput, WhereClause};
