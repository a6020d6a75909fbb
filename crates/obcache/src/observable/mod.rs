//! Observable layer: queries that turn store entries into observer payloads.
//!
//! # Overview
//!
//! [`ObservableClient`] is the entry point. It hands out one shared query
//! per cache key and keeps the key retained while observers are attached.
//!
//! # Modules
//!
//! - [`client`]: [`ObservableClient`] and [`QuerySubscription`].
//! - [`object_query`]: [`ObjectQuery`] and [`ObjectPayload`].
//! - [`list_query`]: [`ListQuery`], paging and local list maintenance.
//! - `collection`: composition of a list entry with its members' entries.
//! - `helper`: retain/release with resubscribe coalescing.
//! - `query`: fetch deduplication shared by both query kinds.

pub mod client;
pub mod list_query;
pub mod object_query;

mod collection;
mod helper;
mod query;

pub use client::{ObservableClient, QuerySubscription, Unsubscribe};
pub use list_query::{ListPayload, ListQuery};
pub use object_query::{ObjectPayload, ObjectQuery};
