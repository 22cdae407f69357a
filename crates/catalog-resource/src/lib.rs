//! Query cache bindings for REST resources
//!
//! A `ResourceDescriptor` says how to list, read, create, update and remove
//! one kind of entity. Wrapping it in a `Resource` gives cache-aware
//! handles:
//!
//! - `use_list` / `use_detail` share in-flight fetches per query key and
//!   serve cached data while it is fresh
//! - `use_infinite_list` walks page or cursor pagination
//! - `use_create` / `use_update` / `use_remove` invalidate the affected
//!   keys once the write succeeds; removal can hide the item from cached
//!   lists ahead of the server's answer and roll back on failure
//!
//! Keys are hierarchical (`[ns]`, `[ns, "list"]`, `[ns, "list", params]`,
//! `[ns, "detail"]`, `[ns, "detail", id]`), and invalidating a key marks
//! every entry under it stale.

mod cache;
pub mod descriptor;
pub mod error;
pub mod infinite;
pub mod key;
pub mod mutation;
pub mod query;
pub mod resource;
#[cfg(test)]
mod testing;

pub use cache::{QueryState, QueryStatus};
pub use descriptor::ResourceDescriptor;
pub use error::{ResourceError, Result};
pub use infinite::{InfiniteList, PageParam, next_page_param};
pub use key::{ListParams, Page, Pagination, QueryKey, QueryKeys, QueryKind, canonical_json};
pub use mutation::{
    CreateMutation, CreateOptions, MutationState, MutationStatus, OptimisticUpdate,
    RemoveMutation, RemoveOptions, UpdateMutation, UpdateOptions,
};
pub use query::{DetailQuery, ListQuery};
pub use resource::{DEFAULT_GC_TIME, Resource, ResourceOptions};

// Descriptor implementations need these in their signatures
pub use futures_util::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;
