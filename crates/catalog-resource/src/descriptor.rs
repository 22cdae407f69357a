//! Resource descriptor: the five remote operations of one entity type

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::key::{ListParams, Page};

/// Remote operations for one cacheable entity type.
///
/// Implementations are plain request builders over a transport; caching,
/// deduplication and invalidation live in `Resource`. Every operation takes
/// a cancellation token and must stop promptly once it fires.
pub trait ResourceDescriptor: Send + Sync + 'static {
    /// Element of a list page.
    type Item: Clone + Send + Sync + 'static;
    /// Single-entity representation returned by detail/create/update.
    type Detail: Send + Sync + 'static;
    type Create: Send + Sync + 'static;
    type Update: Send + Sync + 'static;

    /// Cache namespace, e.g. `"brands"`.
    fn key(&self) -> &str;

    fn list<'a>(
        &'a self,
        params: &'a ListParams,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Page<Self::Item>>>;

    fn detail<'a>(&'a self, id: &'a str, cancel: CancellationToken)
    -> BoxFuture<'a, Result<Self::Detail>>;

    fn create<'a>(
        &'a self,
        payload: &'a Self::Create,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Detail>>;

    fn update<'a>(
        &'a self,
        id: &'a str,
        payload: &'a Self::Update,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Detail>>;

    fn remove<'a>(&'a self, id: &'a str, cancel: CancellationToken) -> BoxFuture<'a, Result<()>>;

    /// Identifier of a list item, matched against the id passed to `remove`.
    fn item_id(&self, item: &Self::Item) -> String;

    /// Identifier of a created entity, used to invalidate its detail entry.
    fn detail_id(&self, detail: &Self::Detail) -> Option<String>;
}
