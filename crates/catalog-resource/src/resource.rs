//! `Resource`: cache-aware operations bound to one descriptor

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::QueryCache;
use crate::descriptor::ResourceDescriptor;
use crate::error::Result;
use crate::infinite::InfiniteList;
use crate::key::{ListParams, Page, QueryKey, QueryKeys, QueryKind};
use crate::mutation::{
    CreateMutation, CreateOptions, RemoveMutation, RemoveOptions, UpdateMutation, UpdateOptions,
};
use crate::query::{DetailQuery, ListQuery};

/// Default time an unused entry is kept before a sweep drops it.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
pub struct ResourceOptions {
    /// How long fetched data counts as fresh. Zero means every read
    /// revalidates (in-flight fetches are still shared).
    pub stale_time: Duration,
    pub gc_time: Duration,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: DEFAULT_GC_TIME,
        }
    }
}

/// State shared by a resource and every query/mutation handle created from it.
pub(crate) struct Binding<D: ResourceDescriptor> {
    pub(crate) descriptor: Arc<D>,
    pub(crate) keys: QueryKeys,
    pub(crate) lists: Arc<QueryCache<Page<D::Item>>>,
    pub(crate) details: Arc<QueryCache<D::Detail>>,
    pub(crate) options: ResourceOptions,
}

type Fetcher<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>> + Send>;

impl<D: ResourceDescriptor> Binding<D> {
    pub(crate) fn list_fetcher(&self, params: ListParams) -> Fetcher<Page<D::Item>> {
        let descriptor = Arc::clone(&self.descriptor);
        Box::new(move |token| async move { descriptor.list(&params, token).await }.boxed())
    }

    pub(crate) fn detail_fetcher(&self, id: String) -> Fetcher<D::Detail> {
        let descriptor = Arc::clone(&self.descriptor);
        Box::new(move |token| async move { descriptor.detail(&id, token).await }.boxed())
    }

    /// Invalidate every entry matched by `key`; returns the number marked.
    pub(crate) fn invalidate(&self, key: &QueryKey) -> usize {
        let count = match key.kind() {
            None => self.lists.invalidate(key) + self.details.invalidate(key),
            Some(QueryKind::List) => self.lists.invalidate(key),
            Some(QueryKind::Detail) => self.details.invalidate(key),
        };
        debug!(key = %key, count, "invalidated queries");
        count
    }
}

/// Cache binding for one descriptor.
///
/// Cheap to clone; clones share one cache. Dropping the last clone (and
/// every handle created from it) cancels outstanding fetches.
pub struct Resource<D: ResourceDescriptor> {
    inner: Arc<Binding<D>>,
}

impl<D: ResourceDescriptor> Clone for Resource<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: ResourceDescriptor> Resource<D> {
    pub fn new(descriptor: D) -> Self {
        Self::with_options(descriptor, ResourceOptions::default())
    }

    pub fn with_options(descriptor: D, options: ResourceOptions) -> Self {
        let keys = QueryKeys::new(descriptor.key());
        Self {
            inner: Arc::new(Binding {
                descriptor: Arc::new(descriptor),
                keys,
                lists: Arc::new(QueryCache::new(options.gc_time)),
                details: Arc::new(QueryCache::new(options.gc_time)),
                options,
            }),
        }
    }

    pub fn descriptor(&self) -> &D {
        &self.inner.descriptor
    }

    pub fn options(&self) -> ResourceOptions {
        self.inner.options
    }

    /// Key factory: `all`, `lists`, `list(params)`, `details`, `detail(id)`.
    pub fn keys(&self) -> &QueryKeys {
        &self.inner.keys
    }

    pub fn use_list(&self, params: ListParams) -> ListQuery<D> {
        ListQuery::new(Arc::clone(&self.inner), params)
    }

    /// Detail query. An empty id or the `":id"` placeholder yields a
    /// disabled query.
    pub fn use_detail(&self, id: impl Into<String>) -> DetailQuery<D> {
        DetailQuery::new(Arc::clone(&self.inner), id.into())
    }

    /// Page-by-page list; `params.page` is ignored, `params.cursor` (if set)
    /// is the first cursor.
    pub fn use_infinite_list(&self, params: ListParams) -> InfiniteList<D> {
        InfiniteList::new(Arc::clone(&self.inner), params)
    }

    pub fn use_create(&self, options: CreateOptions) -> CreateMutation<D> {
        CreateMutation::new(Arc::clone(&self.inner), options)
    }

    pub fn use_update(&self, id: impl Into<String>, options: UpdateOptions) -> UpdateMutation<D> {
        UpdateMutation::new(Arc::clone(&self.inner), id.into(), options)
    }

    pub fn use_remove(&self, options: RemoveOptions) -> RemoveMutation<D> {
        RemoveMutation::new(Arc::clone(&self.inner), options)
    }

    /// Invalidate every entry matched by `key` (use `keys()` to build it).
    pub fn invalidate(&self, key: &QueryKey) -> usize {
        self.inner.invalidate(key)
    }

    /// Cached list page regardless of freshness, without fetching.
    pub fn cached_list(&self, params: &ListParams) -> Option<Arc<Page<D::Item>>> {
        self.inner.lists.get(&self.inner.keys.list(params))
    }

    /// Cached detail regardless of freshness, without fetching.
    pub fn cached_detail(&self, id: &str) -> Option<Arc<D::Detail>> {
        self.inner.details.get(&self.inner.keys.detail(id))
    }

    /// Drop entries unused for longer than `gc_time` that are not fetching.
    /// Reads already sweep on their own; this forces a sweep now.
    pub fn evict_unused(&self) -> usize {
        let gc_time = self.inner.options.gc_time;
        let evicted = self.inner.lists.evict_unused(gc_time) + self.inner.details.evict_unused(gc_time);
        if evicted > 0 {
            debug!(namespace = self.inner.keys.all().namespace(), evicted, "evicted unused queries");
        }
        evicted
    }

    /// Number of cached entries (lists plus details).
    pub fn cached_entries(&self) -> usize {
        self.inner.lists.len() + self.inner.details.len()
    }
}
