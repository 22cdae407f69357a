//! Incrementally loaded lists
//!
//! Pages are fetched one at a time through the list cache, so each loaded
//! page is also an ordinary `list(params)` entry and shares fetches and
//! invalidation with `use_list`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::descriptor::ResourceDescriptor;
use crate::error::Result;
use crate::key::{ListParams, Page};
use crate::query::await_lookup;
use crate::resource::Binding;

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageParam {
    Page(u32),
    Cursor(String),
}

/// Next page after `last`, given how many pages are loaded (including it).
///
/// A `next_cursor` field (even `null`) switches to cursor pagination.
/// Otherwise the next page number is `loaded + 1`, offered only when the
/// server reports `has_next` with a page and limit, and the number does not
/// exceed `total_pages` (or `ceil(total / limit)`) when those are known.
pub fn next_page_param<T>(last: &Page<T>, loaded: usize) -> Option<PageParam> {
    let pagination = last.pagination.as_ref()?;

    if let Some(next_cursor) = &pagination.next_cursor {
        return next_cursor.clone().map(PageParam::Cursor);
    }

    let has_page = pagination.page.is_some_and(|p| p > 0);
    let limit = pagination.limit.filter(|l| *l > 0);
    if pagination.has_next != Some(true) || !has_page {
        return None;
    }
    let limit = u64::from(limit?);

    let total_pages = pagination.total_pages.or_else(|| {
        pagination
            .total
            .filter(|t| *t > 0)
            .map(|total| total.div_ceil(limit))
    });
    let next = u32::try_from(loaded + 1).ok()?;
    match total_pages {
        // Zero means unknown
        Some(total_pages) if total_pages > 0 && u64::from(next) > total_pages => None,
        _ => Some(PageParam::Page(next)),
    }
}

struct Loaded<T> {
    pages: Vec<Arc<Page<T>>>,
    next: Option<PageParam>,
}

pub struct InfiniteList<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    base: ListParams,
    loaded: Mutex<Loaded<D::Item>>,
}

impl<D: ResourceDescriptor> InfiniteList<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, base: ListParams) -> Self {
        let next = Some(Self::first_param(&base));
        Self {
            binding,
            base,
            loaded: Mutex::new(Loaded {
                pages: Vec::new(),
                next,
            }),
        }
    }

    fn first_param(base: &ListParams) -> PageParam {
        match &base.cursor {
            Some(cursor) => PageParam::Cursor(cursor.clone()),
            None => PageParam::Page(1),
        }
    }

    fn params_for(&self, param: &PageParam) -> ListParams {
        let mut params = self.base.clone();
        match param {
            PageParam::Page(page) => {
                params.page = Some(*page);
                params.cursor = None;
            }
            PageParam::Cursor(cursor) => {
                params.page = None;
                params.cursor = Some(cursor.clone());
            }
        }
        params
    }

    /// Load the next page. Returns `None` once the last page is loaded.
    ///
    /// Calls are serialized; a failed load leaves the list unchanged so it
    /// can be retried.
    pub async fn fetch_next_page(&self, cancel: &CancellationToken) -> Result<Option<Arc<Page<D::Item>>>> {
        let mut loaded = self.loaded.lock().await;
        let Some(param) = loaded.next.clone() else {
            return Ok(None);
        };

        let params = self.params_for(&param);
        let key = self.binding.keys.list(&params);
        let lookup = self.binding.lists.lookup(
            &key,
            self.binding.options.stale_time,
            self.binding.list_fetcher(params),
        );
        let page = await_lookup(lookup, cancel).await?;

        loaded.pages.push(Arc::clone(&page));
        loaded.next = next_page_param(&page, loaded.pages.len());
        debug!(key = %key, pages = loaded.pages.len(), next = ?loaded.next, "loaded page");
        Ok(Some(page))
    }

    pub async fn has_next_page(&self) -> bool {
        self.loaded.lock().await.next.is_some()
    }

    pub async fn pages(&self) -> Vec<Arc<Page<D::Item>>> {
        self.loaded.lock().await.pages.clone()
    }

    /// Items of every loaded page, in order.
    pub async fn items(&self) -> Vec<D::Item> {
        self.loaded
            .lock()
            .await
            .pages
            .iter()
            .flat_map(|page| page.items.iter().cloned())
            .collect()
    }

    /// Load pages until the last one, returning every item.
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<D::Item>> {
        while self.fetch_next_page(cancel).await?.is_some() {}
        Ok(self.items().await)
    }

    /// Forget loaded pages and start again from the first.
    pub async fn reset(&self) {
        let mut loaded = self.loaded.lock().await;
        loaded.pages.clear();
        loaded.next = Some(Self::first_param(&self.base));
    }
}
