//! Read handles: list and detail queries

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{Lookup, QueryState};
use crate::descriptor::ResourceDescriptor;
use crate::error::{ResourceError, Result};
use crate::key::{ListParams, Page, QueryKey};
use crate::resource::Binding;

/// Placeholder id produced by unfilled route templates.
const ID_PLACEHOLDER: &str = ":id";

/// Await a cache lookup, giving up (without aborting the shared fetch)
/// when the caller's token fires.
pub(crate) async fn await_lookup<T>(lookup: Lookup<T>, cancel: &CancellationToken) -> Result<Arc<T>> {
    match lookup {
        Lookup::Fresh(data) => Ok(data),
        Lookup::Pending(fetch) => tokio::select! {
            result = fetch => result,
            _ = cancel.cancelled() => Err(ResourceError::Cancelled),
        },
    }
}

pub struct ListQuery<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    params: ListParams,
    key: QueryKey,
}

impl<D: ResourceDescriptor> ListQuery<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, params: ListParams) -> Self {
        let key = binding.keys.list(&params);
        Self {
            binding,
            params,
            key,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn params(&self) -> &ListParams {
        &self.params
    }

    /// Cached page if fresh, otherwise the (possibly shared) fetch result.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Arc<Page<D::Item>>> {
        if cancel.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }
        let lookup = self.binding.lists.lookup(
            &self.key,
            self.binding.options.stale_time,
            self.binding.list_fetcher(self.params.clone()),
        );
        await_lookup(lookup, cancel).await
    }

    /// Invalidate this entry and fetch it again.
    pub async fn refetch(&self, cancel: &CancellationToken) -> Result<Arc<Page<D::Item>>> {
        self.binding.lists.invalidate(&self.key);
        self.fetch(cancel).await
    }

    /// Current snapshot; starts a background fetch when data is missing or
    /// stale.
    pub fn state(&self) -> QueryState<Page<D::Item>> {
        self.binding.lists.observe(
            &self.key,
            self.binding.options.stale_time,
            self.binding.list_fetcher(self.params.clone()),
        )
    }
}

pub struct DetailQuery<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    id: String,
    key: QueryKey,
}

impl<D: ResourceDescriptor> DetailQuery<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, id: String) -> Self {
        let key = binding.keys.detail(&id);
        Self { binding, id, key }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        !self.id.is_empty() && self.id != ID_PLACEHOLDER
    }

    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Arc<D::Detail>> {
        if !self.is_enabled() {
            return Err(ResourceError::Disabled(format!(
                "detail id {:?} is not set",
                self.id
            )));
        }
        if cancel.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }
        let lookup = self.binding.details.lookup(
            &self.key,
            self.binding.options.stale_time,
            self.binding.detail_fetcher(self.id.clone()),
        );
        await_lookup(lookup, cancel).await
    }

    pub async fn refetch(&self, cancel: &CancellationToken) -> Result<Arc<D::Detail>> {
        if self.is_enabled() {
            self.binding.details.invalidate(&self.key);
        }
        self.fetch(cancel).await
    }

    /// Current snapshot. A disabled query stays `Idle` and never fetches.
    pub fn state(&self) -> QueryState<D::Detail> {
        if !self.is_enabled() {
            return QueryState::idle();
        }
        self.binding.details.observe(
            &self.key,
            self.binding.options.stale_time,
            self.binding.detail_fetcher(self.id.clone()),
        )
    }
}
