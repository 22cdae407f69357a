//! Write handles: create, update and remove with cache invalidation
//!
//! Invalidation runs after the write succeeds and before `mutate` returns,
//! so a read issued after `mutate` resolves never observes pre-write data
//! as fresh.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::QueryCache;
use crate::descriptor::ResourceDescriptor;
use crate::error::{ResourceError, Result};
use crate::key::{ListParams, QueryKey};
use crate::resource::Binding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Outcome of the most recent `mutate` call.
#[derive(Debug)]
pub struct MutationState<T> {
    pub status: MutationStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<ResourceError>,
}

impl<T> Clone for MutationState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T> MutationState<T> {
    fn idle() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

struct Tracker<T> {
    state: Mutex<MutationState<T>>,
}

impl<T> Tracker<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(MutationState::idle()),
        }
    }

    fn snapshot(&self) -> MutationState<T> {
        self.state.lock().clone()
    }

    fn begin(&self) -> Attempt<'_, T> {
        *self.state.lock() = MutationState {
            status: MutationStatus::Pending,
            data: None,
            error: None,
        };
        Attempt {
            tracker: self,
            finished: false,
        }
    }
}

/// One in-progress mutation. Dropped unfinished, it resets the state to
/// `Idle`.
struct Attempt<'a, T> {
    tracker: &'a Tracker<T>,
    finished: bool,
}

impl<T> Attempt<'_, T> {
    fn finish(mut self, result: &Result<Arc<T>>) {
        self.finished = true;
        let mut state = self.tracker.state.lock();
        match result {
            Ok(data) => {
                state.status = MutationStatus::Success;
                state.data = Some(Arc::clone(data));
            }
            Err(e) => {
                state.status = MutationStatus::Error;
                state.error = Some(e.clone());
            }
        }
    }
}

impl<T> Drop for Attempt<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            *self.tracker.state.lock() = MutationState::idle();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Invalidate every list entry after a successful create.
    pub invalidate_lists: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            invalidate_lists: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    pub invalidate_lists: bool,
    pub invalidate_detail: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            invalidate_lists: true,
            invalidate_detail: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove the item from cached lists before the server confirms.
    pub optimistic: bool,
    /// Lists to invalidate once settled. `None` invalidates every list.
    pub invalidate: Option<Vec<ListParams>>,
}

pub struct CreateMutation<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    options: CreateOptions,
    tracker: Tracker<D::Detail>,
}

impl<D: ResourceDescriptor> CreateMutation<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, options: CreateOptions) -> Self {
        Self {
            binding,
            options,
            tracker: Tracker::new(),
        }
    }

    pub async fn mutate(&self, payload: D::Create, cancel: &CancellationToken) -> Result<Arc<D::Detail>> {
        let attempt = self.tracker.begin();
        let result = self
            .binding
            .descriptor
            .create(&payload, cancel.clone())
            .await
            .map(Arc::new);

        if let Ok(created) = &result {
            if self.options.invalidate_lists {
                self.binding.invalidate(&self.binding.keys.lists());
            }
            if let Some(id) = self.binding.descriptor.detail_id(created) {
                self.binding.invalidate(&self.binding.keys.detail(&id));
            }
        }
        attempt.finish(&result);
        result
    }

    pub fn state(&self) -> MutationState<D::Detail> {
        self.tracker.snapshot()
    }
}

pub struct UpdateMutation<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    id: String,
    options: UpdateOptions,
    tracker: Tracker<D::Detail>,
}

impl<D: ResourceDescriptor> UpdateMutation<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, id: String, options: UpdateOptions) -> Self {
        Self {
            binding,
            id,
            options,
            tracker: Tracker::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn mutate(&self, payload: D::Update, cancel: &CancellationToken) -> Result<Arc<D::Detail>> {
        let attempt = self.tracker.begin();
        let result = self
            .binding
            .descriptor
            .update(&self.id, &payload, cancel.clone())
            .await
            .map(Arc::new);

        if result.is_ok() {
            if self.options.invalidate_detail {
                self.binding.invalidate(&self.binding.keys.detail(&self.id));
            }
            if self.options.invalidate_lists {
                self.binding.invalidate(&self.binding.keys.lists());
            }
        }
        attempt.finish(&result);
        result
    }

    pub fn state(&self) -> MutationState<D::Detail> {
        self.tracker.snapshot()
    }
}

pub struct RemoveMutation<D: ResourceDescriptor> {
    binding: Arc<Binding<D>>,
    options: RemoveOptions,
    tracker: Tracker<String>,
}

impl<D: ResourceDescriptor> RemoveMutation<D> {
    pub(crate) fn new(binding: Arc<Binding<D>>, options: RemoveOptions) -> Self {
        Self {
            binding,
            options,
            tracker: Tracker::new(),
        }
    }

    /// Delete `id`. On success the state's `data` holds the removed id.
    pub async fn mutate(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let attempt = self.tracker.begin();

        let optimistic = self.options.optimistic.then(|| {
            let descriptor = Arc::clone(&self.binding.descriptor);
            OptimisticUpdate::apply(&self.binding.lists, &self.binding.keys.lists(), |page| {
                page.without(|item| descriptor.item_id(item) == id)
            })
        });

        let result = self.binding.descriptor.remove(id, cancel.clone()).await;

        if let Some(update) = optimistic {
            match &result {
                Ok(()) => update.commit(),
                Err(e) => {
                    debug!(id, error = %e, "remove failed, rolling back cached lists");
                    update.rollback();
                }
            }
        }

        match &self.options.invalidate {
            None => {
                self.binding.invalidate(&self.binding.keys.lists());
            }
            Some(lists) => {
                for params in lists {
                    self.binding.invalidate(&self.binding.keys.list(params));
                }
            }
        }

        attempt.finish(&result.clone().map(|()| Arc::new(id.to_string())));
        result
    }

    pub fn state(&self) -> MutationState<String> {
        self.tracker.snapshot()
    }
}

/// Transaction over cached entries written ahead of a server confirmation.
///
/// Captures each entry's previous data. `rollback` (or dropping the
/// transaction without `commit`) restores every captured entry.
pub struct OptimisticUpdate<T: Send + Sync + 'static> {
    cache: Arc<QueryCache<T>>,
    previous: Vec<(QueryKey, Arc<T>)>,
    settled: bool,
}

impl<T: Send + Sync + 'static> OptimisticUpdate<T> {
    /// Replace the data of every entry under `prefix` with `update(data)`.
    /// In-flight fetches for those entries are detached first so they cannot
    /// overwrite the optimistic data.
    pub(crate) fn apply(
        cache: &Arc<QueryCache<T>>,
        prefix: &QueryKey,
        mut update: impl FnMut(&T) -> T,
    ) -> Self {
        cache.detach(prefix);
        let previous = cache.with_data(prefix);
        for (key, data) in &previous {
            cache.set_data(key, Arc::new(update(data)));
        }
        debug!(prefix = %prefix, entries = previous.len(), "applied optimistic update");
        Self {
            cache: Arc::clone(cache),
            previous,
            settled: false,
        }
    }

    /// Number of entries touched.
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Keep the optimistic data.
    pub fn commit(mut self) {
        self.settled = true;
    }

    /// Restore every touched entry.
    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        for (key, data) in self.previous.drain(..) {
            self.cache.set_data(&key, data);
        }
    }
}

impl<T: Send + Sync + 'static> Drop for OptimisticUpdate<T> {
    fn drop(&mut self) {
        self.restore();
    }
}
