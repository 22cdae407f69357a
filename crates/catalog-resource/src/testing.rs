//! In-memory descriptor shared by the unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::descriptor::ResourceDescriptor;
use crate::error::{ResourceError, Result};
use crate::key::{ListParams, Page, Pagination};

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: String,
    pub name: String,
}

pub fn widget(id: &str, name: &str) -> Widget {
    Widget {
        id: id.into(),
        name: name.into(),
    }
}

fn status(status: u16, body: &str) -> ResourceError {
    catalog_transport::Error::Status {
        status,
        body: body.into(),
    }
    .into()
}

#[derive(Default)]
pub struct MockDescriptor {
    items: Mutex<Vec<Widget>>,
    next_id: AtomicUsize,
    delay: Duration,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub fail_remove: AtomicBool,
}

impl MockDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Widget>) -> Self {
        Self {
            next_id: AtomicUsize::new(items.len() + 1),
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Delay every operation by `ms` milliseconds.
    pub fn delayed(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = cancel.cancelled() => Err(catalog_transport::Error::Cancelled.into()),
        }
    }

    fn page(&self, params: &ListParams) -> Page<Widget> {
        let items = self.items.lock().clone();
        let total = items.len();
        let limit = params.limit.unwrap_or(10).max(1) as usize;

        if let Some(cursor) = &params.cursor {
            let offset: usize = cursor.parse().unwrap_or(0);
            let end = (offset + limit).min(total);
            let next = (end < total).then(|| end.to_string());
            return Page {
                items: items[offset.min(total)..end].to_vec(),
                pagination: Some(Pagination {
                    limit: Some(limit as u32),
                    cursor: Some(cursor.clone()),
                    next_cursor: Some(next),
                    ..Pagination::default()
                }),
            };
        }

        let page = params.page.unwrap_or(1).max(1) as usize;
        let start = ((page - 1) * limit).min(total);
        let end = (start + limit).min(total);
        let total_pages = total.div_ceil(limit);
        Page {
            items: items[start..end].to_vec(),
            pagination: Some(Pagination {
                page: Some(page as u32),
                limit: Some(limit as u32),
                total: Some(total as u64),
                total_pages: Some(total_pages as u64),
                has_next: Some(page < total_pages),
                has_previous: Some(page > 1),
                ..Pagination::default()
            }),
        }
    }
}

impl ResourceDescriptor for MockDescriptor {
    type Item = Widget;
    type Detail = Widget;
    type Create = String;
    type Update = String;

    fn key(&self) -> &str {
        "widgets"
    }

    fn list<'a>(&'a self, params: &'a ListParams, cancel: CancellationToken) -> BoxFuture<'a, Result<Page<Widget>>> {
        async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.pause(&cancel).await?;
            Ok(self.page(params))
        }
        .boxed()
    }

    fn detail<'a>(&'a self, id: &'a str, cancel: CancellationToken) -> BoxFuture<'a, Result<Widget>> {
        async move {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            self.pause(&cancel).await?;
            self.items
                .lock()
                .iter()
                .find(|w| w.id == id)
                .cloned()
                .ok_or_else(|| status(404, "not found"))
        }
        .boxed()
    }

    fn create<'a>(&'a self, name: &'a String, cancel: CancellationToken) -> BoxFuture<'a, Result<Widget>> {
        async move {
            self.pause(&cancel).await?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            let created = widget(&id, name);
            self.items.lock().push(created.clone());
            Ok(created)
        }
        .boxed()
    }

    fn update<'a>(&'a self, id: &'a str, name: &'a String, cancel: CancellationToken) -> BoxFuture<'a, Result<Widget>> {
        async move {
            self.pause(&cancel).await?;
            let mut items = self.items.lock();
            let item = items
                .iter_mut()
                .find(|w| w.id == id)
                .ok_or_else(|| status(404, "not found"))?;
            item.name = name.clone();
            Ok(item.clone())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, id: &'a str, cancel: CancellationToken) -> BoxFuture<'a, Result<()>> {
        async move {
            self.pause(&cancel).await?;
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(status(500, "remove failed"));
            }
            self.items.lock().retain(|w| w.id != id);
            Ok(())
        }
        .boxed()
    }

    fn item_id(&self, item: &Widget) -> String {
        item.id.clone()
    }

    fn detail_id(&self, detail: &Widget) -> Option<String> {
        Some(detail.id.clone())
    }
}
