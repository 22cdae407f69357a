//! Generic REST descriptor
//!
//! Every catalog collection follows the same shape:
//! `GET {collection}`, `GET|PUT|DELETE {collection}/{id}`,
//! `POST {collection}`. An `Entity` names the collection and payload types;
//! `RestDescriptor<E>` turns that into a `ResourceDescriptor` over the
//! authenticated transport.

use std::marker::PhantomData;

use catalog_resource::{BoxFuture, CancellationToken, ListParams, Page, ResourceDescriptor};
use catalog_transport::{ApiRequest, Transport};
use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::routes;

/// One catalog collection.
pub trait Entity: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Cache namespace.
    const KEY: &'static str;
    /// Collection path, e.g. `/brands`.
    const COLLECTION: &'static str;

    type Create: Serialize + Send + Sync + 'static;
    type Update: Serialize + Send + Sync + 'static;

    fn id(&self) -> &str;

    /// Request for one list page. Collections with a dedicated search
    /// endpoint override this.
    fn list_request(params: &ListParams) -> catalog_transport::Result<ApiRequest> {
        ApiRequest::get(Self::COLLECTION).query(params)
    }
}

pub struct RestDescriptor<E> {
    transport: Transport,
    _entity: PhantomData<fn() -> E>,
}

impl<E> RestDescriptor<E> {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            _entity: PhantomData,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl<E> Clone for RestDescriptor<E> {
    fn clone(&self) -> Self {
        Self::new(self.transport.clone())
    }
}

impl<E: Entity> RestDescriptor<E> {
    async fn call<T: DeserializeOwned>(
        &self,
        request: catalog_transport::Result<ApiRequest>,
        cancel: CancellationToken,
    ) -> catalog_resource::Result<T> {
        let request = request?;
        debug!(
            resource = E::KEY,
            method = %request.method(),
            path = request.path(),
            "resource request"
        );
        Ok(self.transport.send_json(request, &cancel).await?)
    }
}

impl<E: Entity> ResourceDescriptor for RestDescriptor<E> {
    type Item = E;
    type Detail = E;
    type Create = E::Create;
    type Update = E::Update;

    fn key(&self) -> &str {
        E::KEY
    }

    fn list<'a>(
        &'a self,
        params: &'a ListParams,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, catalog_resource::Result<Page<E>>> {
        self.call(E::list_request(params), cancel).boxed()
    }

    fn detail<'a>(
        &'a self,
        id: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, catalog_resource::Result<E>> {
        let request = ApiRequest::get(routes::member(E::COLLECTION, id));
        self.call(Ok(request), cancel).boxed()
    }

    fn create<'a>(
        &'a self,
        payload: &'a E::Create,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, catalog_resource::Result<E>> {
        let request = ApiRequest::post(E::COLLECTION).json(payload);
        self.call(request, cancel).boxed()
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        payload: &'a E::Update,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, catalog_resource::Result<E>> {
        let request = ApiRequest::put(routes::member(E::COLLECTION, id)).json(payload);
        self.call(request, cancel).boxed()
    }

    fn remove<'a>(
        &'a self,
        id: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, catalog_resource::Result<()>> {
        let request = ApiRequest::delete(routes::member(E::COLLECTION, id));
        async move {
            // Body (if any) is ignored
            let _: serde_json::Value = self.call(Ok(request), cancel).await?;
            Ok(())
        }
        .boxed()
    }

    fn item_id(&self, item: &E) -> String {
        item.id().to_string()
    }

    fn detail_id(&self, detail: &E) -> Option<String> {
        Some(detail.id().to_string())
    }
}
