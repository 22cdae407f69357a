//! Typed catalog API: brands, categories, products and the admin session
//!
//! Each collection is a `RestDescriptor` over the shared authenticated
//! `Transport`, wrapped in a `Resource` for caching. `Catalog` bundles them
//! so every resource shares one transport (and so one token refresh).

pub mod auth;
pub mod brands;
pub mod categories;
pub mod error;
pub mod products;
pub mod rest;
pub mod routes;

use catalog_resource::{Resource, ResourceOptions};
use catalog_transport::Transport;

pub use auth::{AdminUser, AuthApi};
pub use brands::{Brand, BrandCreate, BrandUpdate, Brands};
pub use categories::{Categories, Category, CategoryCreate, CategoryUpdate};
pub use error::{ApiError, Result};
pub use products::{
    Attributes, Dimensions, PricingTier, Product, ProductCreate, ProductUpdate, Products,
    WarehouseAvailability,
};
pub use rest::{Entity, RestDescriptor};

/// Every catalog resource over one transport.
#[derive(Clone)]
pub struct Catalog {
    transport: Transport,
    pub auth: AuthApi,
    pub brands: Resource<Brands>,
    pub categories: Resource<Categories>,
    pub products: Resource<Products>,
}

impl Catalog {
    pub fn new(transport: Transport) -> Self {
        Self::with_options(transport, ResourceOptions::default())
    }

    pub fn with_options(transport: Transport, options: ResourceOptions) -> Self {
        Self {
            auth: AuthApi::new(transport.clone()),
            brands: Resource::with_options(Brands::new(transport.clone()), options),
            categories: Resource::with_options(Categories::new(transport.clone()), options),
            products: Resource::with_options(Products::new(transport.clone()), options),
            transport,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Json;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use catalog_auth::{MemoryTokenStore, TokenPair, TokenStore};
    use catalog_resource::{CancellationToken, CreateOptions, ListParams, RemoveOptions};
    use catalog_transport::TransportConfig;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Backend {
        access: Arc<Mutex<String>>,
        brands: Arc<Mutex<Vec<Value>>>,
        refresh_calls: Arc<AtomicUsize>,
        logout_calls: Arc<AtomicUsize>,
        last_search: Arc<Mutex<Option<HashMap<String, String>>>>,
    }

    impl Backend {
        fn authorized(&self, headers: &HeaderMap) -> bool {
            let expected = format!("Bearer {}", self.access.lock());
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected)
        }
    }

    type Reply = (StatusCode, Json<Value>);

    fn unauthorized() -> Reply {
        (StatusCode::UNAUTHORIZED, Json(json!({"message": "Token expired"})))
    }

    async fn login(State(b): State<Backend>, Json(body): Json<Value>) -> Reply {
        if body["username"] == "admin" && body["password"] == "password" {
            *b.access.lock() = "at_login".into();
            (
                StatusCode::OK,
                Json(json!({
                    "accessToken": "at_login",
                    "refreshToken": "rt_login",
                    "user": {"id": 1, "username": "admin", "role": "admin"}
                })),
            )
        } else {
            (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad credentials"})))
        }
    }

    async fn me(State(b): State<Backend>, headers: HeaderMap) -> Reply {
        if !b.authorized(&headers) {
            return unauthorized();
        }
        (StatusCode::OK, Json(json!({"id": "1", "username": "admin", "email": "admin@example.com"})))
    }

    async fn logout(State(b): State<Backend>) -> StatusCode {
        b.logout_calls.fetch_add(1, Ordering::SeqCst);
        StatusCode::INTERNAL_SERVER_ERROR
    }

    async fn refresh(State(b): State<Backend>, Json(body): Json<Value>) -> Reply {
        b.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        if body["refreshToken"] != "rt_old" {
            return unauthorized();
        }
        *b.access.lock() = "at_new".into();
        (StatusCode::OK, Json(json!({"accessToken": "at_new", "refreshToken": "rt_new"})))
    }

    async fn list_brands(State(b): State<Backend>, headers: HeaderMap) -> Reply {
        if !b.authorized(&headers) {
            return unauthorized();
        }
        let items = b.brands.lock().clone();
        let total = items.len();
        (
            StatusCode::OK,
            Json(json!({
                "items": items,
                "pagination": {"page": 1, "limit": 10, "total": total, "has_next": false}
            })),
        )
    }

    async fn create_brand(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
        if !b.authorized(&headers) {
            return unauthorized();
        }
        let mut brands = b.brands.lock();
        let mut brand = body;
        brand["id"] = json!(format!("b{}", brands.len() + 1));
        brands.push(brand.clone());
        (StatusCode::CREATED, Json(brand))
    }

    async fn delete_brand(State(b): State<Backend>, headers: HeaderMap, Path(id): Path<String>) -> StatusCode {
        if !b.authorized(&headers) {
            return StatusCode::UNAUTHORIZED;
        }
        b.brands.lock().retain(|brand| brand["id"] != id.as_str());
        StatusCode::NO_CONTENT
    }

    async fn list_categories(State(b): State<Backend>, headers: HeaderMap) -> Reply {
        if !b.authorized(&headers) {
            return unauthorized();
        }
        (StatusCode::OK, Json(json!({"items": [{"id": "c1", "name": "Grains"}]})))
    }

    async fn search_products(
        State(b): State<Backend>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> Reply {
        if !b.authorized(&headers) {
            return unauthorized();
        }
        *b.last_search.lock() = Some(query);
        (StatusCode::OK, Json(json!({"items": []})))
    }

    async fn start(backend: Backend) -> String {
        let app = axum::Router::new()
            .route("/auth/login", post(login))
            .route("/auth/me", get(me))
            .route("/auth/logout", post(logout))
            .route("/auth/refresh", post(refresh))
            .route("/brands", get(list_brands).post(create_brand))
            .route("/brands/{id}", axum::routing::delete(delete_brand))
            .route("/categories", get(list_categories))
            .route("/products/search", get(search_products))
            .with_state(backend);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn catalog(base: &str, store: Arc<MemoryTokenStore>) -> Catalog {
        Catalog::new(Transport::new(TransportConfig::new(base), store).unwrap())
    }

    fn seeded_backend() -> Backend {
        let backend = Backend::default();
        *backend.access.lock() = "at_valid".into();
        backend
            .brands
            .lock()
            .push(json!({"id": "b1", "name": "Acme", "country": null}));
        backend
    }

    fn logged_in(access: &str, refresh: &str) -> Arc<MemoryTokenStore> {
        Arc::new(MemoryTokenStore::with_tokens(TokenPair {
            access_token: access.into(),
            refresh_token: refresh.into(),
        }))
    }

    #[tokio::test]
    async fn login_me_logout_round() {
        let backend = Backend::default();
        let base = start(backend.clone()).await;
        let store = Arc::new(MemoryTokenStore::new());
        let catalog = catalog(&base, store.clone());
        let cancel = CancellationToken::new();

        let user = catalog.auth.login("admin", "password").await.unwrap().unwrap();
        assert_eq!(user.id, "1");
        assert_eq!(user.role.as_deref(), Some("admin"));
        assert_eq!(store.refresh_token().await.unwrap().expose(), "rt_login");

        let me = catalog.auth.me(&cancel).await.unwrap();
        assert_eq!(me.email.as_deref(), Some("admin@example.com"));

        // Server-side logout fails, local credentials are cleared anyway
        catalog.auth.logout(&cancel).await.unwrap();
        assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
        assert!(store.access_token().await.is_none());

        let err = catalog.auth.me(&cancel).await.unwrap_err();
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let base = start(Backend::default()).await;
        let store = Arc::new(MemoryTokenStore::new());
        let catalog = catalog(&base, store.clone());

        let err = catalog.auth.login("admin", "nope").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Auth(catalog_auth::Error::InvalidCredentials(_))
        ));
        assert!(store.access_token().await.is_none());
    }

    #[tokio::test]
    async fn create_brand_refreshes_cached_list() {
        let backend = seeded_backend();
        let base = start(backend.clone()).await;
        let catalog = catalog(&base, logged_in("at_valid", "rt_old"));
        let cancel = CancellationToken::new();

        let list = catalog.brands.use_list(ListParams::new());
        let first = list.fetch(&cancel).await.unwrap();
        assert_eq!(first.items[0].name, "Acme");
        assert!(first.items[0].country.is_none());

        let created = catalog
            .brands
            .use_create(CreateOptions::default())
            .mutate(
                BrandCreate {
                    name: "Globex".into(),
                    ..BrandCreate::default()
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(created.id, "b2");

        let names: Vec<_> = list
            .fetch(&cancel)
            .await
            .unwrap()
            .items
            .iter()
            .map(|b| b.name.clone())
            .collect();
        assert_eq!(names, vec!["Acme", "Globex"]);
    }

    #[tokio::test]
    async fn remove_brand_accepts_empty_response() {
        let backend = seeded_backend();
        let base = start(backend.clone()).await;
        let catalog = catalog(&base, logged_in("at_valid", "rt_old"));
        let cancel = CancellationToken::new();

        catalog.brands.use_list(ListParams::new()).fetch(&cancel).await.unwrap();
        let remove = catalog.brands.use_remove(RemoveOptions {
            optimistic: true,
            invalidate: None,
        });
        remove.mutate("b1", &cancel).await.unwrap();

        assert!(backend.brands.lock().is_empty());
        let page = catalog.brands.use_list(ListParams::new()).fetch(&cancel).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_across_resources() {
        let backend = seeded_backend();
        *backend.access.lock() = "at_rotated".into();
        let base = start(backend.clone()).await;
        let store = logged_in("at_stale", "rt_old");
        let catalog = catalog(&base, store.clone());
        let cancel = CancellationToken::new();

        let brands = catalog.brands.use_list(ListParams::new());
        let categories = catalog.categories.use_list(ListParams::new());
        let (brands, categories) = tokio::join!(brands.fetch(&cancel), categories.fetch(&cancel));

        assert_eq!(brands.unwrap().len(), 1);
        assert_eq!(categories.unwrap().items[0].name, "Grains");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().await.unwrap().expose(), "at_new");
    }

    #[tokio::test]
    async fn product_search_sends_limit_and_q_only() {
        let backend = seeded_backend();
        let base = start(backend.clone()).await;
        let catalog = catalog(&base, logged_in("at_valid", "rt_old"));
        let cancel = CancellationToken::new();

        let params = ListParams::new().page(4).limit(5).search("rice");
        catalog.products.use_list(params).fetch(&cancel).await.unwrap();

        let query = backend.last_search.lock().clone().unwrap();
        assert_eq!(query.len(), 2);
        assert_eq!(query["q"], "rice");
        assert_eq!(query["limit"], "5");
    }
}
