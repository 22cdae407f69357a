//! API paths, relative to the transport's base URL

pub const LOGIN: &str = "/auth/login";
pub const ME: &str = "/auth/me";
pub const LOGOUT: &str = "/auth/logout";

pub const BRANDS: &str = "/brands";
pub const CATEGORIES: &str = "/categories";
pub const PRODUCTS: &str = "/products";
pub const PRODUCTS_SEARCH: &str = "/products/search";

/// `{collection}/{id}`
pub fn member(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}
