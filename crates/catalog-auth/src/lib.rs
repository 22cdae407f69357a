//! Credential storage and auth endpoint calls for the catalog API
//!
//! Standalone library with no dependency on the transport. The transport
//! consumes it in two places:
//! 1. every request reads the access token via `TokenStore::access_token()`
//! 2. on a 401 the refresh routine calls `token::refresh_tokens()` and writes
//!    the result back with `TokenStore::set_tokens()`, or calls
//!    `TokenStore::clear()` when the refresh fails

pub mod credentials;
pub mod error;
pub mod token;

pub use credentials::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use error::{Error, Result};
pub use token::{LoginResponse, TokenPair, login, refresh_tokens};
