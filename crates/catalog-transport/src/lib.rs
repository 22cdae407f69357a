//! Authenticated HTTP transport for the catalog API
//!
//! Wraps a `reqwest::Client` with bearer-token injection from a
//! `TokenStore`, per-request timeout and cancellation, and single-flight
//! token refresh:
//!
//! 1. Request goes out with the stored access token
//! 2. Server answers 401 → request joins the refresh queue
//! 3. First request in the queue spawns the refresh call; the rest wait
//! 4. Refresh succeeds → tokens stored, every waiter retried once (FIFO)
//! 5. Refresh fails → credentials cleared, every waiter gets the error

pub mod client;
pub mod config;
pub mod error;
mod metrics;
pub mod refresh;
pub mod request;

pub use client::Transport;
pub use config::{DEFAULT_TIMEOUT, TransportConfig};
pub use error::{Error, Result};
pub use refresh::RefreshPhase;
pub use request::ApiRequest;
pub use tokio_util::sync::CancellationToken;
