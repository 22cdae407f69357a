//! Types shared across the catalog client crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
