//! Transport metrics
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! whether a recorder is installed.
//!
//! - `catalog_http_requests_total` (counter): labels `method`, `status`
//! - `catalog_http_request_duration_seconds` (histogram): label `status`
//! - `catalog_token_refresh_total` (counter): label `outcome`
//!
//! Requests that never produced a response use the error class as `status`
//! (`timeout`, `network`, `cancelled`).

use std::time::Duration;

pub(crate) const REQUESTS_TOTAL: &str = "catalog_http_requests_total";
pub(crate) const REQUEST_DURATION: &str = "catalog_http_request_duration_seconds";
pub(crate) const REFRESH_TOTAL: &str = "catalog_token_refresh_total";

/// Record one completed HTTP attempt.
pub(crate) fn record_request(method: &str, status: &str, elapsed: Duration) {
    metrics::counter!(REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION, "status" => status.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a settled refresh: `success`, `failure` or `no_refresh_token`.
pub(crate) fn record_refresh(outcome: &'static str) {
    metrics::counter!(REFRESH_TOTAL, "outcome" => outcome).increment(1);
}
