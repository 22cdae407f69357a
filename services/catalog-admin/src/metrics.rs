//! Prometheus recorder for the transport's request and refresh metrics
//!
//! The CLI is short-lived, so there is no scrape endpoint; `--metrics`
//! renders the collected values to stderr after the command finishes.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const REQUEST_DURATION: &str = "catalog_http_request_duration_seconds";

/// Buckets from 5ms up to the 30s worst case (timeout plus one retry).
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)
        .context("failed to set histogram buckets")
}

/// Install the global recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_duration_renders_as_histogram() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!(REQUEST_DURATION, "method" => "GET", "status" => "200").record(0.02);
        });

        let output = handle.render();
        assert!(
            output.contains("catalog_http_request_duration_seconds_bucket"),
            "expected histogram buckets, got:\n{output}"
        );
        assert!(output.contains(r#"le="0.025""#));
    }
}
