//! Prometheus metrics for the request pipeline.
//!
//! Each server owns its registry so several servers (and tests) can run in
//! one process. Exposed at `GET /asap/metrics`.

use crate::constants::REQUEST_LATENCY_BUCKETS;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Container for all ASAP request metrics.
#[derive(Clone)]
pub struct AsapMetrics {
    registry: Registry,

    /// Request counter - labels: payload_type, status
    pub requests_total: CounterVec,

    /// Error counter - labels: payload_type, error_type
    pub requests_error_total: CounterVec,

    /// Request duration histogram - labels: payload_type, status
    pub request_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for AsapMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsapMetrics").finish_non_exhaustive()
    }
}

impl AsapMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("asap_requests_total", "Total number of ASAP requests"),
            &["payload_type", "status"],
        )?;
        let requests_error_total = CounterVec::new(
            Opts::new("asap_requests_error_total", "Total number of failed ASAP requests"),
            &["payload_type", "error_type"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "asap_request_duration_seconds",
                "ASAP request duration in seconds",
            )
            .buckets(REQUEST_LATENCY_BUCKETS.to_vec()),
            &["payload_type", "status"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_error_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            requests_error_total,
            request_duration_seconds,
        })
    }

    /// Record a successful request.
    pub fn record_success(&self, payload_type: &str, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[payload_type, "success"])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[payload_type, "success"])
            .observe(duration_secs);
    }

    /// Record a failed request.
    pub fn record_error(&self, payload_type: &str, error_type: &str, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[payload_type, "error"])
            .inc();
        self.requests_error_total
            .with_label_values(&[payload_type, error_type])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[payload_type, "error"])
            .observe(duration_secs);
    }

    /// Render the registry in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() -> Result<(), String> {
        let metrics = AsapMetrics::new().map_err(|e| e.to_string())?;
        metrics.record_success("task.request", 0.012);
        metrics.record_error("other", "routing/handler_not_found", 0.001);

        let text = metrics.encode().map_err(|e| e.to_string())?;
        assert!(text.contains(r#"asap_requests_total{payload_type="task.request",status="success"} 1"#));
        assert!(text.contains(
            r#"asap_requests_error_total{error_type="routing/handler_not_found",payload_type="other"} 1"#
        ));
        assert!(text.contains("asap_request_duration_seconds_bucket"));
        Ok(())
    }

    #[test]
    fn test_instances_are_isolated() -> Result<(), String> {
        let a = AsapMetrics::new().map_err(|e| e.to_string())?;
        let b = AsapMetrics::new().map_err(|e| e.to_string())?;
        a.record_success("message.send", 0.1);
        let text = b.encode().map_err(|e| e.to_string())?;
        assert!(!text.contains("message.send"));
        Ok(())
    }
}
