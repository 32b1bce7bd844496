//! Prometheus metrics collection.
//!
//! Provides export and re-evaluation metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Export request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExportLabels {
    pub resource: String,
    pub format: String,
    pub strategy: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// Export requests by resource/format/strategy.
    pub export_requests: Family<ExportLabels, Counter>,

    /// Time from request to the last body byte.
    pub export_duration_seconds: Family<ExportLabels, Histogram>,

    /// Re-evaluation messages published.
    pub reeval_messages_sent: Counter,

    /// Time spent publishing one re-evaluation run.
    pub reeval_send_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let export_requests = Family::<ExportLabels, Counter>::default();
        registry.register(
            "export_requests",
            "Export requests served",
            export_requests.clone(),
        );

        let export_duration_seconds =
            Family::<ExportLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 14))
            });
        registry.register(
            "export_duration_seconds",
            "Export duration in seconds",
            export_duration_seconds.clone(),
        );

        let reeval_messages_sent = Counter::default();
        registry.register(
            "reeval_messages_sent",
            "Re-evaluation messages published",
            reeval_messages_sent.clone(),
        );

        let reeval_send_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 14));
        registry.register(
            "reeval_send_duration_seconds",
            "Re-evaluation publish duration in seconds",
            reeval_send_duration_seconds.clone(),
        );

        Self {
            registry,
            export_requests,
            export_duration_seconds,
            reeval_messages_sent,
            reeval_send_duration_seconds,
        }
    }

    /// Record an export that started streaming.
    pub fn record_export(&self, resource: &str, format: &str, strategy: &str) -> ExportLabels {
        let labels = ExportLabels {
            resource: resource.to_string(),
            format: format.to_string(),
            strategy: strategy.to_string(),
        };
        self.export_requests.get_or_create(&labels).inc();
        labels
    }

    /// Record how long an export took end to end.
    pub fn record_export_duration(&self, labels: &ExportLabels, duration_secs: f64) {
        self.export_duration_seconds
            .get_or_create(labels)
            .observe(duration_secs);
    }

    /// Record one re-evaluation run.
    pub fn record_reeval(&self, sent: u64, duration_secs: f64) {
        self.reeval_messages_sent.inc_by(sent);
        self.reeval_send_duration_seconds.observe(duration_secs);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}
