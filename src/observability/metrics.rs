use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::error::{AppError, AppResult};

/// Prometheus metrics registry and collectors
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

/// All application metrics
pub struct Metrics {
    // Answer metrics
    pub ask_total: IntCounter,
    pub ask_duration_seconds: Histogram,
    pub answer_cache_hits_total: IntCounter,
    pub answer_cache_misses_total: IntCounter,
    pub generation_errors_total: IntCounterVec,

    // Retrieval metrics
    pub embedding_fallback_total: IntCounter,

    // Cache introspection, refreshed on scrape
    pub cache_entries: IntGaugeVec,
    pub cache_memory_bytes: IntGaugeVec,
}

fn internal(what: &str, e: prometheus::Error) -> AppError {
    AppError::Internal(format!("Failed to create {} metric: {}", what, e))
}

impl MetricsRegistry {
    /// Create a new metrics registry with all collectors
    pub fn new() -> AppResult<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);

        Ok(Self { registry, metrics })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Copy cache sizes into the gauges
    pub fn record_cache_stats(&self, stats: &BTreeMap<String, CacheStats>) {
        for (name, s) in stats {
            self.metrics
                .cache_entries
                .with_label_values(&[name.as_str(), "memory"])
                .set(s.memory_entries as i64);
            self.metrics
                .cache_entries
                .with_label_values(&[name.as_str(), "disk"])
                .set(s.disk_entries as i64);
            self.metrics
                .cache_memory_bytes
                .with_label_values(&[name.as_str()])
                .set(s.memory_bytes as i64);
        }
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> AppResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| AppError::Internal(format!("Failed to convert metrics to string: {}", e)))
    }
}

impl Metrics {
    fn new(registry: &Registry) -> AppResult<Self> {
        let ask_total = IntCounter::new("ask_total", "Total number of questions received")
            .map_err(|e| internal("ask_total", e))?;

        let ask_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("ask_duration_seconds", "Duration of ask requests in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .map_err(|e| internal("ask_duration_seconds", e))?;

        let answer_cache_hits_total =
            IntCounter::new("answer_cache_hits_total", "Answers served from the answer cache")
                .map_err(|e| internal("answer_cache_hits_total", e))?;

        let answer_cache_misses_total =
            IntCounter::new("answer_cache_misses_total", "Questions that required generation")
                .map_err(|e| internal("answer_cache_misses_total", e))?;

        let generation_errors_total = IntCounterVec::new(
            Opts::new("generation_errors_total", "Failed generation calls by kind"),
            &["kind"],
        )
        .map_err(|e| internal("generation_errors_total", e))?;

        let embedding_fallback_total = IntCounter::new(
            "embedding_fallback_total",
            "Retrievals computed with the fallback embedding strategy",
        )
        .map_err(|e| internal("embedding_fallback_total", e))?;

        let cache_entries = IntGaugeVec::new(
            Opts::new("cache_entries", "Entries held per cache and tier"),
            &["cache", "tier"],
        )
        .map_err(|e| internal("cache_entries", e))?;

        let cache_memory_bytes = IntGaugeVec::new(
            Opts::new("cache_memory_bytes", "Approximate bytes held in the memory tier"),
            &["cache"],
        )
        .map_err(|e| internal("cache_memory_bytes", e))?;

        registry
            .register(Box::new(ask_total.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register ask_total: {}", e)))?;
        registry
            .register(Box::new(ask_duration_seconds.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register ask_duration_seconds: {}", e)))?;
        registry
            .register(Box::new(answer_cache_hits_total.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register answer_cache_hits_total: {}", e)))?;
        registry
            .register(Box::new(answer_cache_misses_total.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register answer_cache_misses_total: {}", e)))?;
        registry
            .register(Box::new(generation_errors_total.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register generation_errors_total: {}", e)))?;
        registry
            .register(Box::new(embedding_fallback_total.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register embedding_fallback_total: {}", e)))?;
        registry
            .register(Box::new(cache_entries.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register cache_entries: {}", e)))?;
        registry
            .register(Box::new(cache_memory_bytes.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to register cache_memory_bytes: {}", e)))?;

        Ok(Self {
            ask_total,
            ask_duration_seconds,
            answer_cache_hits_total,
            answer_cache_misses_total,
            generation_errors_total,
            embedding_fallback_total,
            cache_entries,
            cache_memory_bytes,
        })
    }
}
