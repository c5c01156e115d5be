/// Prometheusメトリクス定義。
use prometheus::{
    register_counter_with_registry, register_gauge_with_registry,
    register_histogram_with_registry, Counter, Gauge, Histogram, Registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub requests_total: Counter,
    pub cache_hits: Counter,
    pub cache_stale_served: Counter,
    pub cache_misses: Counter,
    pub cache_write_failures: Counter,
    pub provider_failures: Counter,
    pub provider_timeouts: Counter,
    pub provider_retries: Counter,
    pub all_sources_failed: Counter,
    pub fallback_pages_served: Counter,
    pub slots_placed: Counter,
    pub impressions_total: Counter,
    pub slot_refreshes: Counter,
    pub slots_exhausted: Counter,

    // ヒストグラム
    pub request_duration: Histogram,
    pub fetch_duration: Histogram,
    pub placement_duration: Histogram,

    // ゲージ
    pub active_sessions: Gauge,
    pub cached_entries: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    #[allow(clippy::too_many_lines)]
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            requests_total: register_counter_with_registry!(
                "listing_requests_total",
                "Total number of listing requests handled",
                registry
            )?,
            cache_hits: register_counter_with_registry!(
                "listing_cache_hits_total",
                "Listing responses served from a fresh cache entry",
                registry
            )?,
            cache_stale_served: register_counter_with_registry!(
                "listing_cache_stale_served_total",
                "Listing responses served from an expired cache entry as fallback",
                registry
            )?,
            cache_misses: register_counter_with_registry!(
                "listing_cache_misses_total",
                "Listing requests that required a full pipeline run",
                registry
            )?,
            cache_write_failures: register_counter_with_registry!(
                "listing_cache_write_failures_total",
                "Cache store attempts rejected at capacity",
                registry
            )?,
            provider_failures: register_counter_with_registry!(
                "listing_provider_failures_total",
                "Provider fetches that failed for any reason",
                registry
            )?,
            provider_timeouts: register_counter_with_registry!(
                "listing_provider_timeouts_total",
                "Provider fetches cancelled at the per-source deadline",
                registry
            )?,
            provider_retries: register_counter_with_registry!(
                "listing_provider_retries_total",
                "Retryable provider failures re-driven once",
                registry
            )?,
            all_sources_failed: register_counter_with_registry!(
                "listing_all_sources_failed_total",
                "Requests where every configured provider failed",
                registry
            )?,
            fallback_pages_served: register_counter_with_registry!(
                "listing_fallback_pages_served_total",
                "Responses built from stale cache or archived fallback content",
                registry
            )?,
            slots_placed: register_counter_with_registry!(
                "listing_slots_placed_total",
                "Ad slots interleaved into composed pages",
                registry
            )?,
            impressions_total: register_counter_with_registry!(
                "listing_impressions_total",
                "Impression events recorded for loaded creatives",
                registry
            )?,
            slot_refreshes: register_counter_with_registry!(
                "listing_slot_refreshes_total",
                "Slot refresh cycles applied to visible slots",
                registry
            )?,
            slots_exhausted: register_counter_with_registry!(
                "listing_slots_exhausted_total",
                "Slots degraded to house content after the refresh ceiling",
                registry
            )?,
            request_duration: register_histogram_with_registry!(
                "listing_request_duration_seconds",
                "Duration of GET /v1/listings handlers",
                registry
            )?,
            fetch_duration: register_histogram_with_registry!(
                "listing_fetch_duration_seconds",
                "Duration of the provider fan-out phase",
                registry
            )?,
            placement_duration: register_histogram_with_registry!(
                "listing_placement_duration_seconds",
                "Duration of normalization plus slot placement",
                registry
            )?,
            active_sessions: register_gauge_with_registry!(
                "listing_active_sessions",
                "Sessions tracked in the registry",
                registry
            )?,
            cached_entries: register_gauge_with_registry!(
                "listing_cached_entries",
                "Entries currently held by the edge cache",
                registry
            )?,
        })
    }
}
