//! Prometheus counters exposed at /metrics

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Entries written to the catalog, by source and content type
    pub static ref INGESTED_ENTRIES: IntCounterVec = register_int_counter_vec!(
        "iptv_ingested_entries_total",
        "Catalog entries classified during ingest",
        &["source", "content_type"]
    )
    .unwrap();

    /// Upsert chunks by table and outcome (ok, retried_ok, failed)
    pub static ref UPSERT_CHUNKS: IntCounterVec = register_int_counter_vec!(
        "iptv_upsert_chunks_total",
        "Chunked upserts by outcome",
        &["table", "outcome"]
    )
    .unwrap();

    /// TMDB lookups by outcome (found, not_found, cached, rate_limited, unauthorized, error)
    pub static ref ENRICHMENT_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "iptv_enrichment_requests_total",
        "Metadata lookups by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Notifications inserted by the fan-out
    pub static ref NOTIFICATIONS_CREATED: IntCounterVec = register_int_counter_vec!(
        "iptv_notifications_created_total",
        "Favorite-team notifications created",
        &["trigger"]
    )
    .unwrap();
}

pub fn record_ingested(source: &str, content_type: &str, count: u64) {
    INGESTED_ENTRIES.with_label_values(&[source, content_type]).inc_by(count);
}

pub fn record_chunk(table: &str, outcome: &str) {
    UPSERT_CHUNKS.with_label_values(&[table, outcome]).inc();
}

pub fn record_enrichment(outcome: &str) {
    ENRICHMENT_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_notifications(trigger: &str, count: u64) {
    NOTIFICATIONS_CREATED.with_label_values(&[trigger]).inc_by(count);
}
