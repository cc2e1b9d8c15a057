//! Chunked database writes with bounded retry
//!
//! Large uploads are split into fixed-size chunks. Each chunk is written in
//! its own transaction and retried with exponential backoff; a chunk that
//! still fails is counted and skipped so the rest of the upload lands.

use std::fmt::Display;
use std::future::Future;

use sqlx::PgPool;

use crate::db::repository::{self, ChunkCounts};
use crate::models::{CatalogEntry, EpgChannel, EpgProgram};
use crate::services::metrics;
use crate::services::retry::{retry_with_backoff, RetryPolicy};

/// Totals of a chunked write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub chunks: usize,
    pub chunks_done: usize,
    pub failed_chunks: usize,
    pub upserted: u64,
    pub queued: u64,
}

impl UpsertReport {
    /// Totals of two writes that belong to the same job
    pub fn combined(&self, other: &UpsertReport) -> UpsertReport {
        UpsertReport {
            chunks: self.chunks + other.chunks,
            chunks_done: self.chunks_done + other.chunks_done,
            failed_chunks: self.failed_chunks + other.failed_chunks,
            upserted: self.upserted + other.upserted,
            queued: self.queued + other.queued,
        }
    }

    /// True when there was something to write and none of it landed
    pub fn all_failed(&self) -> bool {
        self.chunks > 0 && self.failed_chunks == self.chunks
    }
}

/// Split `items` into chunks and write each with `write`, retrying per `policy`
///
/// `on_chunk` is called after every chunk (success or failure) with the
/// running totals.
pub async fn write_in_chunks<'a, T, E, F, Fut, P>(
    items: &'a [T],
    chunk_size: usize,
    policy: &RetryPolicy,
    table: &str,
    mut write: F,
    mut on_chunk: P,
) -> UpsertReport
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<ChunkCounts, E>>,
    E: Display,
    P: FnMut(&UpsertReport),
{
    let chunk_size = chunk_size.max(1);
    let mut report = UpsertReport {
        chunks: items.len().div_ceil(chunk_size),
        ..Default::default()
    };

    for (index, chunk) in items.chunks(chunk_size).enumerate() {
        let label = format!("{}_chunk_{}", table, index);
        let mut attempts = 0u32;
        let result = retry_with_backoff(policy, &label, || {
            attempts += 1;
            write(chunk)
        })
        .await;

        match result {
            Ok(counts) => {
                report.upserted += counts.upserted;
                report.queued += counts.queued;
                report.chunks_done += 1;
                metrics::record_chunk(table, if attempts > 1 { "retried_ok" } else { "ok" });
            }
            Err(e) => {
                report.failed_chunks += 1;
                metrics::record_chunk(table, "failed");
                tracing::error!(
                    "table" = table,
                    "chunk" = index,
                    "rows" = chunk.len(),
                    "error" = %e,
                    "Chunk failed after {} retries, continuing", policy.max_retries
                );
            }
        }
        on_chunk(&report);
    }

    report
}

/// Writes classified catalog entries and EPG data
#[derive(Clone)]
pub struct CatalogWriter {
    pool: PgPool,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl CatalogWriter {
    pub fn new(pool: PgPool, chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            pool,
            chunk_size,
            retry,
        }
    }

    /// Upsert catalog entries keyed on stream URL and queue enrichment
    pub async fn upsert_entries<P>(&self, entries: &[CatalogEntry], on_chunk: P) -> UpsertReport
    where
        P: FnMut(&UpsertReport),
    {
        let pool = &self.pool;
        write_in_chunks(
            entries,
            self.chunk_size,
            &self.retry,
            "catalog_items",
            |chunk| repository::catalog::upsert_chunk(pool, chunk),
            on_chunk,
        )
        .await
    }

    /// Upsert EPG channels keyed on their XMLTV id
    pub async fn upsert_channels(&self, channels: &[EpgChannel]) -> UpsertReport {
        let pool = &self.pool;
        write_in_chunks(
            channels,
            self.chunk_size,
            &self.retry,
            "epg_channels",
            |chunk| async move {
                let upserted = repository::epg::upsert_channels(pool, chunk).await?;
                Ok::<_, sqlx::Error>(ChunkCounts { upserted, queued: 0 })
            },
            |_| {},
        )
        .await
    }

    /// Upsert programmes keyed on (channel_id, starts_at)
    pub async fn upsert_programs<P>(&self, programs: &[EpgProgram], on_chunk: P) -> UpsertReport
    where
        P: FnMut(&UpsertReport),
    {
        let pool = &self.pool;
        write_in_chunks(
            programs,
            self.chunk_size,
            &self.retry,
            "epg_programs",
            |chunk| async move {
                let upserted = repository::epg::upsert_programs(pool, chunk).await?;
                Ok::<_, sqlx::Error>(ChunkCounts { upserted, queued: 0 })
            },
            on_chunk,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_chunks_and_totals() {
        let items: Vec<u32> = (0..25).collect();
        let mut progress = Vec::new();

        let report = write_in_chunks(
            &items,
            10,
            &fast_policy(2),
            "test",
            |chunk: &[u32]| {
                let len = chunk.len() as u64;
                async move { Ok::<_, String>(ChunkCounts { upserted: len, queued: len / 2 }) }
            },
            |r| progress.push(r.chunks_done),
        )
        .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(report.chunks_done, 3);
        assert_eq!(report.failed_chunks, 0);
        assert_eq!(report.upserted, 25);
        assert_eq!(report.queued, 5 + 5 + 2);
        assert_eq!(progress, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let items: Vec<u32> = (0..4).collect();
        let attempts: Mutex<HashMap<u32, u32>> = Mutex::new(HashMap::new());
        let attempts_ref = &attempts;

        let report = write_in_chunks(
            &items,
            2,
            &fast_policy(3),
            "retry_test",
            move |chunk: &[u32]| {
                let first = chunk[0];
                async move {
                    let mut map = attempts_ref.lock().unwrap();
                    let n = map.entry(first).or_insert(0);
                    *n += 1;
                    // first chunk fails twice, then succeeds
                    if first == 0 && *n < 3 {
                        Err("deadlock detected".to_string())
                    } else {
                        Ok(ChunkCounts { upserted: 2, queued: 0 })
                    }
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(report.failed_chunks, 0);
        assert_eq!(report.upserted, 4);
        assert_eq!(attempts.lock().unwrap()[&0], 3);
        assert_eq!(attempts.lock().unwrap()[&2], 1);

        let chunks = |outcome: &str| metrics::UPSERT_CHUNKS.with_label_values(&["retry_test", outcome]).get();
        assert_eq!(chunks("retried_ok"), 1);
        assert_eq!(chunks("ok"), 1);
    }

    #[test]
    fn test_combined_report() {
        let channels = UpsertReport {
            chunks: 1,
            chunks_done: 0,
            failed_chunks: 1,
            upserted: 0,
            queued: 0,
        };
        assert!(channels.all_failed());
        assert!(!UpsertReport::default().all_failed());

        let programs = UpsertReport {
            chunks: 2,
            chunks_done: 2,
            failed_chunks: 0,
            upserted: 900,
            queued: 0,
        };
        let total = channels.combined(&programs);
        assert_eq!(total.chunks, 3);
        assert_eq!(total.failed_chunks, 1);
        assert_eq!(total.upserted, 900);
        assert!(!total.all_failed());
        assert!(channels.combined(&UpsertReport::default()).all_failed());
    }

    #[tokio::test]
    async fn test_persistent_failure_skips_chunk_and_continues() {
        let items: Vec<u32> = (0..6).collect();

        let report = write_in_chunks(
            &items,
            2,
            &fast_policy(1),
            "test",
            |chunk: &[u32]| {
                let broken = chunk.contains(&3);
                async move {
                    if broken {
                        Err("connection reset".to_string())
                    } else {
                        Ok(ChunkCounts { upserted: 2, queued: 1 })
                    }
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(report.chunks_done, 2);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.upserted, 4);
        assert_eq!(report.queued, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let items: Vec<u32> = Vec::new();
        let report = write_in_chunks(
            &items,
            0,
            &fast_policy(1),
            "test",
            |_: &[u32]| async { Ok::<_, String>(ChunkCounts::default()) },
            |_| {},
        )
        .await;

        assert_eq!(report, UpsertReport::default());
    }
}
