//! Ingest job orchestration
//!
//! Every upload becomes a background job: parse, classify, chunked upsert.
//! Progress lives in Redis under the job id so clients can poll it, and a
//! Redis lock keyed on the content hash stops the same upload from being
//! processed twice at once.

use anyhow::{anyhow, Context, Result};
use sha1::{Digest, Sha1};
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::models::{EntrySource, IngestKind, IngestProgress, IngestStatus};
use crate::services::catalog_writer::{CatalogWriter, UpsertReport};
use crate::services::classifier::ContentClassifier;
use crate::services::error::IngestError;
use crate::services::json_import::parse_json_catalog;
use crate::services::m3u_parser::{parse_m3u, ParseOutcome, PlaylistFetcher};
use crate::services::metrics;
use crate::services::redis::RedisService;
use crate::services::xmltv::{parse_xmltv, XmltvDocument};

/// Upper bound for one job; the lock expires even if the process dies
const PROCESSING_LOCK_TTL_SECS: u64 = 2 * 60 * 60;

/// Generate SHA1 hash of an upload (or its URL) for the processing lock
pub fn content_hash(data: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// What a job ingests
#[derive(Debug, Clone)]
pub enum IngestPayload {
    M3uText(String),
    M3uUrl(String),
    Json(String),
    XmltvText(String),
    XmltvUrl(String),
}

impl IngestPayload {
    pub fn kind(&self) -> IngestKind {
        match self {
            IngestPayload::M3uText(_) | IngestPayload::M3uUrl(_) => IngestKind::M3u,
            IngestPayload::Json(_) => IngestKind::Json,
            IngestPayload::XmltvText(_) | IngestPayload::XmltvUrl(_) => IngestKind::Xmltv,
        }
    }

    /// Key for the processing lock: the body for uploads, the URL for remote sources
    fn lock_key(&self) -> String {
        let (prefix, data) = match self {
            IngestPayload::M3uText(s) => ("m3u", s),
            IngestPayload::M3uUrl(s) => ("m3u-url", s),
            IngestPayload::Json(s) => ("json", s),
            IngestPayload::XmltvText(s) => ("xmltv", s),
            IngestPayload::XmltvUrl(s) => ("xmltv-url", s),
        };
        format!("{}:{}", prefix, content_hash(data))
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("An identical ingest is already running (job {0})")]
    AlreadyRunning(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parsed upload, ready to be written
enum Parsed {
    Catalog(ParseOutcome, EntrySource),
    Epg(XmltvDocument),
}

/// Run a CPU-heavy parser off the async runtime
async fn parse_blocking<T, F>(parse: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
{
    let parsed = tokio::task::spawn_blocking(parse)
        .await
        .context("Parser task panicked")??;
    Ok(parsed)
}

fn apply_report(progress: &mut IngestProgress, report: &UpsertReport) {
    progress.chunks_total = report.chunks as u64;
    progress.chunks_done = report.chunks_done as u64;
    progress.chunks_failed = report.failed_chunks as u64;
    progress.upserted = report.upserted;
    progress.queued_for_enrichment = report.queued;
    progress.touch();
}

/// Funnels per-chunk progress through a single writer task
///
/// Chunk callbacks are synchronous, so they only publish the latest snapshot.
/// One task stores snapshots in publish order, skipping ones superseded while
/// a write was in flight. `finish` waits for the last write, so nothing lands
/// after the job's final record.
struct ProgressWriter {
    tx: watch::Sender<IngestProgress>,
    task: JoinHandle<()>,
}

impl ProgressWriter {
    fn spawn<F, Fut>(initial: IngestProgress, mut store: F) -> Self
    where
        F: FnMut(IngestProgress) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(initial);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let job_id = snapshot.job_id.clone();
                if let Err(e) = store(snapshot).await {
                    tracing::warn!("job_id" = %job_id, "Failed to store chunk progress: {:#}", e);
                }
            }
        });

        Self { tx, task }
    }

    fn publish(&self, progress: &IngestProgress) {
        self.tx.send_replace(progress.clone());
    }

    async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!("Progress writer task failed: {}", e);
        }
    }
}

pub struct IngestService {
    redis: RedisService,
    writer: CatalogWriter,
    fetcher: PlaylistFetcher,
    progress_ttl: u64,
}

impl IngestService {
    pub fn new(config: &Config, pool: PgPool, redis: RedisService) -> Result<Self> {
        let fetcher = PlaylistFetcher::new(
            &config.user_agent,
            config.fetch_timeout_ms,
            config.fetch_retry_policy(),
            config.max_upload_bytes() as u64,
        )?;

        Ok(Self {
            redis,
            writer: CatalogWriter::new(pool, config.upsert_chunk_size, config.upsert_retry_policy()),
            fetcher,
            progress_ttl: config.ingest_progress_ttl_secs,
        })
    }

    /// Register a job and process it in the background
    pub async fn start(self: &Arc<Self>, payload: IngestPayload) -> Result<IngestProgress, StartError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let lock_key = payload.lock_key();

        let acquired = self
            .redis
            .acquire_processing_lock(&lock_key, &job_id, PROCESSING_LOCK_TTL_SECS)
            .await?;
        if !acquired {
            let holder = self.redis.get_processing_lock(&lock_key).await?.unwrap_or_default();
            return Err(StartError::AlreadyRunning(holder));
        }

        let progress = IngestProgress::queued(&job_id, payload.kind());
        if let Err(e) = self.redis.set_ingest_progress(&progress, self.progress_ttl).await {
            let _ = self.redis.release_processing_lock(&lock_key).await;
            return Err(e.into());
        }

        let service = Arc::clone(self);
        let initial = progress.clone();
        tokio::spawn(async move {
            service.run(initial, payload, lock_key).await;
        });

        Ok(progress)
    }

    pub async fn progress(&self, job_id: &str) -> Result<Option<IngestProgress>> {
        self.redis.get_ingest_progress(job_id).await
    }

    async fn save(&self, progress: &IngestProgress) {
        if let Err(e) = self.redis.set_ingest_progress(progress, self.progress_ttl).await {
            tracing::warn!("job_id" = %progress.job_id, "Failed to store ingest progress: {}", e);
        }
    }

    fn progress_writer(&self, progress: &IngestProgress) -> ProgressWriter {
        let redis = self.redis.clone();
        let ttl = self.progress_ttl;
        ProgressWriter::spawn(progress.clone(), move |snapshot| {
            let redis = redis.clone();
            async move { redis.set_ingest_progress(&snapshot, ttl).await }
        })
    }

    async fn run(&self, progress: IngestProgress, payload: IngestPayload, lock_key: String) {
        let job_id = progress.job_id.clone();
        let kind = progress.kind;
        tracing::info!("job_id" = %job_id, "kind" = %kind, "Ingest started");

        let mut progress = progress;
        let result = self.process(&mut progress, payload).await;

        let finished = match result {
            Ok(()) => {
                tracing::info!(
                    "job_id" = %job_id,
                    "parsed" = progress.parsed,
                    "upserted" = progress.upserted,
                    "queued" = progress.queued_for_enrichment,
                    "chunks_failed" = progress.chunks_failed,
                    "Ingest complete"
                );
                progress.complete()
            }
            Err(e) => {
                tracing::error!("job_id" = %job_id, "Ingest failed: {:#}", e);
                progress.failed(&format!("{:#}", e))
            }
        };

        self.save(&finished).await;

        if let Err(e) = self.redis.release_processing_lock(&lock_key).await {
            tracing::warn!("job_id" = %job_id, "Failed to release processing lock: {}", e);
        }
    }

    async fn process(&self, progress: &mut IngestProgress, payload: IngestPayload) -> Result<()> {
        let parsed = self.parse(progress, payload).await?;

        *progress = progress.clone().with_status(IngestStatus::Upserting);
        self.save(progress).await;

        let report = match parsed {
            Parsed::Catalog(outcome, source) => self.write_catalog(progress, outcome, source).await,
            Parsed::Epg(doc) => self.write_epg(progress, doc).await,
        };

        if report.all_failed() {
            return Err(anyhow!("All {} upsert chunks failed", report.chunks));
        }

        Ok(())
    }

    async fn parse(&self, progress: &mut IngestProgress, payload: IngestPayload) -> Result<Parsed> {
        let is_remote = matches!(payload, IngestPayload::M3uUrl(_) | IngestPayload::XmltvUrl(_));
        let status = if is_remote { IngestStatus::Downloading } else { IngestStatus::Parsing };
        *progress = progress.clone().with_status(status);
        self.save(progress).await;

        let parsed = match payload {
            IngestPayload::M3uText(text) => Parsed::Catalog(parse_blocking(move || parse_m3u(&text)).await?, EntrySource::M3u),
            IngestPayload::M3uUrl(url) => Parsed::Catalog(self.fetcher.fetch_m3u(&url).await?, EntrySource::M3u),
            IngestPayload::Json(text) => {
                Parsed::Catalog(parse_blocking(move || parse_json_catalog(&text)).await?, EntrySource::Json)
            }
            IngestPayload::XmltvText(xml) => Parsed::Epg(parse_blocking(move || parse_xmltv(&xml)).await?),
            IngestPayload::XmltvUrl(url) => {
                let xml = self.fetcher.fetch_text(&url).await?;
                *progress = progress.clone().with_status(IngestStatus::Parsing);
                self.save(progress).await;
                Parsed::Epg(parse_blocking(move || parse_xmltv(&xml)).await?)
            }
        };

        match &parsed {
            Parsed::Catalog(outcome, _) => {
                progress.parsed = outcome.entries.len() as u64;
                progress.duplicates = outcome.duplicates as u64;
                progress.skipped = outcome.skipped as u64;
                if outcome.entries.is_empty() {
                    return Err(IngestError::Empty.into());
                }
                if let Some(epg_url) = &outcome.epg_url {
                    tracing::info!("job_id" = %progress.job_id, "epg_url" = %epg_url, "Playlist advertises an EPG source");
                }
            }
            Parsed::Epg(doc) => {
                progress.parsed = doc.programs.len() as u64;
                progress.duplicates = doc.duplicates as u64;
                progress.skipped = doc.skipped as u64;
                if doc.channels.is_empty() && doc.programs.is_empty() {
                    return Err(IngestError::Empty.into());
                }
            }
        }

        Ok(parsed)
    }

    async fn write_catalog(&self, progress: &mut IngestProgress, outcome: ParseOutcome, source: EntrySource) -> UpsertReport {
        let entries: Vec<_> = outcome
            .entries
            .into_iter()
            .map(|entry| ContentClassifier::to_catalog_entry(entry, source))
            .collect();

        let mut by_type: HashMap<&'static str, u64> = HashMap::new();
        for entry in &entries {
            *by_type.entry(entry.content_type.as_str()).or_default() += 1;
        }
        for (content_type, count) in &by_type {
            metrics::record_ingested(source.as_str(), content_type, *count);
        }
        tracing::info!("job_id" = %progress.job_id, "types" = ?by_type, "Classified {} entries", entries.len());

        let writer = self.progress_writer(progress);
        let report = self
            .writer
            .upsert_entries(&entries, |report| {
                apply_report(progress, report);
                writer.publish(progress);
            })
            .await;
        writer.finish().await;

        apply_report(progress, &report);
        report
    }

    /// Channel and programme chunks count toward the same job totals
    async fn write_epg(&self, progress: &mut IngestProgress, doc: XmltvDocument) -> UpsertReport {
        let channels = self.writer.upsert_channels(&doc.channels).await;
        tracing::info!(
            "job_id" = %progress.job_id,
            "channels" = channels.upserted,
            "failed_chunks" = channels.failed_chunks,
            "EPG channels written"
        );
        apply_report(progress, &channels);

        let writer = self.progress_writer(progress);
        let programs = self
            .writer
            .upsert_programs(&doc.programs, |report| {
                apply_report(progress, &channels.combined(report));
                writer.publish(progress);
            })
            .await;
        writer.finish().await;

        let report = channels.combined(&programs);
        apply_report(progress, &report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_sha1() {
        assert_eq!(content_hash("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[test]
    fn test_lock_key_separates_kinds() {
        let body = "#EXTM3U\n".to_string();
        let as_m3u = IngestPayload::M3uText(body.clone()).lock_key();
        let as_json = IngestPayload::Json(body).lock_key();
        assert_ne!(as_m3u, as_json);
        assert!(as_m3u.starts_with("m3u:"));
    }

    #[test]
    fn test_payload_kind() {
        assert_eq!(IngestPayload::M3uUrl("http://x".into()).kind(), IngestKind::M3u);
        assert_eq!(IngestPayload::Json("[]".into()).kind(), IngestKind::Json);
        assert_eq!(IngestPayload::XmltvUrl("http://x".into()).kind(), IngestKind::Xmltv);
    }

    fn snapshot(upserted: u64) -> IngestProgress {
        let mut progress = IngestProgress::queued("job-order", IngestKind::M3u).with_status(IngestStatus::Upserting);
        progress.upserted = upserted;
        progress
    }

    #[tokio::test]
    async fn test_progress_writer_drains_before_finish() {
        let stored: Arc<std::sync::Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&stored);

        let writer = ProgressWriter::spawn(snapshot(0), move |progress| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                sink.lock().unwrap().push(progress.upserted);
                Ok(())
            }
        });

        for upserted in [500, 1000, 1500] {
            writer.publish(&snapshot(upserted));
            tokio::task::yield_now().await;
        }
        writer.finish().await;

        // Every write has landed by now, so a final record stored next cannot be overwritten
        let writes = stored.lock().unwrap().clone();
        assert_eq!(writes.last(), Some(&1500));
        assert!(writes.windows(2).all(|w| w[0] < w[1]));
        assert!(!writes.contains(&0));
    }

    #[tokio::test]
    async fn test_progress_writer_survives_store_errors() {
        let calls: Arc<std::sync::atomic::AtomicUsize> = Arc::default();
        let counter = Arc::clone(&calls);

        let writer = ProgressWriter::spawn(snapshot(0), move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Err(anyhow!("redis unavailable")) }
        });
        writer.publish(&snapshot(10));
        writer.finish().await;

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_report() {
        let mut progress = IngestProgress::queued("job", IngestKind::M3u);
        let report = UpsertReport {
            chunks: 4,
            chunks_done: 3,
            failed_chunks: 1,
            upserted: 1500,
            queued: 700,
        };
        apply_report(&mut progress, &report);

        assert_eq!(progress.chunks_total, 4);
        assert_eq!(progress.chunks_done, 3);
        assert_eq!(progress.chunks_failed, 1);
        assert_eq!(progress.upserted, 1500);
        assert_eq!(progress.queued_for_enrichment, 700);
    }
}
