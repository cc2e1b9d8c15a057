//! TMDB enrichment worker
//!
//! Polls `enrichment_queue`, looks each claimed item up through a
//! [`MetadataProvider`] and writes the outcome back through an
//! [`EnrichmentStore`]. External calls are spaced by a fixed-rate ticker so
//! the API quota is respected regardless of how fast the database answers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use sqlx::PgPool;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::config::EnrichmentSettings;
use crate::db::models::ClaimedRow;
use crate::db::repository;
use crate::models::{ContentType, ItemMetadata};
use crate::services::metrics;
use crate::services::tmdb::{MetadataProvider, SearchKind, TmdbError};

/// Claims older than this are considered abandoned by a crashed worker
const STALE_CLAIM: Duration = Duration::from_secs(10 * 60);
const RETRY_BASE: Duration = Duration::from_secs(30);
const RETRY_MAX: Duration = Duration::from_secs(6 * 60 * 60);
const LOOKUP_CACHE_SIZE: usize = 5_000;

/// Queue row claimed for processing
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub item_id: Uuid,
    pub attempts: i32,
    pub content_type: ContentType,
    pub title: String,
    pub year: Option<u16>,
    pub series_name: Option<String>,
}

impl From<ClaimedRow> for EnrichmentJob {
    fn from(row: ClaimedRow) -> Self {
        EnrichmentJob {
            item_id: row.item_id,
            attempts: row.attempts,
            content_type: ContentType::from_loose(&row.content_type).unwrap_or_default(),
            title: row.title,
            year: row.year.and_then(|y| u16::try_from(y).ok()),
            series_name: row.series_name,
        }
    }
}

/// Identity of a TMDB search, used for the in-memory lookup cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub kind: SearchKind,
    pub query: String,
    pub year: Option<u16>,
}

impl EnrichmentJob {
    /// Search to run for this item; channels have none
    pub fn lookup_key(&self) -> Option<LookupKey> {
        let (kind, query) = match self.content_type {
            ContentType::Movie => (SearchKind::Movie, self.title.as_str()),
            ContentType::Series => (SearchKind::Tv, self.series_name.as_deref().unwrap_or(&self.title)),
            ContentType::Channel => return None,
        };

        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        Some(LookupKey {
            kind,
            query: query.to_string(),
            year: self.year,
        })
    }
}

/// New state of a queue row
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Done(ItemMetadata),
    NotFound,
    /// Back to `pending`
    Retry {
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: Option<String>,
    },
    Failed {
        attempts: i32,
        error: String,
    },
}

/// What the worker loop should do after an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Continue,
    /// Stop calling the API for this long (rate limited)
    Pause(Duration),
    /// Credential problem; wait a full idle period before polling again
    Idle,
}

/// Backoff for a generic failure: 30s * 2^attempts, capped at 6h
fn retry_backoff(previous_attempts: i32) -> Duration {
    let shift = previous_attempts.clamp(0, 31) as u32;
    RETRY_BASE
        .checked_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX))
        .unwrap_or(RETRY_MAX)
        .min(RETRY_MAX)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(6))
}

/// Map a lookup result to the queue transition and the loop signal
pub fn plan_transition(
    job: &EnrichmentJob,
    result: Result<Option<ItemMetadata>, TmdbError>,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> (Transition, WorkerSignal) {
    match result {
        Ok(Some(metadata)) => (Transition::Done(metadata), WorkerSignal::Continue),
        Ok(None) => (Transition::NotFound, WorkerSignal::Continue),
        Err(TmdbError::RateLimited(retry_after)) => (
            Transition::Retry {
                attempts: job.attempts,
                next_attempt_at: after(now, retry_after),
                error: None,
            },
            WorkerSignal::Pause(retry_after),
        ),
        Err(TmdbError::Unauthorized) => (
            Transition::Retry {
                attempts: job.attempts,
                next_attempt_at: now,
                error: Some(TmdbError::Unauthorized.to_string()),
            },
            WorkerSignal::Idle,
        ),
        Err(err) => {
            let attempts = job.attempts + 1;
            let transition = if attempts >= max_attempts {
                Transition::Failed {
                    attempts,
                    error: err.to_string(),
                }
            } else {
                Transition::Retry {
                    attempts,
                    next_attempt_at: after(now, retry_backoff(job.attempts)),
                    error: Some(err.to_string()),
                }
            };
            (transition, WorkerSignal::Continue)
        }
    }
}

/// Persistence used by the worker
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    async fn claim(&self, limit: i64) -> anyhow::Result<Vec<EnrichmentJob>>;
    async fn apply(&self, item_id: Uuid, transition: &Transition) -> anyhow::Result<()>;
}

/// PostgreSQL-backed queue
pub struct PgEnrichmentStore {
    pool: PgPool,
}

impl PgEnrichmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrichmentStore for PgEnrichmentStore {
    async fn claim(&self, limit: i64) -> anyhow::Result<Vec<EnrichmentJob>> {
        let rows = repository::enrichment::claim_batch(&self.pool, limit, STALE_CLAIM.as_secs_f64()).await?;
        Ok(rows.into_iter().map(EnrichmentJob::from).collect())
    }

    async fn apply(&self, item_id: Uuid, transition: &Transition) -> anyhow::Result<()> {
        match transition {
            Transition::Done(metadata) => repository::enrichment::mark_done(&self.pool, item_id, metadata).await?,
            Transition::NotFound => repository::enrichment::mark_not_found(&self.pool, item_id).await?,
            Transition::Retry {
                attempts,
                next_attempt_at,
                error,
            } => {
                repository::enrichment::reschedule(&self.pool, item_id, *attempts, *next_attempt_at, error.as_deref())
                    .await?
            }
            Transition::Failed { attempts, error } => {
                repository::enrichment::mark_failed(&self.pool, item_id, *attempts, error).await?
            }
        }
        Ok(())
    }
}

/// Result of one claim-and-process pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub processed: usize,
    pub api_calls: usize,
    pub signal: WorkerSignal,
}

pub struct EnrichmentWorker<S, P> {
    store: S,
    provider: P,
    settings: EnrichmentSettings,
    cache: LruCache<LookupKey, Option<ItemMetadata>>,
}

impl<S: EnrichmentStore, P: MetadataProvider> EnrichmentWorker<S, P> {
    pub fn new(store: S, provider: P, settings: EnrichmentSettings) -> Self {
        Self {
            store,
            provider,
            settings,
            cache: LruCache::new(NonZeroUsize::new(LOOKUP_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.settings.request_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Look up one job, consulting the cache before the rate-limited API
    async fn lookup(&mut self, key: &LookupKey, ticker: &mut Interval) -> (Result<Option<ItemMetadata>, TmdbError>, bool) {
        if let Some(cached) = self.cache.get(key) {
            metrics::record_enrichment("cached");
            return (Ok(cached.clone()), false);
        }

        ticker.tick().await;
        let result = self.provider.search(key.kind, &key.query, key.year).await;

        let outcome = match &result {
            Ok(Some(_)) => "found",
            Ok(None) => "not_found",
            Err(TmdbError::RateLimited(_)) => "rate_limited",
            Err(TmdbError::Unauthorized) => "unauthorized",
            Err(_) => "error",
        };
        metrics::record_enrichment(outcome);

        if let Ok(found) = &result {
            self.cache.put(key.clone(), found.clone());
        }

        (result, true)
    }

    /// Claim a batch and process it until done or the API asks us to stop
    pub async fn run_batch(&mut self, ticker: &mut Interval) -> anyhow::Result<BatchOutcome> {
        let jobs = self.store.claim(self.settings.batch_size).await?;
        let mut outcome = BatchOutcome {
            claimed: jobs.len(),
            processed: 0,
            api_calls: 0,
            signal: WorkerSignal::Continue,
        };

        let mut jobs = jobs.into_iter();
        for job in jobs.by_ref() {
            let result = match job.lookup_key() {
                Some(key) => {
                    let (result, called) = self.lookup(&key, ticker).await;
                    outcome.api_calls += usize::from(called);
                    result
                }
                None => Ok(None),
            };

            let (transition, signal) = plan_transition(&job, result, self.settings.max_attempts, Utc::now());
            self.store.apply(job.item_id, &transition).await?;
            outcome.processed += 1;

            if signal != WorkerSignal::Continue {
                outcome.signal = signal;
                break;
            }
        }

        // Hand the rest of the batch back untouched
        let resume_at = match outcome.signal {
            WorkerSignal::Pause(d) => after(Utc::now(), d),
            _ => Utc::now(),
        };
        for job in jobs {
            let transition = Transition::Retry {
                attempts: job.attempts,
                next_attempt_at: resume_at,
                error: None,
            };
            self.store.apply(job.item_id, &transition).await?;
        }

        Ok(outcome)
    }

    /// Poll forever
    pub async fn run(mut self) {
        tracing::info!(
            "interval_ms" = self.settings.request_interval.as_millis() as u64,
            "batch_size" = self.settings.batch_size,
            "Enrichment worker started"
        );

        let mut ticker = self.ticker();

        loop {
            let wait = match self.run_batch(&mut ticker).await {
                Ok(outcome) if outcome.claimed == 0 => Some(self.settings.idle_poll),
                Ok(outcome) => {
                    tracing::debug!(
                        "claimed" = outcome.claimed,
                        "processed" = outcome.processed,
                        "api_calls" = outcome.api_calls,
                        "Enrichment batch finished"
                    );
                    match outcome.signal {
                        WorkerSignal::Continue => None,
                        WorkerSignal::Pause(d) => {
                            tracing::warn!("pause_secs" = d.as_secs(), "TMDB rate limit hit, pausing");
                            Some(d)
                        }
                        WorkerSignal::Idle => {
                            tracing::error!("TMDB rejected the API key, idling");
                            Some(self.settings.idle_poll)
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Enrichment batch failed: {:#}", e);
                    Some(self.settings.idle_poll)
                }
            };

            if let Some(wait) = wait {
                sleep(wait).await;
            }
        }
    }
}

/// Spawn the worker as a background task
pub fn start_enrichment_task<P>(pool: PgPool, provider: P, settings: EnrichmentSettings) -> tokio::task::JoinHandle<()>
where
    P: MetadataProvider + 'static,
{
    let worker = EnrichmentWorker::new(PgEnrichmentStore::new(pool), provider, settings);
    tokio::spawn(worker.run())
}
