use serde::{Deserialize, Serialize};

/// Kind of upload an ingest job processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestKind {
    M3u,
    Json,
    Xmltv,
}

impl std::fmt::Display for IngestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestKind::M3u => write!(f, "m3u"),
            IngestKind::Json => write!(f, "json"),
            IngestKind::Xmltv => write!(f, "xmltv"),
        }
    }
}

/// Lifecycle of an ingest job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Queued,
    Downloading,
    Parsing,
    Upserting,
    Complete,
    Failed,
}

impl IngestStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, IngestStatus::Complete | IngestStatus::Failed)
    }
}

/// Job progress stored in Redis while an upload is processed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestProgress {
    pub job_id: String,
    pub kind: IngestKind,
    pub status: IngestStatus,
    /// Entries (or programmes) accepted by the parser
    pub parsed: u64,
    pub duplicates: u64,
    pub skipped: u64,
    /// Rows written so far
    pub upserted: u64,
    /// Items queued for TMDB enrichment
    pub queued_for_enrichment: u64,
    pub chunks_total: u64,
    pub chunks_done: u64,
    pub chunks_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
}

impl IngestProgress {
    pub fn queued(job_id: &str, kind: IngestKind) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            job_id: job_id.to_string(),
            kind,
            status: IngestStatus::Queued,
            parsed: 0,
            duplicates: 0,
            skipped: 0,
            upserted: 0,
            queued_for_enrichment: 0,
            chunks_total: 0,
            chunks_done: 0,
            chunks_failed: 0,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: IngestStatus) -> Self {
        self.status = status;
        self.touch();
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.status = IngestStatus::Failed;
        self.error = Some(error.to_string());
        self.touch();
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// A job that finished with some chunks failing still completes
    pub fn complete(mut self) -> Self {
        self.status = IngestStatus::Complete;
        self.touch();
        self
    }
}

/// Body of the `/url` ingest endpoints
#[derive(Debug, Deserialize)]
pub struct IngestUrlRequest {
    pub url: String,
}

/// Response returned when an ingest job is accepted
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAccepted {
    pub job_id: String,
    pub kind: IngestKind,
    pub status: IngestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_transitions() {
        let progress = IngestProgress::queued("job-1", IngestKind::M3u);
        assert_eq!(progress.status, IngestStatus::Queued);
        assert!(!progress.status.is_finished());

        let failed = progress.clone().failed("boom");
        assert_eq!(failed.status, IngestStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.status.is_finished());

        let done = progress.with_status(IngestStatus::Upserting).complete();
        assert_eq!(done.status, IngestStatus::Complete);
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let progress = IngestProgress::queued("job-2", IngestKind::Xmltv);
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["jobId"], "job-2");
        assert_eq!(json["kind"], "xmltv");
        assert_eq!(json["status"], "queued");
        assert!(json.get("error").is_none());
    }
}
