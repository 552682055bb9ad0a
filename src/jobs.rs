//! Job Registry (spec §5/§4.10): a concurrent map of in-flight and recent
//! ingestion jobs, used to back `GET /api/sync/status[/{jobId}]`.
//!
//! `dashmap` is the idiom reached for here rather than a `Mutex<HashMap>` —
//! the teacher has no concurrent-map need of its own (its jobs are
//! synchronous CLI invocations), so this is an enrichment drawn from the
//! pack's `globalbusinessadvisors-llm-copilot-agent`, which uses `dashmap`
//! for the same "many workers touching one job-state table" role.

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{IngestionJob, JobStatus};

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, IngestionJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_job(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.insert(
            id,
            IngestionJob {
                id,
                status: JobStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                discovered: 0,
                ingested: 0,
                failed: 0,
            },
        );
        id
    }

    pub fn record_discovered(&self, id: Uuid, count: u64) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.discovered += count;
        }
    }

    pub fn record_ingested(&self, id: Uuid) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.ingested += 1;
        }
    }

    pub fn record_failed(&self, id: Uuid) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.failed += 1;
        }
    }

    pub fn complete(&self, id: Uuid, status: JobStatus) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.status = status;
            job.completed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: Uuid) -> Option<IngestionJob> {
        self.jobs.get(&id).map(|j| j.clone())
    }

    pub fn list(&self) -> Vec<IngestionJob> {
        self.jobs.iter().map(|j| j.clone()).collect()
    }
}
