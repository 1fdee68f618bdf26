use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::{Job, JobId, JobStatus, StageKind, StageRecord, StageStatus},
    stage::schema::StageResult,
};

/// In-memory registry of all jobs and their stage sub-states.
///
/// Mutation happens only through the methods below, and only a job's own
/// coordinator task calls them, so per-job access is already sequential; the
/// lock exists for cross-job sharing of the map itself. Records live until
/// process restart; there is no persistence.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        self.inner.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.inner.read().await.get(&id).cloned()
    }

    /// All jobs, newest first. Ties on creation time break on id so the order
    /// is stable.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Mark a stage processing and advance the job status to that stage's
    /// phase. Refused once the job is terminal.
    pub async fn begin_stage(&self, id: JobId, kind: StageKind) -> SpritecastResult<()> {
        self.mutate(id, |job| {
            let now = Utc::now();
            job.status = kind.job_status();
            job.updated_at = now;
            if let Some(record) = job.stage_mut(kind) {
                record.status = StageStatus::Processing;
                record.updated_at = now;
            }
        })
        .await
    }

    pub async fn complete_stage(
        &self,
        id: JobId,
        kind: StageKind,
        result: StageResult,
        from_cache: bool,
    ) -> SpritecastResult<()> {
        self.mutate(id, |job| {
            let now = Utc::now();
            job.updated_at = now;
            if let Some(record) = job.stage_mut(kind) {
                record.status = StageStatus::Completed;
                record.result = Some(result);
                record.from_cache = from_cache;
                record.updated_at = now;
            }
        })
        .await
    }

    /// Terminal failure: the named stage is marked failed and the job carries
    /// the human-readable cause plus a failure timestamp. Remaining stage
    /// records are left untouched (pending), which is how an observer sees
    /// that they were never invoked.
    pub async fn fail_job(
        &self,
        id: JobId,
        kind: StageKind,
        message: impl Into<String>,
    ) -> SpritecastResult<()> {
        let message = message.into();
        self.mutate(id, |job| {
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.error = Some(message.clone());
            job.updated_at = now;
            if let Some(record) = job.stage_mut(kind) {
                record.status = StageStatus::Failed;
                record.detail = Some(message.clone());
                record.updated_at = now;
            }
        })
        .await
    }

    pub async fn complete_job(
        &self,
        id: JobId,
        output_video: impl Into<String>,
    ) -> SpritecastResult<()> {
        let output_video = output_video.into();
        self.mutate(id, |job| {
            job.status = JobStatus::Completed;
            job.output_video = Some(output_video.clone());
            job.updated_at = Utc::now();
        })
        .await
    }

    pub async fn stage_record(&self, id: JobId, kind: StageKind) -> Option<StageRecord> {
        self.inner
            .read()
            .await
            .get(&id)
            .and_then(|job| job.stage(kind).cloned())
    }

    async fn mutate(&self, id: JobId, apply: impl FnOnce(&mut Job)) -> SpritecastResult<()> {
        let mut jobs = self.inner.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| SpritecastError::JobNotFound(id.to_string()))?;
        if job.status.is_terminal() {
            // Status transitions are monotonic; a terminal job never moves.
            warn!(job = %id, status = ?job.status, "ignoring update to terminal job");
            return Ok(());
        }
        apply(job);
        Ok(())
    }
}
