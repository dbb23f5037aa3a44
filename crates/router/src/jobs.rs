//! Job lifecycle tracking.
//!
//! State machine: Queued -> InProgress on first progress update, then one
//! of Completed / Cancelled / Failed. Terminal states are absorbing. Every
//! transition and progress update emits onto the event bus, in per-job
//! monotonic order (emission happens under the job-map write lock).

use crate::error::{Result, RouterError};
use crate::events::{EventBus, JobEventKind};
use costwise_protocol::job::unix_now;
use costwise_protocol::{Job, JobStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

pub struct JobTracker {
    /// BTreeMap keeps iteration stable for the observability surface.
    jobs: RwLock<BTreeMap<String, Job>>,
    bus: EventBus,
    job_ttl: Duration,
    counter: AtomicU64,
}

impl JobTracker {
    pub fn new(bus: EventBus, job_ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            bus,
            job_ttl,
            counter: AtomicU64::new(1),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a new job in Queued state.
    pub fn create(&self, task: &str, model_id: Option<String>) -> Job {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("job-{n:06}");
        let mut job = Job::new(id.clone(), task);
        job.model_id = model_id;

        let mut jobs = self.jobs.write().expect("job map lock");
        jobs.insert(id, job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().expect("job map lock").get(id).cloned()
    }

    /// Jobs not yet in a terminal state, in stable id order.
    pub fn active_jobs(&self) -> Vec<Job> {
        self.jobs
            .read()
            .expect("job map lock")
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Progress update; the first one moves Queued to InProgress.
    pub fn update_progress(&self, id: &str, progress: u8, eta_seconds: Option<u64>) -> Result<Job> {
        let mut jobs = self.jobs.write().expect("job map lock");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RouterError::NotFound(format!("job {id} does not exist")))?;

        if job.status.is_terminal() {
            return Err(RouterError::PreconditionFailed(format!(
                "job {id} is already {}",
                job.status.as_str()
            )));
        }

        if job.status == JobStatus::Queued {
            self.transition(job, JobStatus::InProgress);
        }
        job.progress = progress.min(100);
        job.eta_seconds = eta_seconds;
        self.bus.emit(
            id,
            JobEventKind::Progress {
                progress: job.progress,
                eta_seconds,
            },
        );
        Ok(job.clone())
    }

    /// Terminal success; progress becomes 100.
    pub fn complete(&self, id: &str, results: BTreeMap<String, String>) -> Result<Job> {
        self.finish(id, JobStatus::Completed, None, Some(results))
    }

    pub fn fail(&self, id: &str, reason: &str) -> Result<Job> {
        self.finish(id, JobStatus::Failed, Some(reason.to_string()), None)
    }

    /// Cancel a non-terminal job. Cancelling a terminal job fails the
    /// precondition and leaves the job untouched.
    pub fn cancel(&self, id: &str) -> Result<Job> {
        self.finish(id, JobStatus::Cancelled, None, None)
    }

    fn finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
        results: Option<BTreeMap<String, String>>,
    ) -> Result<Job> {
        let mut jobs = self.jobs.write().expect("job map lock");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RouterError::NotFound(format!("job {id} does not exist")))?;

        if job.status.is_terminal() {
            return Err(RouterError::PreconditionFailed(format!(
                "job {id} is already {}",
                job.status.as_str()
            )));
        }

        self.transition(job, status);
        if status == JobStatus::Completed {
            job.progress = 100;
        }
        job.eta_seconds = None;
        job.error = error;
        if results.is_some() {
            job.results = results;
        }
        Ok(job.clone())
    }

    fn transition(&self, job: &mut Job, to: JobStatus) {
        let from = job.status;
        job.status = to;
        self.bus.emit(&job.id, JobEventKind::StatusChanged { from, to });
    }

    /// Sweep Completed and Cancelled jobs older than the TTL. Returns how
    /// many were removed.
    pub fn cleanup_completed(&self) -> usize {
        let now = unix_now();
        let ttl = self.job_ttl;
        let mut jobs = self.jobs.write().expect("job map lock");
        let before = jobs.len();
        jobs.retain(|_, job| {
            let sweepable = matches!(job.status, JobStatus::Completed | JobStatus::Cancelled);
            !(sweepable && job.age(now) > ttl)
        });
        before - jobs.len()
    }
}
