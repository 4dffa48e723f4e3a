//! Job orchestration
//!
//! Owns the lifecycle of calling jobs: submission is handed to a bounded
//! worker pool, status checks poll the pipeline transport without blocking
//! and apply the observed outcome, and the first observation of COMPLETED
//! schedules ingestion. Operations touching one job are serialized by a
//! per-job lock.

use crate::annotate::{
    fact_source_from_config, AnnotationEngine, AnnotationFactSource, DerivedAnnotation,
    FilterCriteria, Preset,
};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::ingest::{IngestSummary, IngestionCoordinator};
use crate::job::{CallingJob, JobId, JobStatus};
use crate::protocol::{runner_from_config, PipelineRunner, PollOutcome, SubmitRequest};
use crate::samples::SampleRegistry;
use crate::store::{JobStore, JsonStore};
use crate::vcf::VariantRecord;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Capabilities the orchestrator is wired with
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub samples: Arc<dyn SampleRegistry>,
    pub runner: Arc<dyn PipelineRunner>,
    pub facts: Arc<dyn AnnotationFactSource>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Worker threads for submission and ingestion
    pub workers: usize,
    /// Ingest and annotate once a job is observed COMPLETED
    pub auto_ingest: bool,
    pub reference_genome: String,
    pub panel_of_normals: Option<String>,
    /// Base for relative output paths reported by the pipeline
    pub output_dir: PathBuf,
    pub engine: AnnotationEngine,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions {
            workers: 2,
            auto_ingest: true,
            reference_genome: "GRCh38".to_string(),
            panel_of_normals: None,
            output_dir: PathBuf::from("/data/outputs"),
            engine: AnnotationEngine::default(),
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Store(format!("{} lock poisoned", what)))
}

/// Counts background tasks so callers can wait for them to drain
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut count) = self.0.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.0.idle.notify_all();
            }
        }
    }
}

struct Inner {
    store: Arc<dyn JobStore>,
    samples: Arc<dyn SampleRegistry>,
    runner: Arc<dyn PipelineRunner>,
    ingestion: IngestionCoordinator,
    pool: rayon::ThreadPool,
    options: OrchestratorOptions,
    job_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    cancel_requested: Mutex<HashSet<JobId>>,
    in_flight: InFlight,
}

/// Cheap to clone; clones share the same pool, store and locks
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(parts: Collaborators, options: OrchestratorOptions) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("mutaflow-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Store(format!("cannot start worker pool: {}", e)))?;

        let ingestion = IngestionCoordinator::new(
            parts.store.clone(),
            parts.facts,
            options.engine.clone(),
            &options.output_dir,
        );

        log::debug!(
            "Orchestrator ready: {} transport, {} workers",
            parts.runner.name(),
            options.workers
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                store: parts.store,
                samples: parts.samples,
                runner: parts.runner,
                ingestion,
                pool,
                options,
                job_locks: Mutex::new(HashMap::new()),
                cancel_requested: Mutex::new(HashSet::new()),
                in_flight: InFlight::default(),
            }),
        })
    }

    /// Wire everything from configuration: JSON store under `store.state_dir`,
    /// samples from the `samples` section, transport per `pipeline.mode`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let parts = Collaborators {
            store: Arc::new(JsonStore::open(&config.store.state_dir)?),
            samples: Arc::new(config.sample_table()),
            runner: runner_from_config(&config.pipeline),
            facts: fact_source_from_config(&config.annotation)?,
        };
        let options = OrchestratorOptions {
            workers: num_cpus::get().min(config.options.workers),
            auto_ingest: config.options.auto_ingest,
            reference_genome: config.pipeline.reference_genome.clone(),
            panel_of_normals: config.pipeline.panel_of_normals.clone(),
            output_dir: config.pipeline.output_dir.clone(),
            engine: AnnotationEngine::new(&config.annotation.name, &config.annotation.version),
        };
        Orchestrator::new(parts, options)
    }

    fn job_lock(&self, id: &JobId) -> Result<Arc<Mutex<()>>> {
        let mut locks = lock(&self.inner.job_locks, "job lock table")?;
        Ok(locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Run `f` under the job's lock, then forget the lock once the job is settled
    fn locked<T, F>(&self, id: &JobId, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let job_lock = self.job_lock(id)?;
        let result = match lock(&job_lock, "job") {
            Ok(_guard) => f(),
            Err(e) => Err(e),
        };
        if let Err(e) = self.release_if_settled(id, job_lock) {
            log::warn!("Cannot release lock of job {}: {}", id, e);
        }
        result
    }

    /// Drop the lock entry and cancel flag of a terminal or unknown job.
    /// The entry stays while another thread holds or waits on it.
    fn release_if_settled(&self, id: &JobId, job_lock: Arc<Mutex<()>>) -> Result<()> {
        if let Some(job) = self.inner.store.load_job(id)? {
            if !job.is_terminal() {
                return Ok(());
            }
        }
        {
            let mut locks = lock(&self.inner.job_locks, "job lock table")?;
            // one handle in the table, one in `job_lock`
            let unused = locks
                .get(id)
                .is_some_and(|l| Arc::ptr_eq(l, &job_lock) && Arc::strong_count(l) == 2);
            if unused {
                locks.remove(id);
            }
        }
        lock(&self.inner.cancel_requested, "cancel flags")?.remove(id);
        Ok(())
    }

    fn load(&self, id: &JobId) -> Result<CallingJob> {
        self.inner
            .store
            .load_job(id)?
            .ok_or_else(|| PipelineError::Validation(format!("Job not found: {}", id)))
    }

    fn cancel_requested(&self, id: &JobId) -> bool {
        lock(&self.inner.cancel_requested, "cancel flags")
            .map(|flags| flags.contains(id))
            .unwrap_or(true)
    }

    /// Run `task` on the worker pool, tracked by [`Orchestrator::wait_for_idle`]
    fn spawn<F>(&self, task: F)
    where
        F: FnOnce(&Orchestrator) + Send + 'static,
    {
        match self.inner.in_flight.count.lock() {
            Ok(mut count) => *count += 1,
            Err(_) => {
                log::error!("in-flight counter poisoned, task dropped");
                return;
            }
        }
        let this = self.clone();
        self.inner.pool.spawn(move || {
            let _guard = InFlightGuard(&this.inner.in_flight);
            task(&this);
        });
    }

    /// Block until every background submission and ingestion has finished
    pub fn wait_for_idle(&self) {
        let in_flight = &self.inner.in_flight;
        let Ok(mut count) = in_flight.count.lock() else {
            return;
        };
        while *count > 0 {
            match in_flight.idle.wait(count) {
                Ok(guard) => count = guard,
                Err(_) => return,
            }
        }
    }

    /// Validate samples, persist a PENDING job and hand submission to the pool.
    ///
    /// Returns immediately; submission outcome lands on the job record.
    pub fn submit_job(
        &self,
        tumor_sample: &str,
        normal_sample: Option<&str>,
        pipeline_version: &str,
        calling_method: &str,
    ) -> Result<CallingJob> {
        let tumor = self.inner.samples.resolve(tumor_sample).ok_or_else(|| {
            PipelineError::Validation(format!("Tumor sample not found: {}", tumor_sample))
        })?;
        let normal = match normal_sample {
            Some(id) => Some(self.inner.samples.resolve(id).ok_or_else(|| {
                PipelineError::Validation(format!("Normal sample not found: {}", id))
            })?),
            None => None,
        };

        let id = self.inner.store.next_job_id()?;
        let mut job = CallingJob::new(
            id,
            tumor_sample,
            normal_sample,
            pipeline_version,
            calling_method,
            &self.inner.options.reference_genome,
        );
        job.panel_of_normals = self.inner.options.panel_of_normals.clone();
        self.inner.store.save_job(&job)?;
        log::info!("Created job {} for tumor sample {}", job.id, tumor_sample);

        let request = SubmitRequest { tumor, normal };
        let id = job.id.clone();
        self.spawn(move |this| {
            if let Err(e) = this.run_submission(&id, &request) {
                log::error!("Submission of job {} failed: {}", id, e);
            }
        });

        Ok(job)
    }

    fn run_submission(&self, id: &JobId, request: &SubmitRequest) -> Result<()> {
        self.locked(id, || {
            let mut job = self.load(id)?;
            if job.status != JobStatus::Pending || self.cancel_requested(id) {
                log::debug!("Job {} is {}, skipping submission", id, job.status);
                return Ok(());
            }

            match self.inner.runner.submit(&job, request) {
                Ok(submission) => {
                    job.mark_submitted(&submission.progress)?;
                    job.command_line = submission.command_line;
                    job.log_path = submission.log_path;
                }
                Err(e) => {
                    log::error!("Failed to submit job {}: {}", id, e);
                    job.mark_failed(format!("Failed to submit job: [{}] {}", e.kind(), e))?;
                }
            }
            self.inner.store.save_job(&job)
        })
    }

    /// Poll the transport and apply the observed outcome.
    ///
    /// Terminal and not-yet-submitted jobs are returned as stored.
    pub fn get_job_status(&self, id: &JobId) -> Result<CallingJob> {
        let job = self.load(id)?;
        if job.is_terminal() || job.status == JobStatus::Pending {
            return Ok(job);
        }

        let (job, observed_completion) = self.locked(id, || {
            let mut job = self.load(id)?;
            if job.is_terminal() || job.status == JobStatus::Pending {
                return Ok((job, false));
            }

            let before = job.clone();
            match self.inner.runner.poll(&job) {
                Ok(PollOutcome::Pending) => {}
                Ok(PollOutcome::InProgress(progress)) => {
                    if job.status != JobStatus::Cancelling {
                        job.mark_in_progress(progress)?;
                    }
                }
                Ok(PollOutcome::Completed(path)) => job.mark_completed(path)?,
                Ok(PollOutcome::Failed(message)) => job.mark_failed(message)?,
                Err(e) => {
                    log::error!("Failed to check status of job {}: {}", id, e);
                    job.mark_failed(format!("Failed to check job status: [{}] {}", e.kind(), e))?;
                }
            }

            if job != before {
                self.inner.store.save_job(&job)?;
            }
            let observed = job.status == JobStatus::Completed;
            Ok((job, observed))
        })?;

        if observed_completion && self.inner.options.auto_ingest {
            let id = id.clone();
            self.spawn(move |this| {
                if let Err(e) = this.ingest_completed_job(&id) {
                    log::error!("Automatic ingestion of job {} failed: {}", id, e);
                }
            });
        }
        Ok(job)
    }

    /// Poll every submitted, running or cancelling job once.
    ///
    /// Returns the number of jobs polled.
    pub fn poll_active_jobs(&self) -> Result<usize> {
        let active: Vec<JobId> = self
            .inner
            .store
            .list_jobs()?
            .into_iter()
            .filter(|j| !j.is_terminal() && j.status != JobStatus::Pending)
            .map(|j| j.id)
            .collect();
        for id in &active {
            let job = self.get_job_status(id)?;
            log::debug!("Job {} is {}", id, job.status);
        }
        Ok(active.len())
    }

    /// Poll `id` every `interval` until it is terminal or a cancellation is
    /// requested, calling `on_update` with each snapshot.
    pub fn wait_for_terminal<F>(
        &self,
        id: &JobId,
        interval: Duration,
        mut on_update: F,
    ) -> Result<CallingJob>
    where
        F: FnMut(&CallingJob),
    {
        loop {
            let job = self.get_job_status(id)?;
            on_update(&job);
            if job.is_terminal() || self.cancel_requested(id) {
                return Ok(job);
            }
            std::thread::sleep(interval);
        }
    }

    /// Request cancellation.
    ///
    /// `Ok(false)` when the job is not in a cancellable state; its record is
    /// left untouched. A PENDING job is never handed to the transport.
    pub fn cancel_job(&self, id: &JobId) -> Result<bool> {
        self.locked(id, || {
            let mut job = self.load(id)?;

            if !job.status.is_cancellable() {
                log::warn!("Job {} is {} and cannot be cancelled", id, job.status);
                return Ok(false);
            }

            let stopped = if job.status == JobStatus::Pending {
                true
            } else {
                match self.inner.runner.cancel(&job) {
                    Ok(stopped) => stopped,
                    Err(e) => {
                        log::error!("Failed to cancel job {}: {}", id, e);
                        return Err(e);
                    }
                }
            };
            lock(&self.inner.cancel_requested, "cancel flags")?.insert(id.clone());

            job.mark_cancelling()?;
            if stopped {
                job.mark_cancelled()?;
            }
            self.inner.store.save_job(&job)?;
            log::info!("Job {} is {}", id, job.status);
            Ok(true)
        })
    }

    /// Ingest the variants of a COMPLETED job and annotate them.
    ///
    /// Failures are also recorded on the job, which stays COMPLETED.
    pub fn ingest_completed_job(&self, id: &JobId) -> Result<IngestSummary> {
        self.locked(id, || {
            let mut job = self.load(id)?;

            if job.status != JobStatus::Completed {
                return Err(PipelineError::StateConflict(format!(
                    "job {} is {}, only COMPLETED jobs can be ingested",
                    id, job.status
                )));
            }

            match self.inner.ingestion.ingest(&mut job) {
                Ok(summary) => {
                    job.error_message = None;
                    self.inner.store.save_job(&job)?;
                    Ok(summary)
                }
                Err(e) => {
                    log::error!("Ingestion of job {} failed: {}", id, e);
                    job.record_ingestion_failure(format!(
                        "Failed to ingest variants: [{}] {}",
                        e.kind(),
                        e
                    ));
                    self.inner.store.save_job(&job)?;
                    Err(e)
                }
            }
        })
    }

    /// Re-derive annotations for the stored variants of a job
    pub fn annotate_job(&self, id: &JobId) -> Result<Vec<DerivedAnnotation>> {
        self.locked(id, || {
            let job = self.load(id)?;
            if job.status != JobStatus::Completed {
                return Err(PipelineError::StateConflict(format!(
                    "job {} is {}, only COMPLETED jobs can be annotated",
                    id, job.status
                )));
            }
            self.inner.ingestion.annotate(&job)
        })
    }

    pub fn annotations(&self, id: &JobId) -> Result<Vec<DerivedAnnotation>> {
        self.load(id)?;
        self.inner.store.annotations(id)
    }

    pub fn variants(&self, id: &JobId) -> Result<Vec<VariantRecord>> {
        self.load(id)?;
        self.inner.store.variants(id)
    }

    pub fn filter_annotations(
        &self,
        id: &JobId,
        criteria: &FilterCriteria,
    ) -> Result<Vec<DerivedAnnotation>> {
        Ok(criteria.apply(&self.annotations(id)?))
    }

    pub fn annotations_matching(&self, id: &JobId, preset: Preset) -> Result<Vec<DerivedAnnotation>> {
        Ok(self
            .annotations(id)?
            .into_iter()
            .filter(|a| preset.matches(a))
            .collect())
    }

    pub fn annotations_by_verification(
        &self,
        id: &JobId,
        status: &str,
    ) -> Result<Vec<DerivedAnnotation>> {
        Ok(self
            .annotations(id)?
            .into_iter()
            .filter(|a| a.verification.status == status)
            .collect())
    }

    fn modify_annotation<F>(&self, id: &JobId, variant_id: u64, change: F) -> Result<DerivedAnnotation>
    where
        F: FnOnce(&mut DerivedAnnotation),
    {
        self.locked(id, || {
            let mut annotation = self
                .annotations(id)?
                .into_iter()
                .find(|a| a.variant_id == variant_id)
                .ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "no annotation for variant {} of job {}",
                        variant_id, id
                    ))
                })?;
            change(&mut annotation);
            self.inner.store.update_annotation(&annotation)?;
            Ok(annotation)
        })
    }

    pub fn request_verification(
        &self,
        id: &JobId,
        variant_id: u64,
        method: &str,
        notes: Option<&str>,
    ) -> Result<DerivedAnnotation> {
        self.modify_annotation(id, variant_id, |a| a.request_verification(method, notes))
    }

    pub fn update_verification_status(
        &self,
        id: &JobId,
        variant_id: u64,
        status: &str,
        notes: Option<&str>,
    ) -> Result<DerivedAnnotation> {
        self.modify_annotation(id, variant_id, |a| {
            a.update_verification_status(status, notes)
        })
    }

    pub fn list_jobs(&self) -> Result<Vec<CallingJob>> {
        self.inner.store.list_jobs()
    }

    pub fn jobs_by_tumor_sample(&self, sample_id: &str) -> Result<Vec<CallingJob>> {
        self.inner.store.jobs_by_tumor_sample(sample_id)
    }

    pub fn jobs_by_status(&self, status: JobStatus) -> Result<Vec<CallingJob>> {
        self.inner.store.jobs_by_status(status)
    }
}
