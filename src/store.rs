//! Persistence of jobs, variant batches and derived annotations
//!
//! The orchestrator only talks to the [`JobStore`] trait. [`MemoryStore`]
//! backs tests and one-shot runs; [`JsonStore`] keeps one JSON document per
//! job, variant batch and annotation batch under a state directory so that
//! separate CLI invocations see the same jobs.

use crate::annotate::DerivedAnnotation;
use crate::error::{PipelineError, Result};
use crate::job::{CallingJob, JobId, JobStatus};
use crate::vcf::VariantRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// CRUD seam for job records and their ingested data
pub trait JobStore: Send + Sync {
    /// Allocate a fresh, never reused job identifier
    fn next_job_id(&self) -> Result<JobId>;

    fn save_job(&self, job: &CallingJob) -> Result<()>;

    fn load_job(&self, id: &JobId) -> Result<Option<CallingJob>>;

    /// All jobs, oldest first
    fn list_jobs(&self) -> Result<Vec<CallingJob>>;

    /// Replace the variant batch of a job in one step
    fn replace_variants(&self, id: &JobId, variants: &[VariantRecord]) -> Result<()>;

    fn variants(&self, id: &JobId) -> Result<Vec<VariantRecord>>;

    /// Replace the derived annotations of a job in one step
    fn replace_annotations(&self, id: &JobId, annotations: &[DerivedAnnotation]) -> Result<()>;

    fn annotations(&self, id: &JobId) -> Result<Vec<DerivedAnnotation>>;

    fn jobs_by_tumor_sample(&self, sample_id: &str) -> Result<Vec<CallingJob>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.tumor_sample == sample_id)
            .collect())
    }

    fn jobs_by_status(&self, status: JobStatus) -> Result<Vec<CallingJob>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.status == status)
            .collect())
    }

    /// Overwrite one stored annotation, matched by job and variant id
    fn update_annotation(&self, annotation: &DerivedAnnotation) -> Result<()> {
        let mut all = self.annotations(&annotation.job_id)?;
        let slot = all
            .iter_mut()
            .find(|a| a.variant_id == annotation.variant_id)
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "no annotation for variant {} of job {}",
                    annotation.variant_id, annotation.job_id
                ))
            })?;
        *slot = annotation.clone();
        self.replace_annotations(&annotation.job_id, &all)
    }
}

/// Decimal ids compare by length first so that "10" sorts after "9"
fn job_order(a: &CallingJob, b: &CallingJob) -> std::cmp::Ordering {
    (a.id.as_str().len(), a.id.as_str()).cmp(&(b.id.as_str().len(), b.id.as_str()))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Store(format!("{} lock poisoned", what)))
}

#[derive(Default)]
struct MemoryState {
    last_id: u64,
    jobs: HashMap<JobId, CallingJob>,
    variants: HashMap<JobId, Vec<VariantRecord>>,
    annotations: HashMap<JobId, Vec<DerivedAnnotation>>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryStore {
    fn next_job_id(&self) -> Result<JobId> {
        let mut state = lock(&self.state, "memory store")?;
        state.last_id += 1;
        Ok(JobId::new(state.last_id.to_string()))
    }

    fn save_job(&self, job: &CallingJob) -> Result<()> {
        lock(&self.state, "memory store")?
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn load_job(&self, id: &JobId) -> Result<Option<CallingJob>> {
        Ok(lock(&self.state, "memory store")?.jobs.get(id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<CallingJob>> {
        let mut jobs: Vec<CallingJob> = lock(&self.state, "memory store")?
            .jobs
            .values()
            .cloned()
            .collect();
        jobs.sort_by(job_order);
        Ok(jobs)
    }

    fn replace_variants(&self, id: &JobId, variants: &[VariantRecord]) -> Result<()> {
        lock(&self.state, "memory store")?
            .variants
            .insert(id.clone(), variants.to_vec());
        Ok(())
    }

    fn variants(&self, id: &JobId) -> Result<Vec<VariantRecord>> {
        Ok(lock(&self.state, "memory store")?
            .variants
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_annotations(&self, id: &JobId, annotations: &[DerivedAnnotation]) -> Result<()> {
        lock(&self.state, "memory store")?
            .annotations
            .insert(id.clone(), annotations.to_vec());
        Ok(())
    }

    fn annotations(&self, id: &JobId) -> Result<Vec<DerivedAnnotation>> {
        Ok(lock(&self.state, "memory store")?
            .annotations
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Serialize `value` next to `path` and rename it into place.
///
/// Readers never observe a partially written document.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::protocol_io(dir, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| PipelineError::protocol_io(dir, e))?;
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Store(format!("cannot serialize {}: {}", path.display(), e)))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.flush())
        .map_err(|e| PipelineError::protocol_io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::protocol_io(path, e.error))?;
    Ok(())
}

/// Store laid out as `jobs/<id>.json`, `variants/<id>.json` and
/// `annotations/<id>.json` below the state directory, plus a `last_id`
/// counter file.
pub struct JsonStore {
    root: PathBuf,
    /// Serializes id allocation within this process
    counter: Mutex<()>,
}

impl JsonStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["jobs", "variants", "annotations"] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| PipelineError::protocol_io(&dir, e))?;
        }
        log::debug!("Opened job store at {}", root.display());
        Ok(JsonStore {
            root,
            counter: Mutex::new(()),
        })
    }

    fn doc_path(&self, kind: &str, id: &JobId) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", id))
    }

    fn read_doc<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::protocol_io(path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PipelineError::Store(format!("corrupt document {}: {}", path.display(), e)))
    }
}

impl JobStore for JsonStore {
    fn next_job_id(&self) -> Result<JobId> {
        let _guard = lock(&self.counter, "job id counter")?;
        let path = self.root.join("last_id");
        let last: u64 = match std::fs::read_to_string(&path) {
            Ok(content) => content.trim().parse().map_err(|_| {
                PipelineError::Store(format!("corrupt job id counter in {}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(PipelineError::protocol_io(&path, e)),
        };
        let next = last + 1;
        write_json_atomic(&path, &next)?;
        Ok(JobId::new(next.to_string()))
    }

    fn save_job(&self, job: &CallingJob) -> Result<()> {
        write_json_atomic(&self.doc_path("jobs", &job.id), job)
    }

    fn load_job(&self, id: &JobId) -> Result<Option<CallingJob>> {
        self.read_doc(&self.doc_path("jobs", id))
    }

    fn list_jobs(&self) -> Result<Vec<CallingJob>> {
        let dir = self.root.join("jobs");
        let entries = std::fs::read_dir(&dir).map_err(|e| PipelineError::protocol_io(&dir, e))?;

        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::protocol_io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(job) = self.read_doc::<CallingJob>(&path)? {
                jobs.push(job);
            }
        }
        jobs.sort_by(job_order);
        Ok(jobs)
    }

    fn replace_variants(&self, id: &JobId, variants: &[VariantRecord]) -> Result<()> {
        write_json_atomic(&self.doc_path("variants", id), variants)
    }

    fn variants(&self, id: &JobId) -> Result<Vec<VariantRecord>> {
        Ok(self
            .read_doc(&self.doc_path("variants", id))?
            .unwrap_or_default())
    }

    fn replace_annotations(&self, id: &JobId, annotations: &[DerivedAnnotation]) -> Result<()> {
        write_json_atomic(&self.doc_path("annotations", id), annotations)
    }

    fn annotations(&self, id: &JobId) -> Result<Vec<DerivedAnnotation>> {
        Ok(self
            .read_doc(&self.doc_path("annotations", id))?
            .unwrap_or_default())
    }
}
