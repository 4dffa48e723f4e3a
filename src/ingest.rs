//! Materializes the variants of a completed job and derives their annotations

use crate::annotate::{AnnotationEngine, AnnotationFactSource, DerivedAnnotation};
use crate::error::{PipelineError, Result};
use crate::job::{CallingJob, JobStatus};
use crate::store::JobStore;
use crate::vcf;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Counters produced by one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub total: usize,
    pub passed: usize,
    pub annotated: usize,
}

pub struct IngestionCoordinator {
    store: Arc<dyn JobStore>,
    facts: Arc<dyn AnnotationFactSource>,
    engine: AnnotationEngine,
    output_dir: PathBuf,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        facts: Arc<dyn AnnotationFactSource>,
        engine: AnnotationEngine,
        output_dir: &Path,
    ) -> Self {
        IngestionCoordinator {
            store,
            facts,
            engine,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Reported output paths are relative to the output directory unless absolute
    pub fn resolve_output_path(&self, job: &CallingJob) -> Result<PathBuf> {
        let reported = job.output_path.as_deref().ok_or_else(|| {
            PipelineError::StateConflict(format!("job {} has no output path", job.id))
        })?;
        Ok(self.output_dir.join(reported))
    }

    /// Parse the job's variant-call file, persist the batch, update the job's
    /// counters and derive annotations.
    ///
    /// The batch is stored only if every line parses. The caller persists `job`.
    pub fn ingest(&self, job: &mut CallingJob) -> Result<IngestSummary> {
        if job.status != JobStatus::Completed {
            return Err(PipelineError::StateConflict(format!(
                "job {} is {}, only COMPLETED jobs can be ingested",
                job.id, job.status
            )));
        }

        let path = self.resolve_output_path(job)?;
        log::info!("Ingesting variants for job {} from {}", job.id, path.display());
        let batch = vcf::parse_vcf(&path, &job.id)?;

        self.store.replace_variants(&job.id, &batch.records)?;
        job.total_variants_called = Some(batch.total);
        job.variants_passed_filter = Some(batch.passed);
        job.progress_log = Some(format!(
            "Ingested {} variants ({} passed filters)",
            batch.total, batch.passed
        ));

        let annotated = self.annotate(job)?.len();
        log::info!(
            "Job {}: {} variants, {} PASS, {} annotated",
            job.id,
            batch.total,
            batch.passed,
            annotated
        );
        Ok(IngestSummary {
            total: batch.total,
            passed: batch.passed,
            annotated,
        })
    }

    /// Derive annotations for every stored variant of `job`, replacing earlier ones
    pub fn annotate(&self, job: &CallingJob) -> Result<Vec<DerivedAnnotation>> {
        let variants = self.store.variants(&job.id)?;
        log::info!(
            "Annotating {} variants for job {} using {}",
            variants.len(),
            job.id,
            self.facts.name()
        );

        let annotations = variants
            .par_iter()
            .map(|v| {
                self.facts
                    .fetch(v)
                    .map(|facts| self.engine.derive(v, facts))
            })
            .collect::<Result<Vec<_>>>()?;

        self.store.replace_annotations(&job.id, &annotations)?;
        Ok(annotations)
    }
}
