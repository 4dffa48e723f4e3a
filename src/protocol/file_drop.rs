//! File-drop transport
//!
//! The core writes `job_request_<id>.json` into the input directory and later
//! reads `<id>.status` from the output directory. Cancellation drops
//! `cancel_<id>.json` next to the request; the pipeline may ignore it.

use super::{PipelineRunner, PollOutcome, Submission, SubmitRequest};
use crate::error::{PipelineError, Result};
use crate::job::{CallingJob, JobId};
use crate::store::write_json_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub tumor_bam: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_bam: Option<String>,
    /// Reference FASTA path
    pub reference_genome: String,
    pub calling_method: String,
}

/// Result artifact written by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusArtifact {
    /// "completed", "failed", anything else means still running
    pub status: String,
    #[serde(default)]
    pub vcf_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
}

impl StatusArtifact {
    pub fn outcome(&self) -> PollOutcome {
        match self.status.as_str() {
            "completed" => match &self.vcf_path {
                Some(path) => PollOutcome::Completed(path.clone()),
                None => PollOutcome::Failed(
                    "pipeline reported completion without a vcf_path".to_string(),
                ),
            },
            "failed" => PollOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            _ => PollOutcome::InProgress(self.progress.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub job_id: JobId,
    pub action: String,
}

pub struct FileDropRunner {
    input_dir: PathBuf,
    output_dir: PathBuf,
    reference_path: String,
}

impl FileDropRunner {
    pub fn new(input_dir: &Path, output_dir: &Path, reference_path: &str) -> Self {
        FileDropRunner {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            reference_path: reference_path.to_string(),
        }
    }

    pub fn request_path(&self, id: &JobId) -> PathBuf {
        self.input_dir.join(format!("job_request_{}.json", id))
    }

    pub fn status_path(&self, id: &JobId) -> PathBuf {
        self.output_dir.join(format!("{}.status", id))
    }

    pub fn cancel_path(&self, id: &JobId) -> PathBuf {
        self.input_dir.join(format!("cancel_{}.json", id))
    }
}

impl PipelineRunner for FileDropRunner {
    fn name(&self) -> &str {
        "file_drop"
    }

    fn submit(&self, job: &CallingJob, request: &SubmitRequest) -> Result<Submission> {
        let artifact = JobRequest {
            job_id: job.id.clone(),
            tumor_bam: request.tumor.bam.clone(),
            normal_bam: request.normal.as_ref().map(|n| n.bam.clone()),
            reference_genome: self.reference_path.clone(),
            calling_method: job.calling_method.clone(),
        };
        let path = self.request_path(&job.id);
        write_json_atomic(&path, &artifact)?;
        log::info!("Wrote job request {}", path.display());

        Ok(Submission {
            progress: "Job submitted to pipeline runner".to_string(),
            ..Submission::default()
        })
    }

    fn poll(&self, job: &CallingJob) -> Result<PollOutcome> {
        let path = self.status_path(&job.id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PollOutcome::Pending),
            Err(e) => return Err(PipelineError::protocol_io(&path, e)),
        };

        // The pipeline may still be writing the artifact
        match serde_json::from_str::<StatusArtifact>(&content) {
            Ok(artifact) => Ok(artifact.outcome()),
            Err(e) => {
                log::warn!("Unreadable status artifact {}: {}", path.display(), e);
                Ok(PollOutcome::Pending)
            }
        }
    }

    fn cancel(&self, job: &CallingJob) -> Result<bool> {
        let path = self.cancel_path(&job.id);
        write_json_atomic(
            &path,
            &CancelRequest {
                job_id: job.id.clone(),
                action: "cancel".to_string(),
            },
        )?;
        log::info!("Wrote cancel request {}", path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::SampleInfo;
    use pretty_assertions::assert_eq;

    fn sample(id: &str) -> SampleInfo {
        SampleInfo {
            id: id.to_string(),
            label: None,
            bam: format!("/bams/{}.bam", id),
        }
    }

    fn setup() -> (tempfile::TempDir, FileDropRunner, CallingJob) {
        let dir = tempfile::tempdir().unwrap();
        let runner = FileDropRunner::new(
            &dir.path().join("in"),
            &dir.path().join("out"),
            "/refs/GRCh38.fa",
        );
        let job = CallingJob::new(JobId::new("7"), "S1", Some("N1"), "4.4.0", "Mutect2", "GRCh38");
        (dir, runner, job)
    }

    #[test]
    fn test_submit_writes_request() {
        let (_dir, runner, job) = setup();
        let request = SubmitRequest {
            tumor: sample("S1"),
            normal: Some(sample("N1")),
        };
        runner.submit(&job, &request).unwrap();

        let written = std::fs::read_to_string(runner.request_path(&job.id)).unwrap();
        let parsed: JobRequest = serde_json::from_str(&written).unwrap();
        assert_eq!(
            parsed,
            JobRequest {
                job_id: JobId::new("7"),
                tumor_bam: "/bams/S1.bam".to_string(),
                normal_bam: Some("/bams/N1.bam".to_string()),
                reference_genome: "/refs/GRCh38.fa".to_string(),
                calling_method: "Mutect2".to_string(),
            }
        );
    }

    #[test]
    fn test_tumor_only_request_omits_normal() {
        let (_dir, runner, job) = setup();
        let request = SubmitRequest {
            tumor: sample("S1"),
            normal: None,
        };
        runner.submit(&job, &request).unwrap();
        let written = std::fs::read_to_string(runner.request_path(&job.id)).unwrap();
        assert!(!written.contains("normal_bam"));
    }

    #[test]
    fn test_poll_reads_status_artifact() {
        let (dir, runner, job) = setup();
        assert_eq!(runner.poll(&job).unwrap(), PollOutcome::Pending);

        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        let status = runner.status_path(&job.id);

        std::fs::write(&status, r#"{"status": "running", "progress": "Mutect2 40%"}"#).unwrap();
        assert_eq!(
            runner.poll(&job).unwrap(),
            PollOutcome::InProgress(Some("Mutect2 40%".to_string()))
        );

        std::fs::write(&status, r#"{"status": "failed"}"#).unwrap();
        assert_eq!(
            runner.poll(&job).unwrap(),
            PollOutcome::Failed("Unknown error".to_string())
        );

        std::fs::write(&status, r#"{"status": "completed", "vcf_path": "/out/7/variants.vcf"}"#)
            .unwrap();
        assert_eq!(
            runner.poll(&job).unwrap(),
            PollOutcome::Completed("/out/7/variants.vcf".to_string())
        );

        std::fs::write(&status, r#"{"status": "compl"#).unwrap();
        assert_eq!(runner.poll(&job).unwrap(), PollOutcome::Pending);
    }

    #[test]
    fn test_cancel_writes_request() {
        let (_dir, runner, job) = setup();
        assert!(runner.cancel(&job).unwrap());
        let written = std::fs::read_to_string(runner.cancel_path(&job.id)).unwrap();
        let parsed: CancelRequest = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.action, "cancel");
        assert_eq!(parsed.job_id, job.id);
    }

    #[test]
    fn test_unwritable_input_dir_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("in");
        std::fs::write(&blocker, "not a directory").unwrap();
        let runner = FileDropRunner::new(&blocker, dir.path(), "/refs/GRCh38.fa");
        let job = CallingJob::new(JobId::new("1"), "S1", None, "4.4.0", "Mutect2", "GRCh38");
        let request = SubmitRequest {
            tumor: sample("S1"),
            normal: None,
        };
        let err = runner.submit(&job, &request).unwrap_err();
        assert!(matches!(err, PipelineError::ProtocolIo { .. }));
    }
}
