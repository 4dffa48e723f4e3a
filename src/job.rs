//! Calling-job record and its lifecycle state machine

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, unique job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Lifecycle state of a calling job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Record persisted, not yet handed to the protocol layer
    Pending,
    /// Request artifact written or process launched
    Submitted,
    /// External side reported active work
    InProgress,
    Completed,
    Failed,
    /// Best-effort cancellation issued, external side may still finish
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// States from which a cancellation request is accepted
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Submitted | JobStatus::InProgress
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// IN_PROGRESS may be bypassed, and a CANCELLING job can still be
    /// overtaken by the external side finishing on its own.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Submitted) | (Pending, Failed) | (Pending, Cancelling) => true,
            (Submitted, InProgress)
            | (Submitted, Completed)
            | (Submitted, Failed)
            | (Submitted, Cancelling) => true,
            (InProgress, Completed) | (InProgress, Failed) | (InProgress, Cancelling) => true,
            (Cancelling, Cancelled) | (Cancelling, Completed) | (Cancelling, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Submitted => write!(f, "SUBMITTED"),
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelling => write!(f, "CANCELLING"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "SUBMITTED" => Ok(JobStatus::Submitted),
            "IN_PROGRESS" | "RUNNING" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLING" => Ok(JobStatus::Cancelling),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// One invocation of the external calling pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallingJob {
    pub id: JobId,
    pub tumor_sample: String,
    #[serde(default)]
    pub normal_sample: Option<String>,
    pub pipeline_version: String,
    /// Calling method (e.g. Mutect2)
    pub calling_method: String,
    pub reference_genome: String,
    #[serde(default)]
    pub panel_of_normals: Option<String>,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Variant-call file produced by a successful run
    #[serde(default)]
    pub output_path: Option<String>,
    /// Set on FAILED, or on a COMPLETED job whose ingestion failed
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress_log: Option<String>,
    #[serde(default)]
    pub total_variants_called: Option<usize>,
    #[serde(default)]
    pub variants_passed_filter: Option<usize>,
    /// Command line launched in direct-invocation mode
    #[serde(default)]
    pub command_line: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
}

impl CallingJob {
    pub fn new(
        id: JobId,
        tumor_sample: &str,
        normal_sample: Option<&str>,
        pipeline_version: &str,
        calling_method: &str,
        reference_genome: &str,
    ) -> Self {
        CallingJob {
            id,
            tumor_sample: tumor_sample.to_string(),
            normal_sample: normal_sample.map(str::to_string),
            pipeline_version: pipeline_version.to_string(),
            calling_method: calling_method.to_string(),
            reference_genome: reference_genome.to_string(),
            panel_of_normals: None,
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            output_path: None,
            error_message: None,
            progress_log: None,
            total_variants_called: None,
            variants_passed_filter: None,
            command_line: None,
            log_path: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting edges outside the lifecycle graph.
    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::StateConflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        log::info!("Job {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_submitted(&mut self, progress: &str) -> Result<()> {
        self.transition(JobStatus::Submitted)?;
        self.progress_log = Some(progress.to_string());
        Ok(())
    }

    /// Record active work; repeated calls only refresh the progress log.
    pub fn mark_in_progress(&mut self, progress: Option<String>) -> Result<()> {
        if self.status != JobStatus::InProgress {
            self.transition(JobStatus::InProgress)?;
        }
        if progress.is_some() {
            self.progress_log = progress;
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, output_path: String) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.output_path = Some(output_path);
        self.error_message = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn mark_cancelling(&mut self) -> Result<()> {
        if !self.status.is_cancellable() {
            return Err(PipelineError::StateConflict(format!(
                "job {} is {} and cannot be cancelled",
                self.id, self.status
            )));
        }
        self.transition(JobStatus::Cancelling)
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)
    }

    /// Ingestion failures leave the job COMPLETED but visible through the error message.
    pub fn record_ingestion_failure(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> CallingJob {
        CallingJob::new(JobId::new("1"), "S1", None, "4.4.0", "Mutect2", "GRCh38")
    }

    #[test]
    fn test_happy_path_sets_end_time_only_when_terminal() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_submitted("Job submitted").unwrap();
        job.mark_in_progress(Some("Mutect2 10%".into())).unwrap();
        job.mark_in_progress(Some("Mutect2 50%".into())).unwrap();
        assert!(job.end_time.is_none());
        assert_eq!(job.progress_log.as_deref(), Some("Mutect2 50%"));

        job.mark_completed("/out/1/variants.vcf".into()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.end_time.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_failure_sets_error_message() {
        let mut job = job();
        job.mark_failed("Failed to submit job: disk full").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.end_time.is_some());
        assert_eq!(
            job.error_message.as_deref(),
            Some("Failed to submit job: disk full")
        );
    }

    #[rstest]
    #[case(JobStatus::Pending, true)]
    #[case(JobStatus::Submitted, true)]
    #[case(JobStatus::InProgress, true)]
    #[case(JobStatus::Cancelling, false)]
    #[case(JobStatus::Completed, false)]
    #[case(JobStatus::Failed, false)]
    #[case(JobStatus::Cancelled, false)]
    fn test_cancellable_states(#[case] status: JobStatus, #[case] expected: bool) {
        assert_eq!(status.is_cancellable(), expected);
        assert_eq!(status.can_transition_to(JobStatus::Cancelling), expected);
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        use JobStatus::*;
        let all = [
            Pending, Submitted, InProgress, Completed, Failed, Cancelling, Cancelled,
        ];
        for from in [Completed, Failed, Cancelled] {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_cancel_completed_is_state_conflict() {
        let mut job = job();
        job.mark_submitted("submitted").unwrap();
        job.mark_completed("/out/1/variants.vcf".into()).unwrap();
        let before = job.clone();

        let err = job.mark_cancelling().unwrap_err();
        assert!(matches!(err, PipelineError::StateConflict(_)));
        assert_eq!(job, before);
    }

    #[test]
    fn test_cancelling_job_may_still_complete() {
        let mut job = job();
        job.mark_submitted("submitted").unwrap();
        job.mark_cancelling().unwrap();
        job.mark_completed("/out/1/variants.vcf".into()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_status_serde_and_parse() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
