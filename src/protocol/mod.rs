//! Hand-off to the external variant-calling pipeline
//!
//! Two transports implement [`PipelineRunner`]:
//! - [`FileDropRunner`]: request and status artifacts in shared directories
//! - [`DirectRunner`]: the caller is launched as a monitored child process
//!
//! The orchestrator only sees the trait.

mod direct;
mod file_drop;

pub use direct::DirectRunner;
pub use file_drop::{CancelRequest, FileDropRunner, JobRequest, StatusArtifact};

use crate::config::{PipelineConfig, PipelineMode};
use crate::error::Result;
use crate::job::CallingJob;
use crate::samples::SampleInfo;
use std::sync::Arc;

/// Alignment inputs resolved for one job
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub tumor: SampleInfo,
    pub normal: Option<SampleInfo>,
}

/// What the transport recorded while handing a job over
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Progress-log line for the SUBMITTED job
    pub progress: String,
    pub command_line: Option<String>,
    pub log_path: Option<String>,
}

/// Observed state of a submitted job
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing reported yet
    Pending,
    /// Work under way, with optional progress text
    InProgress(Option<String>),
    /// Finished; path of the produced variant-call file
    Completed(String),
    /// Finished unsuccessfully; cause
    Failed(String),
}

/// Submit / poll / cancel capability over one transport.
///
/// `poll` must never block on the external side finishing.
pub trait PipelineRunner: Send + Sync {
    fn name(&self) -> &str;

    fn submit(&self, job: &CallingJob, request: &SubmitRequest) -> Result<Submission>;

    fn poll(&self, job: &CallingJob) -> Result<PollOutcome>;

    /// Best-effort cancellation. `true` once the external side is known to be
    /// stopped or the request is accepted as final.
    fn cancel(&self, job: &CallingJob) -> Result<bool>;
}

/// Build the runner selected by `pipeline.mode`
pub fn runner_from_config(config: &PipelineConfig) -> Arc<dyn PipelineRunner> {
    match config.mode {
        PipelineMode::FileDrop => Arc::new(FileDropRunner::new(
            &config.input_dir,
            &config.output_dir,
            &config.reference_path,
        )),
        PipelineMode::Direct => Arc::new(DirectRunner::from_config(config)),
    }
}
