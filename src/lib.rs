//! mutaflow: somatic variant-calling job orchestration
//!
//! Drives an external variant-calling pipeline (file-drop protocol or direct
//! child-process invocation), tracks each calling job through its lifecycle,
//! ingests the produced variant-call file and derives clinical annotations
//! for every variant.

pub mod annotate;
pub mod config;
pub mod error;
pub mod ingest;
pub mod job;
pub mod orchestrator;
pub mod protocol;
pub mod samples;
pub mod store;
pub mod vcf;
pub mod watch;

pub use error::{PipelineError, Result};
pub use job::{CallingJob, JobId, JobStatus};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorOptions};
