//! Error taxonomy for job orchestration, ingestion and annotation

use thiserror::Error;

/// Errors raised by the orchestration core.
///
/// Failures that happen behind an asynchronous boundary (submission, polling,
/// ingestion) are recorded on the job itself; these values are what the
/// immediate caller sees for synchronous operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown sample/job reference or malformed request input
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure writing or reading a protocol artifact
    #[error("protocol I/O error at {path}: {source}")]
    ProtocolIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed variant-call line
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// External tool exited non-zero or could not be launched
    #[error("external process error: {0}")]
    ExternalProcess(String),

    /// Operation requested against a job in an ineligible state
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Persistence layer failure
    #[error("store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub fn protocol_io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PipelineError::ProtocolIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Short tag for logs and job error messages
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::ProtocolIo { .. } => "protocol_io",
            PipelineError::Parse { .. } => "parse",
            PipelineError::ExternalProcess(_) => "external_process",
            PipelineError::StateConflict(_) => "state_conflict",
            PipelineError::Store(_) => "store",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = PipelineError::parse(12, "position is not numeric: 'abc'");
        assert_eq!(
            err.to_string(),
            "parse error at line 12: position is not numeric: 'abc'"
        );
        assert_eq!(err.kind(), "parse");

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = PipelineError::protocol_io("/data/inputs/job_request_1.json", io);
        assert!(err.to_string().contains("/data/inputs/job_request_1.json"));
        assert_eq!(err.kind(), "protocol_io");
    }
}
