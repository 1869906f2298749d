use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::{DocumentType, JobId};

/// Errors returned synchronously by the job manager. None of these ever
/// leave a job record behind.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("file content is empty")]
    EmptyContent,
    #[error("file size {size} exceeds the limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid page request: page={page}, page_size={page_size}")]
    InvalidPage { page: usize, page_size: usize },
    #[error("job manager is shut down")]
    Closed,
}

/// Why a job ended in `Failed` or `TimedOut`. Recorded on the job itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("processing failed: {message}")]
    ProcessingFailed { message: String },
    #[error("deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },
}

impl FailureReason {
    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::ProcessingFailed {
            message: message.into(),
        }
    }

    pub fn deadline_exceeded(timeout: Duration) -> Self {
        Self::DeadlineExceeded {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("no processor registered for {0} documents")]
    Unsupported(DocumentType),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("`{0}` produced no markdown output")]
    MissingOutput(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
