use chrono::{DateTime, Utc};

use crate::{
    entities::{DocumentType, ExtractionResult, JobId, JobSnapshot, JobState, ProcessOptions},
    error::FailureReason,
};

/// Registry-owned job record. Transitions only move forward; each `mark_*`
/// returns `false` and leaves the record untouched when applied out of order.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) filename: String,
    pub(crate) file_size: u64,
    pub(crate) document_type: DocumentType,
    pub(crate) options: ProcessOptions,
    pub(crate) state: JobState,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) result: Option<ExtractionResult>,
    pub(crate) failure: Option<FailureReason>,
}

impl Job {
    pub(crate) fn new(
        filename: &str,
        file_size: u64,
        document_type: DocumentType,
        options: ProcessOptions,
    ) -> Self {
        Self {
            id: JobId::new(),
            filename: filename.to_owned(),
            file_size,
            document_type,
            options,
            state: JobState::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            failure: None,
        }
    }

    pub(crate) fn mark_running(&mut self) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn mark_completed(&mut self, result: ExtractionResult) -> bool {
        if !self.finish(JobState::Completed) {
            return false;
        }
        self.result = Some(result);
        true
    }

    pub(crate) fn mark_failed(&mut self, reason: FailureReason) -> bool {
        if !self.finish(JobState::Failed) {
            return false;
        }
        self.failure = Some(reason);
        true
    }

    pub(crate) fn mark_timed_out(&mut self, reason: FailureReason) -> bool {
        if !self.finish(JobState::TimedOut) {
            return false;
        }
        self.failure = Some(reason);
        true
    }

    fn finish(&mut self, state: JobState) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.state = state;
        self.completed_at = Some(Utc::now());
        true
    }

    pub(crate) fn processing_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            filename: self.filename.clone(),
            file_size: self.file_size,
            document_type: self.document_type,
            extraction_mode: self.options.extraction_mode,
            state: self.state,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            processing_time_ms: self.processing_time_ms(),
            result: self.result.clone(),
            failure: self.failure.clone(),
        }
    }
}
