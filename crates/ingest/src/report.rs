use serde::Serialize;
use thiserror::Error;

/// Why a single record did not take effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The row could not be turned into a command
    Malformed { message: String },
    /// The entity or the service refused the command
    Rejected { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub line: u64,
    pub entity_id: Option<String>,
    #[serde(flatten)]
    pub reason: FailureReason,
}

/// Outcome of ingesting one source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub records_read: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub malformed: u64,
    /// Sorted by line
    pub failures: Vec<RecordFailure>,
}

impl IngestReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub(crate) fn record_malformed(&mut self, line: u64, message: String) {
        self.malformed += 1;
        self.failures.push(RecordFailure {
            line,
            entity_id: None,
            reason: FailureReason::Malformed { message },
        });
    }

    pub(crate) fn record_rejected(
        &mut self,
        line: u64,
        entity_id: String,
        code: String,
        message: String,
    ) {
        self.rejected += 1;
        self.failures.push(RecordFailure {
            line,
            entity_id: Some(entity_id),
            reason: FailureReason::Rejected { code, message },
        });
    }

    pub(crate) fn merge(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.malformed += other.malformed;
        self.failures.extend(other.failures);
    }

    pub(crate) fn finish(mut self) -> Self {
        self.failures.sort_by_key(|f| f.line);
        self
    }

    pub fn failed(&self) -> u64 {
        self.rejected + self.malformed
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read {path}: {reason}")]
    Source { path: String, reason: String },

    #[error(
        "{path}: line {line} for {entity_id} still failing after {attempts} attempts: {reason}"
    )]
    RetriesExhausted {
        path: String,
        line: u64,
        entity_id: String,
        attempts: u32,
        reason: String,
        /// What was ingested before the source halted
        report: Box<IngestReport>,
    },
}

impl PipelineError {
    pub fn partial_report(&self) -> Option<&IngestReport> {
        match self {
            PipelineError::RetriesExhausted { report, .. } => Some(report),
            PipelineError::Source { .. } => None,
        }
    }
}
