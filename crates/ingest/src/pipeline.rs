use futures_util::future::join_all;
use indexmap::IndexMap;
use kestrel_core::EntityId;
use kestrel_ports::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::record::IngestRecord;
use crate::report::{IngestReport, PipelineError};
use crate::sink::{CommandSink, SubmitError};
use crate::source::{CsvSource, SourceItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parsed rows held between the reader and the submitters
    pub buffer_size: usize,
    /// Rows drained per round
    pub batch_size: usize,
    pub has_headers: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            batch_size: 256,
            has_headers: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// A record whose submission kept failing
struct Stalled {
    line: u64,
    entity_id: EntityId,
    attempts: u32,
    error: SubmitError,
}

/// Feeds CSV sources into a [`CommandSink`].
///
/// Each round drains up to `batch_size` rows, groups them by entity in
/// first-seen order and submits the groups concurrently. Records of one
/// entity go out one at a time in file order.
pub struct IngestPipeline<S: CommandSink> {
    sink: Arc<S>,
    config: PipelineConfig,
}

impl<S: CommandSink> IngestPipeline<S> {
    pub fn new(sink: Arc<S>, config: PipelineConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest every file concurrently; a failing source does not stop the others
    pub async fn run_all(&self, paths: &[PathBuf]) -> Vec<Result<IngestReport, PipelineError>> {
        join_all(paths.iter().map(|path| self.run(path))).await
    }

    pub async fn run(&self, path: impl AsRef<Path>) -> Result<IngestReport, PipelineError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let (mut rx, _reader) = CsvSource::new(path)
            .with_headers(self.config.has_headers)
            .with_buffer_size(self.config.buffer_size)
            .spawn();

        info!(source = %name, sink = self.sink.name(), "Ingestion started");
        let mut report = IngestReport::new(name.clone());
        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);

        while rx.recv_many(&mut batch, batch_size).await > 0 {
            let mut groups: IndexMap<EntityId, Vec<IngestRecord>> = IndexMap::new();
            for item in batch.drain(..) {
                match item {
                    SourceItem::Record(record) => {
                        report.records_read += 1;
                        groups
                            .entry(record.entity_id.clone())
                            .or_default()
                            .push(record);
                    }
                    SourceItem::Malformed { line, error } => {
                        report.records_read += 1;
                        warn!(source = %name, line, error = %error, "Malformed record");
                        report.record_malformed(line, error.to_string());
                    }
                    SourceItem::Failed(reason) => {
                        warn!(source = %name, reason = %reason, "Source failed");
                        return Err(PipelineError::Source { path: name, reason });
                    }
                }
            }

            debug!(source = %name, entities = groups.len(), "Submitting batch");
            let outcomes = join_all(
                groups
                    .into_iter()
                    .map(|(entity_id, records)| self.submit_group(entity_id, records)),
            )
            .await;

            let mut stalled: Option<Stalled> = None;
            for (group_report, group_stalled) in outcomes {
                report.merge(group_report);
                if let Some(s) = group_stalled
                    && stalled.as_ref().is_none_or(|first| s.line < first.line)
                {
                    stalled = Some(s);
                }
            }

            if let Some(s) = stalled {
                warn!(
                    source = %name,
                    line = s.line,
                    entity_id = %s.entity_id,
                    attempts = s.attempts,
                    error = %s.error,
                    "Giving up on source"
                );
                return Err(PipelineError::RetriesExhausted {
                    path: name,
                    line: s.line,
                    entity_id: s.entity_id.to_string(),
                    attempts: s.attempts,
                    reason: s.error.to_string(),
                    report: Box::new(report.finish()),
                });
            }
        }

        let report = report.finish();
        info!(
            source = %name,
            records = report.records_read,
            accepted = report.accepted,
            rejected = report.rejected,
            malformed = report.malformed,
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Submit one entity's records in order, stopping at the first record
    /// that cannot be delivered
    async fn submit_group(
        &self,
        entity_id: EntityId,
        records: Vec<IngestRecord>,
    ) -> (IngestReport, Option<Stalled>) {
        let mut report = IngestReport::default();
        for record in records {
            match self.submit_with_retry(&record).await {
                Ok(()) => report.accepted += 1,
                Err((attempts, SubmitError::Rejected { code, message })) => {
                    debug!(line = record.line, entity_id = %entity_id, attempts, code = %code, "Record rejected");
                    report.record_rejected(record.line, entity_id.to_string(), code, message);
                }
                Err((_, SubmitError::Invalid(message))) => {
                    warn!(line = record.line, entity_id = %entity_id, message = %message, "Record refused as invalid");
                    report.record_rejected(
                        record.line,
                        entity_id.to_string(),
                        "invalid_request".to_string(),
                        message,
                    );
                }
                Err((attempts, error)) => {
                    return (
                        report,
                        Some(Stalled {
                            line: record.line,
                            entity_id,
                            attempts,
                            error,
                        }),
                    );
                }
            }
        }
        (report, None)
    }

    async fn submit_with_retry(&self, record: &IngestRecord) -> Result<(), (u32, SubmitError)> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.sink.submit(&record.entity_id, &record.request).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && policy.allows_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        line = record.line,
                        entity_id = %record.entity_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }
}
