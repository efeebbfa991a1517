//! Kestrel Ingest
//!
//! Streams CSV files of trader records into trader entities, either through
//! a running gateway or an in-process entity runtime.
//!
//! # Flow
//!
//! ```text
//! CsvSource (blocking reader) --bounded channel--> IngestPipeline
//!     -> group by entity -> CommandSink (HTTP or in-process) -> IngestReport
//! ```

pub mod client;
pub mod local;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod sink;
pub mod source;

pub use client::{ClientError, HttpCommandSink};
pub use local::RuntimeCommandSink;
pub use pipeline::{IngestPipeline, PipelineConfig};
pub use record::{CommandRequest, IngestRecord, RecordError};
pub use report::{FailureReason, IngestReport, PipelineError, RecordFailure};
pub use sink::{CommandSink, SubmitError};
pub use source::{CsvSource, SourceItem};
