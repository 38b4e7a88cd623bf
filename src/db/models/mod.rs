pub mod data_source;
pub mod job_execution;
pub mod processing_log;
pub mod summary;
pub mod technical_note;

pub use data_source::{ContentType, DataSource, NewDataSource, ScrapingConfig};
pub use job_execution::{JobExecution, JobRunStatus};
pub use processing_log::{LogLevel, NewProcessingLog, Operation, ProcessingLog};
pub use summary::{NewSummary, ProcessedSummary};
pub use technical_note::{NewTechnicalNote, NoteFilter, NoteStatus, TechnicalNote};
