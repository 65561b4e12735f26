pub mod config;
pub mod report;
pub mod scoring;
pub mod session;

pub use config::{DEFAULT_DATA_DIR, DEFAULT_TEMP_DIR, SessionConfig};
pub use report::{
    ClientInfo, FileReportGenerator, LogOutcome, ReportArtifact, ReportError, ReportGenerator,
    ReportRequest, SubmissionLog, SubmissionRecord, clear_temp_reports, prune_temp_reports,
};
pub use scoring::{
    PdfOptions, ResultTable, Scorer, ScoringContractError, ScoringError, ScoringResult,
    ScriptLanguage, ScriptScorer,
};
pub use session::{DEFAULT_INVALID_MESSAGE, FlowError, ResultsPanel, Session, StepResponse};
