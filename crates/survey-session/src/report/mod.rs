//! Report boundary: everything that happens to a completed submission.
//!
//! [`FileReportGenerator`] writes a Markdown report and, when user data is
//! persisted, a CBOR archive record plus one row in the submission log.

mod archive;
mod document;
mod log;
mod reference;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use survey_spec::{AnswerContext, ENGINE_VERSION, Questionnaire};

use crate::config::SessionConfig;
use crate::scoring::ScoringResult;

pub use archive::ArchiveRecord;
pub use document::{DocumentMeta, ReportDocument};
pub use log::{DATETIME_FORMAT, LOG_FILE_NAME, LogOutcome, SubmissionLog, SubmissionRecord};
pub use reference::{
    CODE_DIGITS, CODE_LETTERS, answers_hash, client_hashes, flatten_results, reference_code,
    sanitize_key,
};

/// String metadata about the respondent's client, e.g. user agent. Only
/// salted hashes of the values are persisted.
pub type ClientInfo = BTreeMap<String, String>;

static TEMP_REPORT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^survey_[A-Z0-9]{3}-[A-Z0-9]{3}_\d+\.md$").expect("temp report pattern")
});

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid report template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to render report: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("failed to encode archive record: {0}")]
    Archive(#[from] serde_cbor::Error),
    #[error("failed to encode submission record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Everything a report is built from.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    pub questionnaire: &'a Questionnaire,
    pub answers: &'a AnswerContext,
    pub scoring: &'a ScoringResult,
    pub client_info: Option<&'a ClientInfo>,
}

/// Handle to a generated report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub reference_code: String,
    pub archive: Option<PathBuf>,
    /// `None` when nothing was logged, either by configuration or because
    /// the log write failed.
    pub log: Option<LogOutcome>,
}

pub trait ReportGenerator: Send + Sync {
    fn generate(&self, request: &ReportRequest<'_>) -> Result<ReportArtifact, ReportError>;
}

pub struct FileReportGenerator {
    config: SessionConfig,
    document: ReportDocument,
}

impl FileReportGenerator {
    pub fn new(config: SessionConfig) -> Result<Self, ReportError> {
        Ok(Self {
            config,
            document: ReportDocument::new()?,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl ReportGenerator for FileReportGenerator {
    fn generate(&self, request: &ReportRequest<'_>) -> Result<ReportArtifact, ReportError> {
        let now = Utc::now();
        let timestamp = now.timestamp();
        let reference = reference_code(&mut rand::thread_rng());
        let generated_at = now.format(DATETIME_FORMAT).to_string();
        let text = self.document.render(
            request.questionnaire,
            request.answers,
            request.scoring,
            DocumentMeta {
                reference_code: &reference,
                survey_url: self.config.actual_url.as_deref(),
                generated_at: &generated_at,
            },
        )?;

        if !self.config.save_user_data {
            let dir = &self.config.temp_dir;
            fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
            prune_temp_reports(dir, self.config.temp_report_max_age);
            let path = dir.join(format!("survey_{reference}_{timestamp}.md"));
            fs::write(&path, text).map_err(|source| io_error(&path, source))?;
            info!(reference = %reference, path = %path.display(), "temporary report written");
            return Ok(ReportArtifact {
                path,
                reference_code: reference,
                archive: None,
                log: None,
            });
        }

        let questionnaire = request.questionnaire;
        let results = flatten_results(&request.scoring.table);
        let hashes = request
            .client_info
            .map(|info| client_hashes(&reference, info))
            .unwrap_or_default();
        let dir = &self.config.data_dir;
        fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;

        let archive_path = dir.join(format!("{timestamp}_{reference}.cbor"));
        ArchiveRecord {
            survey_name: questionnaire.name().to_string(),
            survey_version: questionnaire.version().to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            reference_code: reference.clone(),
            timestamp_unix: timestamp,
            answers: request.answers.as_map().clone(),
            table: request.scoring.table.rows().to_vec(),
            results: results.clone(),
            client_hashes: hashes.clone(),
            survey_url: self.config.actual_url.clone(),
        }
        .write(&archive_path)?;

        let path = dir.join(format!("{timestamp}_{reference}.md"));
        fs::write(&path, text).map_err(|source| io_error(&path, source))?;

        let mut record = SubmissionRecord::new(&reference, now);
        record.results = results;
        record.answers_hash = answers_hash(request.answers.as_map());
        record.client_hashes = hashes;
        let log = SubmissionLog::for_survey(
            &self.config,
            questionnaire.name(),
            questionnaire.version(),
        );
        let log = match log.append(record) {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                warn!(reference = %reference, %error, "submission log write failed");
                None
            }
        };

        info!(
            reference = %reference,
            path = %path.display(),
            logged = log.is_some(),
            "report written"
        );
        Ok(ReportArtifact {
            path,
            reference_code: reference,
            archive: Some(archive_path),
            log,
        })
    }
}

/// Deletes temporary reports older than `max_age`. Returns how many went.
pub fn prune_temp_reports(dir: &Path, max_age: Duration) -> usize {
    remove_temp_reports(dir, |age| age >= max_age)
}

/// Deletes every temporary report in `dir`.
pub fn clear_temp_reports(dir: &Path) -> usize {
    remove_temp_reports(dir, |_| true)
}

fn remove_temp_reports(dir: &Path, expired: impl Fn(Duration) -> bool) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            debug!(dir = %dir.display(), %error, "temp report directory not readable");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| TEMP_REPORT_NAME.is_match(name));
        if !is_report {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if !expired(age) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => warn!(path = %path.display(), %error, "failed to remove temp report"),
        }
    }
    if removed > 0 {
        info!(dir = %dir.display(), removed, "temporary reports removed");
    }
    removed
}

fn io_error(path: &Path, source: io::Error) -> ReportError {
    ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{PdfOptions, ResultTable};
    use serde_json::json;
    use survey_spec::{Format, parse_spec};

    fn questionnaire() -> Questionnaire {
        let spec = parse_spec(
            r#"{
                "survey_name": "screen",
                "survey_version": "1",
                "questions": [
                    { "order": 1, "variable": "age", "question": "Age", "widget": "number" }
                ]
            }"#,
            Format::Json,
        )
        .expect("parse");
        Questionnaire::new(spec).expect("questionnaire")
    }

    fn scoring() -> ScoringResult {
        ScoringResult {
            markdown: "Low risk".into(),
            table: ResultTable::new(vec![
                vec!["Model".into(), "Risk 5y".into()],
                vec!["basic".into(), "0.2".into()],
            ])
            .expect("table"),
            options: PdfOptions::default(),
        }
    }

    fn config(root: &Path, save_user_data: bool) -> SessionConfig {
        SessionConfig {
            save_user_data,
            data_dir: root.join("data"),
            temp_dir: root.join("tmp"),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn temporary_report_leaves_no_user_data() {
        let root = tempfile::tempdir().expect("tempdir");
        let generator = FileReportGenerator::new(config(root.path(), false)).expect("generator");
        let survey = questionnaire();
        let answers = AnswerContext::initial(survey.questions()).with_answer("age", json!(61));
        let scoring = scoring();

        let artifact = generator
            .generate(&ReportRequest {
                questionnaire: &survey,
                answers: &answers,
                scoring: &scoring,
                client_info: None,
            })
            .expect("report");

        assert!(artifact.path.starts_with(root.path().join("tmp")));
        assert!(artifact.archive.is_none());
        assert!(artifact.log.is_none());
        let text = fs::read_to_string(&artifact.path).expect("report text");
        assert!(text.contains(&artifact.reference_code));
        assert!(!root.path().join("data").exists());
    }

    #[test]
    fn persisted_report_is_archived_and_logged() {
        let root = tempfile::tempdir().expect("tempdir");
        let generator = FileReportGenerator::new(config(root.path(), true)).expect("generator");
        let survey = questionnaire();
        let answers = AnswerContext::initial(survey.questions()).with_answer("age", json!(61));
        let scoring = scoring();
        let client = ClientInfo::from([("user_agent".to_string(), "curl/8".to_string())]);

        let artifact = generator
            .generate(&ReportRequest {
                questionnaire: &survey,
                answers: &answers,
                scoring: &scoring,
                client_info: Some(&client),
            })
            .expect("report");

        assert!(artifact.path.starts_with(root.path().join("data")));
        let archive = ArchiveRecord::read(artifact.archive.as_deref().expect("archive"))
            .expect("archive record");
        assert_eq!(archive.reference_code, artifact.reference_code);
        assert_eq!(archive.answers["age"], json!(61));
        assert_eq!(archive.results["basic_Risk_5y"], "0.2");
        assert!(archive.client_hashes.contains_key("user_agent_hash"));

        let log = artifact.log.expect("logged");
        let line = fs::read_to_string(log.path()).expect("log");
        let record: SubmissionRecord =
            serde_json::from_str(line.trim()).expect("submission record");
        assert_eq!(record.row_number, 1);
        assert_eq!(record.answers_hash, answers_hash(answers.as_map()));
        assert!(!line.contains("curl/8"));
        assert!(!line.contains("\"age\""));
    }

    #[test]
    fn only_matching_temp_reports_are_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("survey_AB2-3CD_1700000000.md"), "report").expect("write");
        fs::write(dir.path().join("notes.md"), "keep").expect("write");

        assert_eq!(prune_temp_reports(dir.path(), Duration::from_secs(3600)), 0);
        assert_eq!(clear_temp_reports(dir.path()), 1);
        assert!(dir.path().join("notes.md").exists());
        assert_eq!(clear_temp_reports(&dir.path().join("missing")), 0);
    }
}
