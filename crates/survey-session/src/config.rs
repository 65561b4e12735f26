use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATA_DIR: &str = "survey_data";
pub const DEFAULT_TEMP_DIR: &str = "temp_reports";

/// Runtime settings threaded into every session and the report generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Persist the report, archive record and submission log under `data_dir`.
    /// When off, only a temporary report is written to `temp_dir`.
    pub save_user_data: bool,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Where the survey is hosted, stamped on reports.
    pub actual_url: Option<String>,
    /// Longest wait for the submission-log lock before using a fallback file.
    pub lock_timeout: Duration,
    /// Rows a submission log holds before it is rotated.
    pub max_log_rows: usize,
    /// Temporary reports older than this are pruned before each new report.
    pub temp_report_max_age: Duration,
    /// Keep scoring results visible when scoring succeeded but the report failed.
    pub results_on_report_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_user_data: false,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            actual_url: None,
            lock_timeout: Duration::from_secs(10),
            max_log_rows: 1000,
            temp_report_max_age: Duration::from_secs(60 * 60),
            results_on_report_failure: true,
        }
    }
}
