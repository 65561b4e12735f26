//! Durable, append-only record of completed submissions.
//!
//! One JSON object per line. Writers serialize through a lock file created
//! with `create_new`; a writer that cannot get the lock in time writes its
//! record to a uniquely named fallback file instead.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use survey_spec::ENGINE_VERSION;

use super::ReportError;
use crate::config::SessionConfig;

pub const LOG_FILE_NAME: &str = "submissions.jsonl";
const LOCK_FILE_NAME: &str = ".lock";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// A lock file this old was left behind by a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(300);
const FALLBACK_SUFFIX_LEN: usize = 6;
const FALLBACK_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line of the submission log. Holds no raw answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub reference_code: String,
    /// 1-based position in the current log file; set on append.
    pub row_number: usize,
    pub timestamp_unix: i64,
    pub datetime: String,
    pub results: BTreeMap<String, String>,
    pub answers_hash: String,
    #[serde(default)]
    pub client_hashes: BTreeMap<String, String>,
}

impl SubmissionRecord {
    pub fn new(reference_code: &str, at: DateTime<Utc>) -> Self {
        Self {
            reference_code: reference_code.to_string(),
            row_number: 0,
            timestamp_unix: at.timestamp(),
            datetime: at.format(DATETIME_FORMAT).to_string(),
            results: BTreeMap::new(),
            answers_hash: String::new(),
            client_hashes: BTreeMap::new(),
        }
    }
}

/// Where a record ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Appended {
        path: PathBuf,
        row_number: usize,
    },
    /// The full log was moved to `archived` before appending.
    Rotated {
        path: PathBuf,
        archived: PathBuf,
    },
    /// Lock wait timed out.
    Fallback { path: PathBuf },
}

impl LogOutcome {
    pub fn path(&self) -> &Path {
        match self {
            LogOutcome::Appended { path, .. }
            | LogOutcome::Rotated { path, .. }
            | LogOutcome::Fallback { path } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionLog {
    dir: PathBuf,
    lock_timeout: Duration,
    max_rows: usize,
}

impl SubmissionLog {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration, max_rows: usize) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
            max_rows: max_rows.max(1),
        }
    }

    /// `data_dir/log/<engine version>/<survey>_<version>/`.
    pub fn for_survey(config: &SessionConfig, survey_name: &str, survey_version: &str) -> Self {
        let dir = config
            .data_dir
            .join("log")
            .join(ENGINE_VERSION)
            .join(format!("{survey_name}_{survey_version}"));
        Self::new(dir, config.lock_timeout, config.max_log_rows)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    pub fn append(&self, mut record: SubmissionRecord) -> Result<LogOutcome, ReportError> {
        fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;
        let lock_path = self.dir.join(LOCK_FILE_NAME);

        match LockGuard::acquire(&lock_path, self.lock_timeout) {
            Ok(guard) => {
                let outcome = self.append_locked(&mut record);
                drop(guard);
                outcome
            }
            Err(LockError::Timeout) => {
                warn!(
                    lock = %lock_path.display(),
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "submission log lock timed out, writing fallback file"
                );
                self.write_fallback(&mut record)
            }
            Err(LockError::Io(source)) => Err(io_error(&lock_path, source)),
        }
    }

    fn append_locked(&self, record: &mut SubmissionRecord) -> Result<LogOutcome, ReportError> {
        let path = self.path();
        let mut rows = count_rows(&path)?;
        let mut archived = None;

        if rows >= self.max_rows {
            let target = self.rotation_target(record.timestamp_unix);
            fs::rename(&path, &target).map_err(|source| io_error(&path, source))?;
            info!(
                rows,
                archived = %target.display(),
                "submission log rotated"
            );
            archived = Some(target);
            rows = 0;
        }

        record.row_number = rows + 1;
        write_line(&path, record)?;
        debug!(row = record.row_number, "submission logged");

        Ok(match archived {
            Some(archived) => LogOutcome::Rotated { path, archived },
            None => LogOutcome::Appended {
                path,
                row_number: record.row_number,
            },
        })
    }

    fn rotation_target(&self, timestamp: i64) -> PathBuf {
        let mut target = self.dir.join(format!("submissions_{timestamp}.jsonl"));
        let mut attempt = 1;
        while target.exists() {
            target = self
                .dir
                .join(format!("submissions_{timestamp}_{attempt}.jsonl"));
            attempt += 1;
        }
        target
    }

    fn write_fallback(&self, record: &mut SubmissionRecord) -> Result<LogOutcome, ReportError> {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..FALLBACK_SUFFIX_LEN)
            .map(|_| FALLBACK_ALPHABET[rng.gen_range(0..FALLBACK_ALPHABET.len())] as char)
            .collect();
        let path = self.dir.join(format!(
            "submissions_fallback_{}_{suffix}.jsonl",
            record.timestamp_unix
        ));
        record.row_number = 1;
        write_line(&path, record)?;
        info!(path = %path.display(), "submission written to fallback file");
        Ok(LogOutcome::Fallback { path })
    }
}

fn count_rows(path: &Path) -> Result<usize, ReportError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(0),
        Err(source) => return Err(io_error(path, source)),
    };
    let mut rows = 0;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| io_error(path, source))?;
        if !line.trim().is_empty() {
            rows += 1;
        }
    }
    Ok(rows)
}

fn write_line(path: &Path, record: &SubmissionRecord) -> Result<(), ReportError> {
    let mut line = serde_json::to_vec(record).map_err(ReportError::Encode)?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| io_error(path, source))?;
    file.write_all(&line)
        .and_then(|()| file.sync_data())
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> ReportError {
    ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

enum LockError {
    Timeout,
    Io(io::Error),
}

/// Exclusive lock held for as long as the guard lives.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // The pid is informational only.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!(lock = %path.display(), "removing stale submission log lock");
                        if let Err(error) = fs::remove_file(path)
                            && error.kind() != ErrorKind::NotFound
                        {
                            return Err(LockError::Io(error));
                        }
                        continue;
                    }
                    if start.elapsed() >= timeout {
                        return Err(LockError::Timeout);
                    }
                    thread::sleep(LOCK_POLL_INTERVAL.min(timeout));
                }
                Err(error) => return Err(LockError::Io(error)),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), %error, "failed to release submission log lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= STALE_LOCK_AGE)
}
