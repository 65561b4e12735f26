use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use survey_spec::AnswerContext;

use super::{Scorer, ScoringError, ScoringResult};

/// Loads the script, calls `scoring(**answers)` with answers read from stdin
/// and prints the result as JSON.
pub const PYTHON_HARNESS: &str = r#"
import json, runpy, sys
namespace = runpy.run_path(sys.argv[1])
scoring = namespace.get("scoring")
if not callable(scoring):
    sys.exit("function 'scoring' not found in " + sys.argv[1])
result = scoring(**json.load(sys.stdin))
if isinstance(result, tuple):
    result = list(result)
json.dump(result, sys.stdout, default=str)
"#;

/// R counterpart of [`PYTHON_HARNESS`]; needs `jsonlite`. Rows are wrapped
/// in `I()` so single-cell rows stay arrays.
pub const R_HARNESS: &str = r#"
args <- commandArgs(trailingOnly = TRUE)
source(args[1])
if (!exists("scoring", mode = "function")) stop("function 'scoring' not found in ", args[1])
inputs <- jsonlite::fromJSON(file("stdin"), simplifyVector = FALSE)
result <- do.call(scoring, inputs)
if (is.list(result) && length(result) >= 2 && is.list(result[[2]])) {
  result[[2]] <- lapply(result[[2]], function(row) I(as.character(unlist(row))))
}
cat(jsonlite::toJSON(result, auto_unbox = TRUE, null = "null"))
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Python,
    R,
}

impl ScriptLanguage {
    /// `.py`/`.python` for Python, `.R`/`.r` for R.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" | "python" => Some(ScriptLanguage::Python),
            "R" | "r" => Some(ScriptLanguage::R),
            _ => None,
        }
    }

    pub fn default_interpreter(self) -> &'static str {
        match self {
            ScriptLanguage::Python => "python3",
            ScriptLanguage::R => "Rscript",
        }
    }

    fn harness_args(self, script: &Path) -> Vec<std::ffi::OsString> {
        match self {
            ScriptLanguage::Python => vec!["-c".into(), PYTHON_HARNESS.into(), script.into()],
            ScriptLanguage::R => vec![
                "-e".into(),
                R_HARNESS.into(),
                "--args".into(),
                script.into(),
            ],
        }
    }
}

/// Runs a user-supplied scoring script in a separate interpreter process.
#[derive(Debug, Clone)]
pub struct ScriptScorer {
    script: PathBuf,
    language: ScriptLanguage,
    interpreter: String,
}

impl ScriptScorer {
    /// Detects the language from the extension and checks the script is readable.
    pub fn new(script: impl Into<PathBuf>) -> Result<Self, ScoringError> {
        let script = script.into();
        let language = ScriptLanguage::from_path(&script)
            .ok_or_else(|| ScoringError::UnsupportedLanguage(script.clone()))?;
        fs::metadata(&script).map_err(|source| ScoringError::Script {
            path: script.clone(),
            source,
        })?;
        info!(script = %script.display(), ?language, "scoring script registered");
        Ok(Self {
            script,
            interpreter: language.default_interpreter().to_string(),
            language,
        })
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn language(&self) -> ScriptLanguage {
        self.language
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl Scorer for ScriptScorer {
    fn score(&self, answers: &AnswerContext) -> Result<ScoringResult, ScoringError> {
        let input = serde_json::to_vec(answers.as_map()).map_err(ScoringError::Input)?;
        let launch = |source| ScoringError::Launch {
            interpreter: self.interpreter.clone(),
            source,
        };

        debug!(
            interpreter = %self.interpreter,
            variables = answers.len(),
            "running scoring script"
        );
        let mut child = Command::new(&self.interpreter)
            .args(self.language.harness_args(&self.script))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script that exits early closes its end; the exit status reports why.
            if let Err(error) = stdin.write_all(&input) {
                debug!(%error, "scoring script did not read its input");
            }
        }
        let output = child.wait_with_output().map_err(launch)?;

        if !output.status.success() {
            return Err(ScoringError::Execution {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw = serde_json::from_slice(&output.stdout).map_err(ScoringError::Output)?;
        let result = ScoringResult::from_raw(raw)?;
        info!(
            rows = result.table.rows().len(),
            markdown_len = result.markdown.len(),
            "scoring finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[test]
    fn language_is_detected_from_extension() {
        assert_eq!(
            ScriptLanguage::from_path(Path::new("premm5.py")),
            Some(ScriptLanguage::Python)
        );
        assert_eq!(
            ScriptLanguage::from_path(Path::new("score.R")),
            Some(ScriptLanguage::R)
        );
        assert_eq!(
            ScriptLanguage::from_path(Path::new("score.r")),
            Some(ScriptLanguage::R)
        );
        assert_eq!(ScriptLanguage::from_path(Path::new("score.js")), None);
        assert_eq!(ScriptLanguage::from_path(Path::new("score")), None);
    }

    #[test]
    fn unsupported_or_missing_scripts_are_rejected() {
        assert!(matches!(
            ScriptScorer::new("score.sh"),
            Err(ScoringError::UnsupportedLanguage(_))
        ));
        assert!(matches!(
            ScriptScorer::new("/nonexistent/score.py"),
            Err(ScoringError::Script { .. })
        ));
    }

    #[test]
    fn missing_interpreter_is_a_launch_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("score.py");
        fs::write(&script, "def scoring(**kw):\n    return ('', [['a']], {})\n").expect("write");

        let scorer = ScriptScorer::new(&script)
            .expect("scorer")
            .with_interpreter("definitely-not-an-interpreter-7f3a");
        assert!(matches!(
            scorer.score(&AnswerContext::default()),
            Err(ScoringError::Launch { .. })
        ));
    }

    #[test]
    fn python_script_is_scored() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("score.py");
        fs::write(
            &script,
            "def scoring(age, smoker):\n\
             \x20   risk = 0.3 if smoker == 'yes' else 0.1\n\
             \x20   return (f'Risk for age {age}', [['Model', 'Risk'], ['basic', risk]], {'include_data_in_pdf': False})\n",
        )
        .expect("write");

        let scorer = ScriptScorer::new(&script).expect("scorer");
        let answers: AnswerContext =
            serde_json::from_value(json!({ "age": 40, "smoker": "yes" })).expect("answers");
        let result = scorer.score(&answers).expect("score");

        assert_eq!(result.markdown, "Risk for age 40");
        assert_eq!(result.table.data_rows()[0], vec!["basic", "0.3"]);
        assert!(result.options.include_md_in_pdf);
        assert!(!result.options.include_data_in_pdf);
    }

    #[test]
    fn python_contract_violation_is_reported() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("score.py");
        fs::write(
            &script,
            "def scoring(**kw):\n    return ('md', [['a', 'b'], ['1']], {})\n",
        )
        .expect("write");

        let scorer = ScriptScorer::new(&script).expect("scorer");
        let error = scorer.score(&AnswerContext::default()).expect_err("ragged");
        assert!(matches!(error, ScoringError::Contract(_)));
    }

    #[test]
    fn python_exception_is_an_execution_error() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("score.py");
        fs::write(&script, "def scoring(**kw):\n    raise ValueError('bad input')\n")
            .expect("write");

        let scorer = ScriptScorer::new(&script).expect("scorer");
        match scorer.score(&AnswerContext::default()) {
            Err(ScoringError::Execution { stderr, .. }) => assert!(stderr.contains("bad input")),
            other => panic!("expected execution error, got {other:?}"),
        }
    }
}
