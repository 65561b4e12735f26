//! Boundary to the externally supplied scoring routine.
//!
//! A scorer receives the full answer context and returns markdown for the
//! respondent, a rectangular results table (header row first) and two flags
//! selecting what goes into the report.

mod script;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use survey_spec::AnswerContext;

pub use script::{PYTHON_HARNESS, R_HARNESS, ScriptLanguage, ScriptScorer};

/// A scoring routine returned a result that breaks the contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringContractError {
    #[error("scoring must return (markdown, table, options), got {0}")]
    NotASequence(&'static str),
    #[error("scoring must return 3 elements (markdown, table, options), got {0}")]
    Arity(usize),
    #[error("first element must be a markdown string, got {0}")]
    Markdown(&'static str),
    #[error("second element must be a list of rows, got {0}")]
    Table(&'static str),
    #[error("row {row} must be a list, got {found}")]
    Row { row: usize, found: &'static str },
    #[error("table must have at least one row (headers)")]
    EmptyTable,
    #[error("row {row} has {found} columns but headers have {expected} columns")]
    Ragged {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("third element must be an options mapping, got {0}")]
    Options(&'static str),
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error(transparent)]
    Contract(#[from] ScoringContractError),
    #[error("unsupported scoring script {0}, expected a .py or .R file")]
    UnsupportedLanguage(PathBuf),
    #[error("scoring script {path} is not readable: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to run {interpreter}: {source}")]
    Launch {
        interpreter: String,
        #[source]
        source: io::Error,
    },
    #[error("scoring script failed ({status}): {stderr}")]
    Execution { status: String, stderr: String },
    #[error("failed to encode scoring inputs: {0}")]
    Input(#[source] serde_json::Error),
    #[error("scoring output is not valid JSON: {0}")]
    Output(#[source] serde_json::Error),
}

/// Report inclusion flags. Both default to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfOptions {
    #[serde(default = "included")]
    pub include_md_in_pdf: bool,
    #[serde(default = "included")]
    pub include_data_in_pdf: bool,
}

fn included() -> bool {
    true
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            include_md_in_pdf: true,
            include_data_in_pdf: true,
        }
    }
}

/// Non-empty, rectangular table of strings; the first row holds the headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<String>>", into = "Vec<Vec<String>>")]
pub struct ResultTable {
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn new(rows: Vec<Vec<String>>) -> Result<Self, ScoringContractError> {
        let Some(header) = rows.first() else {
            return Err(ScoringContractError::EmptyTable);
        };
        let expected = header.len();
        if let Some((row, found)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != expected)
        {
            return Err(ScoringContractError::Ragged {
                row,
                found,
                expected,
            });
        }
        Ok(Self { rows })
    }

    pub fn header(&self) -> &[String] {
        &self.rows[0]
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        &self.rows[1..]
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.header().len()
    }
}

impl TryFrom<Vec<Vec<String>>> for ResultTable {
    type Error = ScoringContractError;

    fn try_from(rows: Vec<Vec<String>>) -> Result<Self, Self::Error> {
        ResultTable::new(rows)
    }
}

impl From<ResultTable> for Vec<Vec<String>> {
    fn from(table: ResultTable) -> Self {
        table.rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub markdown: String,
    pub table: ResultTable,
    pub options: PdfOptions,
}

impl ScoringResult {
    /// Checks the wire shape `[markdown, [[cell, ...], ...], {flags}]`.
    /// Cells of any scalar type are stringified.
    pub fn from_raw(raw: Value) -> Result<Self, ScoringContractError> {
        let mut parts = match raw {
            Value::Array(parts) => parts,
            other => return Err(ScoringContractError::NotASequence(kind(&other))),
        };
        if parts.len() != 3 {
            return Err(ScoringContractError::Arity(parts.len()));
        }
        let options = parts.pop().unwrap_or(Value::Null);
        let table = parts.pop().unwrap_or(Value::Null);
        let markdown = parts.pop().unwrap_or(Value::Null);

        let markdown = match markdown {
            Value::String(markdown) => markdown,
            other => return Err(ScoringContractError::Markdown(kind(&other))),
        };

        let raw_rows = match table {
            Value::Array(rows) => rows,
            other => return Err(ScoringContractError::Table(kind(&other))),
        };
        let rows = raw_rows
            .into_iter()
            .enumerate()
            .map(|(row, cells)| match cells {
                Value::Array(cells) => Ok(cells.iter().map(cell_text).collect()),
                other => Err(ScoringContractError::Row {
                    row,
                    found: kind(&other),
                }),
            })
            .collect::<Result<Vec<Vec<String>>, _>>()?;
        let table = ResultTable::new(rows)?;

        let options = match options {
            Value::Object(flags) => PdfOptions {
                include_md_in_pdf: flag(flags.get("include_md_in_pdf")),
                include_data_in_pdf: flag(flags.get("include_data_in_pdf")),
            },
            Value::Null => PdfOptions::default(),
            other => return Err(ScoringContractError::Options(kind(&other))),
        };

        Ok(Self {
            markdown,
            table,
            options,
        })
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64() != Some(0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Cells are shown the way scoring scripts print them, so booleans read
/// `True`/`False`.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Pluggable scoring routine.
pub trait Scorer: Send + Sync {
    fn score(&self, answers: &AnswerContext) -> Result<ScoringResult, ScoringError>;
}

impl<F> Scorer for F
where
    F: Fn(&AnswerContext) -> Result<ScoringResult, ScoringError> + Send + Sync,
{
    fn score(&self, answers: &AnswerContext) -> Result<ScoringResult, ScoringError> {
        self(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_raw_accepts_well_formed_result() {
        let result = ScoringResult::from_raw(json!([
            "## Risk\nLow",
            [
                ["Gene", "Risk (%)"],
                ["MLH1", 0.4],
                ["MSH2", true],
                ["PMS2", false],
                ["EPCAM", null]
            ],
            { "include_md_in_pdf": false }
        ]))
        .expect("valid result");

        assert_eq!(result.markdown, "## Risk\nLow");
        assert_eq!(result.table.header(), ["Gene", "Risk (%)"]);
        assert_eq!(result.table.data_rows()[0], vec!["MLH1", "0.4"]);
        assert_eq!(result.table.data_rows()[1], vec!["MSH2", "True"]);
        assert_eq!(result.table.data_rows()[2], vec!["PMS2", "False"]);
        assert_eq!(result.table.data_rows()[3], vec!["EPCAM", ""]);
        assert!(!result.options.include_md_in_pdf);
        assert!(result.options.include_data_in_pdf);
    }

    #[test]
    fn header_only_table_is_allowed() {
        let result = ScoringResult::from_raw(json!(["", [["a", "b"]], {}])).expect("valid");
        assert!(result.table.data_rows().is_empty());
        assert_eq!(result.table.width(), 2);
    }

    #[test]
    fn contract_violations_are_reported() {
        let cases = [
            (json!("text"), ScoringContractError::NotASequence("string")),
            (json!(["md", [["a"]]]), ScoringContractError::Arity(2)),
            (json!([1, [["a"]], {}]), ScoringContractError::Markdown("number")),
            (json!(["md", "a,b", {}]), ScoringContractError::Table("string")),
            (json!(["md", [], {}]), ScoringContractError::EmptyTable),
            (
                json!(["md", [["a", "b"], ["1"]], {}]),
                ScoringContractError::Ragged {
                    row: 1,
                    found: 1,
                    expected: 2,
                },
            ),
            (
                json!(["md", [["a"], 3], {}]),
                ScoringContractError::Row {
                    row: 1,
                    found: "number",
                },
            ),
            (json!(["md", [["a"]], [true]]), ScoringContractError::Options("list")),
        ];

        for (raw, expected) in cases {
            assert_eq!(ScoringResult::from_raw(raw).expect_err("violation"), expected);
        }
    }

    #[test]
    fn result_table_rejects_ragged_rows_on_deserialize() {
        let error = serde_json::from_value::<ResultTable>(json!([["a", "b"], ["c"]]))
            .expect_err("ragged");
        assert!(error.to_string().contains("row 1 has 1 columns"));
    }

    #[test]
    fn closures_are_scorers() {
        let scorer = |answers: &AnswerContext| -> Result<ScoringResult, ScoringError> {
            let rows = vec![
                vec!["answers".to_string()],
                vec![answers.len().to_string()],
            ];
            Ok(ScoringResult {
                markdown: String::new(),
                table: ResultTable::new(rows)?,
                options: PdfOptions::default(),
            })
        };
        let result = scorer.score(&AnswerContext::default()).expect("score");
        assert_eq!(result.table.data_rows()[0], vec!["0"]);
    }
}
