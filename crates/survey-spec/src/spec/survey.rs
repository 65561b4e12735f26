use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::spec::question::QuestionSpec;
use crate::validate::{Issue, validate};

/// Version of this engine, compared against `engine_version` in question sets.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Question-set document as written by survey authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveySpec {
    pub survey_name: String,
    #[serde(deserialize_with = "version_string")]
    #[schemars(with = "String")]
    pub survey_version: String,
    /// Markdown shown above the first question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Engine version the survey was written against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

// Authors frequently write `survey_version: 1.0`; keep it as text.
fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "survey_version must be a string or a number, found {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("question set '{survey}' is invalid: {}", describe(.errors))]
    Invalid { survey: String, errors: Vec<Issue> },
}

fn describe(errors: &[Issue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A structurally valid question set, questions sorted by `order`.
///
/// Construction is the only place structure is checked; navigation code relies
/// on orders being dense and variables unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Questionnaire {
    spec: SurveySpec,
    warnings: Vec<Issue>,
}

impl Questionnaire {
    pub fn new(mut spec: SurveySpec) -> Result<Self, SpecError> {
        let report = validate(&spec);
        if !report.valid {
            return Err(SpecError::Invalid {
                survey: spec.survey_name,
                errors: report.errors,
            });
        }
        for issue in &report.warnings {
            warn!(survey = %spec.survey_name, code = %issue.code, "{}", issue.message);
        }

        spec.questions.sort_by_key(|question| question.order);
        debug!(
            survey = %spec.survey_name,
            version = %spec.survey_version,
            questions = spec.questions.len(),
            "question set accepted"
        );
        Ok(Self {
            spec,
            warnings: report.warnings,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.survey_name
    }

    pub fn version(&self) -> &str {
        &self.spec.survey_version
    }

    pub fn header(&self) -> Option<&str> {
        self.spec.header.as_deref()
    }

    pub fn engine_version(&self) -> Option<&str> {
        self.spec.engine_version.as_deref()
    }

    pub fn questions(&self) -> &[QuestionSpec] {
        &self.spec.questions
    }

    pub fn question(&self, index: usize) -> Option<&QuestionSpec> {
        self.spec.questions.get(index)
    }

    pub fn index_of(&self, variable: &str) -> Option<usize> {
        self.spec
            .questions
            .iter()
            .position(|question| question.variable == variable)
    }

    /// Number of questions, which is also the terminal index.
    pub fn len(&self) -> usize {
        self.spec.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.questions.is_empty()
    }

    /// Non-fatal findings from load-time validation.
    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }

    pub fn spec(&self) -> &SurveySpec {
        &self.spec
    }
}

impl TryFrom<SurveySpec> for Questionnaire {
    type Error = SpecError;

    fn try_from(spec: SurveySpec) -> Result<Self, Self::Error> {
        Questionnaire::new(spec)
    }
}
