use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::expr::Bindings;
use crate::spec::question::QuestionSpec;

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("expected {expected} answer values, received {received}")]
    BatchLength { expected: usize, received: usize },
    #[error("failed to encode answers: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("failed to encode answers: {0}")]
    Json(#[from] serde_json::Error),
}

/// Immutable snapshot of every question's current value.
///
/// Built once per request from the full batch of widget values and passed by
/// reference to navigation, projection and flow control. Updating yields a new
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerContext {
    values: Map<String, Value>,
}

impl AnswerContext {
    /// Every variable holds its declared default, or `null`.
    pub fn initial(questions: &[QuestionSpec]) -> Self {
        Self {
            values: questions
                .iter()
                .map(|question| (question.variable.clone(), question.initial_value()))
                .collect(),
        }
    }

    /// Builds a snapshot from one value per question, in question order.
    pub fn from_values(questions: &[QuestionSpec], values: Vec<Value>) -> Result<Self, AnswerError> {
        if values.len() != questions.len() {
            return Err(AnswerError::BatchLength {
                expected: questions.len(),
                received: values.len(),
            });
        }
        Ok(Self {
            values: questions
                .iter()
                .map(|question| question.variable.clone())
                .zip(values)
                .collect(),
        })
    }

    /// Initial values overlaid with the known variables of `answers`.
    /// Keys that are not question variables are ignored.
    pub fn from_partial(questions: &[QuestionSpec], answers: &Map<String, Value>) -> Self {
        let mut context = Self::initial(questions);
        for (variable, slot) in context.values.iter_mut() {
            if let Some(value) = answers.get(variable) {
                *slot = value.clone();
            }
        }
        context
    }

    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.values.get(variable)
    }

    /// Returns a new snapshot with `variable` set to `value`.
    pub fn with_answer(&self, variable: &str, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(variable.to_string(), value);
        Self { values }
    }

    /// `null` and blank strings are unanswered; `false` and `0` are answers.
    pub fn is_unanswered(&self, variable: &str) -> bool {
        self.values.get(variable).is_none_or(is_empty_answer)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Bindings for AnswerContext {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

pub fn is_empty_answer(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Short description of a value's kind, safe to log.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Completed answers of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSet {
    pub survey_name: String,
    pub survey_version: String,
    pub answers: Map<String, Value>,
}

impl AnswerSet {
    pub fn new(survey_name: &str, survey_version: &str, context: &AnswerContext) -> Self {
        Self {
            survey_name: survey_name.to_string(),
            survey_version: survey_version.to_string(),
            answers: context.as_map().clone(),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, AnswerError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, AnswerError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, AnswerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
