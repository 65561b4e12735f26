use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::spec::question::QuestionSpec;
use crate::spec::survey::{ENGINE_VERSION, SurveySpec};

/// One finding about a question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    pub code: String,
    pub message: String,
}

impl Issue {
    fn new(variable: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        Self {
            variable: variable.map(str::to_string),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variable {
            Some(variable) => write!(f, "{variable}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of structural validation. Errors abort loading, warnings do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Checks the structural invariants navigation relies on.
pub fn validate(spec: &SurveySpec) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if spec.questions.is_empty() {
        errors.push(Issue::new(None, "no_questions", "question set has no questions"));
    }

    check_orders(&spec.questions, &mut errors);

    let mut seen = BTreeSet::new();
    for question in &spec.questions {
        let variable = question.variable.as_str();
        if !IDENTIFIER.is_match(variable) {
            errors.push(Issue::new(
                Some(variable),
                "malformed_variable",
                format!("'{variable}' is not a valid variable name"),
            ));
        }
        if !seen.insert(variable) {
            errors.push(Issue::new(
                Some(variable),
                "duplicate_variable",
                format!("variable '{variable}' is declared more than once"),
            ));
        }
    }

    for question in &spec.questions {
        check_question(question, &seen, &mut errors, &mut warnings);
    }

    if let Some(declared) = &spec.engine_version
        && declared != ENGINE_VERSION
    {
        warnings.push(Issue::new(
            None,
            "engine_version_mismatch",
            format!(
                "question set targets engine {declared} but this is engine {ENGINE_VERSION}"
            ),
        ));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_orders(questions: &[QuestionSpec], errors: &mut Vec<Issue>) {
    let mut by_order: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for question in questions {
        by_order
            .entry(question.order)
            .or_default()
            .push(question.variable.as_str());
    }

    for (order, variables) in &by_order {
        if variables.len() > 1 {
            errors.push(Issue::new(
                None,
                "duplicate_order",
                format!("order {order} is used by {}", variables.join(", ")),
            ));
        }
    }

    let expected = 1..=by_order.len() as u32;
    let actual: Vec<u32> = by_order.keys().copied().collect();
    if !actual.iter().copied().eq(expected) {
        let listed = actual
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        errors.push(Issue::new(
            None,
            "order_not_dense",
            format!(
                "orders must run from 1 to {} without gaps, found [{listed}]",
                by_order.len()
            ),
        ));
    }
}

fn check_question(
    question: &QuestionSpec,
    known: &BTreeSet<&str>,
    errors: &mut Vec<Issue>,
    warnings: &mut Vec<Issue>,
) {
    let variable = question.variable.as_str();

    for (field, condition) in [("skip_if", &question.skip_if), ("valid_if", &question.valid_if)] {
        let Some(condition) = condition else {
            continue;
        };
        for name in condition.variables() {
            if !known.contains(name.as_str()) {
                errors.push(Issue::new(
                    Some(variable),
                    "unknown_variable",
                    format!("{field} references unknown variable '{name}'"),
                ));
            }
        }
    }

    if !question.widget.is_known() {
        warnings.push(Issue::new(
            Some(variable),
            "unknown_widget",
            format!("widget '{}' is not supported, a text box is used", question.widget),
        ));
    }

    if question.invalid_message.is_some() && question.valid_if.is_none() {
        warnings.push(Issue::new(
            Some(variable),
            "orphan_invalid_message",
            "invalid_message has no valid_if to explain",
        ));
    }
}
