//! Flow controller: one respondent's walk through a questionnaire.
//!
//! `current_index` ranges over `[0, N]`; `N` is the completed state where
//! scoring and report generation run. Each transition takes an immutable
//! [`AnswerContext`] snapshot of every widget value.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use survey_spec::{
    AnswerContext, Direction, EvaluationError, Projection, Questionnaire, find_next_eligible,
    project, resolve_display_index, value_kind,
};

use crate::config::SessionConfig;
use crate::report::{ClientInfo, ReportArtifact, ReportError, ReportGenerator, ReportRequest};
use crate::scoring::{Scorer, ScoringError, ScoringResult};

pub const DEFAULT_INVALID_MESSAGE: &str = "answer not valid";

/// Why a transition was rejected or a completion failed.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("please answer \"{label}\" before continuing")]
    Unanswered { variable: String, label: String },
    #[error("{message}")]
    Invalid { variable: String, message: String },
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("scoring failed: {0}")]
    Scoring(#[from] ScoringError),
    #[error("report generation failed: {0}")]
    Report(#[from] ReportError),
}

/// State of the results area shown at the terminal index.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultsPanel {
    Hidden,
    Shown {
        result: ScoringResult,
        report: Option<ReportArtifact>,
    },
    Failed {
        message: String,
    },
}

impl ResultsPanel {
    pub fn is_shown(&self) -> bool {
        matches!(self, ResultsPanel::Shown { .. })
    }
}

#[derive(Debug)]
pub struct StepResponse {
    pub current_index: usize,
    /// `None` when a predicate failed while projecting; see `warning`.
    pub projection: Option<Projection>,
    pub warning: Option<FlowError>,
    pub results: ResultsPanel,
}

impl StepResponse {
    pub fn is_terminal(&self) -> bool {
        matches!(self.results, ResultsPanel::Shown { .. } | ResultsPanel::Failed { .. })
            || self.projection.as_ref().is_some_and(Projection::is_terminal)
    }
}

pub struct Session {
    questionnaire: Arc<Questionnaire>,
    scorer: Arc<dyn Scorer>,
    reporter: Arc<dyn ReportGenerator>,
    config: SessionConfig,
    client_info: Option<ClientInfo>,
    current_index: usize,
}

impl Session {
    pub fn new(
        questionnaire: Arc<Questionnaire>,
        scorer: Arc<dyn Scorer>,
        reporter: Arc<dyn ReportGenerator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            questionnaire,
            scorer,
            reporter,
            config,
            client_info: None,
            current_index: 0,
        }
    }

    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = Some(client_info);
        self
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.questionnaire.len()
    }

    /// Defaults (or nulls) for every question.
    pub fn initial_context(&self) -> AnswerContext {
        AnswerContext::initial(self.questionnaire.questions())
    }

    /// Starts over at the first eligible question under the initial context.
    pub fn load(&mut self) -> (AnswerContext, StepResponse) {
        let context = self.initial_context();
        let response = self.load_with(&context);
        (context, response)
    }

    /// Starts the session from an existing snapshot, e.g. answers resumed from
    /// disk. The first displayed question is resolved against `context`.
    pub fn load_with(&mut self, context: &AnswerContext) -> StepResponse {
        let (index, warning) =
            match resolve_display_index(0, self.questionnaire.questions(), context) {
                Ok(index) => (index, None),
                Err(error) => (0, Some(FlowError::from(error))),
            };
        self.current_index = index;
        info!(
            survey = self.questionnaire.name(),
            questions = self.questionnaire.len(),
            index,
            "session loaded"
        );
        self.respond(context, warning, ResultsPanel::Hidden)
    }

    pub fn project(&self, context: &AnswerContext) -> Result<Projection, EvaluationError> {
        project(self.current_index, self.questionnaire.questions(), context)
    }

    pub fn advance(&mut self, context: &AnswerContext) -> StepResponse {
        let index = self.current_index;
        let Some(question) = self.questionnaire.question(index) else {
            debug!(index, "advance ignored at terminal state");
            return self.respond(context, None, ResultsPanel::Hidden);
        };

        if !question.has_default() && context.is_unanswered(&question.variable) {
            warn!(variable = %question.variable, "advance rejected: unanswered");
            let rejection = FlowError::Unanswered {
                variable: question.variable.clone(),
                label: question.label(),
            };
            return self.respond(context, Some(rejection), ResultsPanel::Hidden);
        }

        if let Some(valid_if) = &question.valid_if {
            match valid_if.evaluate(context) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        variable = %question.variable,
                        kind = context.get(&question.variable).map(value_kind).unwrap_or("missing"),
                        "advance rejected: invalid answer"
                    );
                    let rejection = FlowError::Invalid {
                        variable: question.variable.clone(),
                        message: question
                            .invalid_message
                            .clone()
                            .unwrap_or_else(|| DEFAULT_INVALID_MESSAGE.to_string()),
                    };
                    return self.respond(context, Some(rejection), ResultsPanel::Hidden);
                }
                Err(error) => {
                    warn!(variable = %question.variable, %error, "valid_if failed to evaluate");
                    return self.respond(context, Some(error.into()), ResultsPanel::Hidden);
                }
            }
        }

        let next = match find_next_eligible(
            index,
            self.questionnaire.questions(),
            context,
            Direction::Forward,
        ) {
            Ok(next) => next,
            Err(error) => {
                warn!(index, %error, "skip_if failed to evaluate");
                return self.respond(context, Some(error.into()), ResultsPanel::Hidden);
            }
        };

        self.current_index = next;
        if next >= self.questionnaire.len() {
            info!(from = index, "questionnaire completed");
            return self.complete(context);
        }
        info!(from = index, to = next, "advanced");
        self.respond(context, None, ResultsPanel::Hidden)
    }

    /// Moves to the previous eligible question. Answers are kept.
    pub fn retreat(&mut self, context: &AnswerContext) -> StepResponse {
        let index = self.current_index;
        let questions = self.questionnaire.questions();
        let target = find_next_eligible(index, questions, context, Direction::Backward)
            .and_then(|target| match target {
                0 => resolve_display_index(0, questions, context),
                target => Ok(target),
            });

        match target {
            Ok(target) => {
                self.current_index = target;
                info!(from = index, to = target, "retreated");
                self.respond(context, None, ResultsPanel::Hidden)
            }
            Err(error) => {
                warn!(index, %error, "skip_if failed to evaluate");
                self.respond(context, Some(error.into()), ResultsPanel::Hidden)
            }
        }
    }

    /// Scores the current answers without touching navigation or reports.
    pub fn recompute_score(&self, context: &AnswerContext) -> Result<ScoringResult, FlowError> {
        info!(index = self.current_index, "manual score recompute");
        self.scorer.score(context).map_err(|error| {
            error!(%error, "scoring failed");
            FlowError::Scoring(error)
        })
    }

    fn complete(&self, context: &AnswerContext) -> StepResponse {
        let result = match self.scorer.score(context) {
            Ok(result) => result,
            Err(error) => {
                error!(%error, "scoring failed");
                let message = error.to_string();
                return self.respond(
                    context,
                    Some(error.into()),
                    ResultsPanel::Failed { message },
                );
            }
        };

        let request = ReportRequest {
            questionnaire: &self.questionnaire,
            answers: context,
            scoring: &result,
            client_info: self.client_info.as_ref(),
        };
        match self.reporter.generate(&request) {
            Ok(report) => {
                info!(reference = %report.reference_code, "results ready");
                self.respond(
                    context,
                    None,
                    ResultsPanel::Shown {
                        result,
                        report: Some(report),
                    },
                )
            }
            Err(error) => {
                error!(%error, "report generation failed");
                let panel = if self.config.results_on_report_failure {
                    ResultsPanel::Shown {
                        result,
                        report: None,
                    }
                } else {
                    ResultsPanel::Failed {
                        message: error.to_string(),
                    }
                };
                self.respond(context, Some(error.into()), panel)
            }
        }
    }

    fn respond(
        &self,
        context: &AnswerContext,
        warning: Option<FlowError>,
        results: ResultsPanel,
    ) -> StepResponse {
        let (projection, warning) = match self.project(context) {
            Ok(projection) => (Some(projection), warning),
            Err(error) => {
                warn!(index = self.current_index, %error, "projection failed");
                (None, warning.or(Some(error.into())))
            }
        };
        StepResponse {
            current_index: self.current_index,
            projection,
            warning,
            results,
        }
    }
}
