use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::expr::{Bindings, EvaluationError};
use crate::navigation::is_eligible;
use crate::spec::question::QuestionSpec;

/// Visibility of one question relative to the displayed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub index: usize,
    pub variable: String,
    pub visible: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Progress {
    /// `current` eligible questions up to and including the displayed one, out
    /// of `total` eligible questions.
    Step { current: usize, total: usize },
    /// No question is eligible under the current answers.
    Unknown,
    Complete,
}

impl Progress {
    pub fn label(&self) -> String {
        match self {
            Progress::Step { current, total } => format!("Question {current} / {total}"),
            Progress::Unknown => "Question".into(),
            Progress::Complete => "Complete".into(),
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        match self {
            Progress::Step { current, total } => Some(*current as f64 / *total as f64),
            Progress::Unknown => None,
            Progress::Complete => Some(1.0),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// What the widget layer should show for a displayed index.
///
/// `questions` covers `[window_start, N)`; questions before the window keep
/// whatever state they were last given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub display_index: usize,
    pub total_questions: usize,
    pub window_start: usize,
    pub questions: Vec<QuestionView>,
    pub show_previous: bool,
    pub show_next: bool,
    pub progress: Progress,
}

impl Projection {
    pub fn is_terminal(&self) -> bool {
        self.display_index >= self.total_questions
    }

    pub fn view(&self, index: usize) -> Option<&QuestionView> {
        index
            .checked_sub(self.window_start)
            .and_then(|offset| self.questions.get(offset))
    }

    pub fn interactive(&self) -> Option<&QuestionView> {
        self.questions.iter().find(|view| view.interactive)
    }
}

/// Projection over the narrowed window `[max(0, display_index - 1), N)`.
pub fn project<B: Bindings + ?Sized>(
    display_index: usize,
    questions: &[QuestionSpec],
    context: &B,
) -> Result<Projection, EvaluationError> {
    let display_index = display_index.min(questions.len());
    build(display_index, display_index.saturating_sub(1), questions, context)
}

/// Projection over every question; agrees with [`project`] on the overlap.
pub fn project_full<B: Bindings + ?Sized>(
    display_index: usize,
    questions: &[QuestionSpec],
    context: &B,
) -> Result<Projection, EvaluationError> {
    build(display_index.min(questions.len()), 0, questions, context)
}

fn build<B: Bindings + ?Sized>(
    display_index: usize,
    window_start: usize,
    questions: &[QuestionSpec],
    context: &B,
) -> Result<Projection, EvaluationError> {
    let total_questions = questions.len();
    let eligible = questions
        .iter()
        .map(|question| is_eligible(question, context))
        .collect::<Result<Vec<_>, _>>()?;

    let views = questions
        .iter()
        .zip(&eligible)
        .enumerate()
        .skip(window_start)
        .map(|(index, (question, eligible))| {
            let visible = index <= display_index && *eligible;
            QuestionView {
                index,
                variable: question.variable.clone(),
                visible,
                interactive: visible && index == display_index,
            }
        })
        .collect();

    let progress = if display_index >= total_questions {
        Progress::Complete
    } else {
        let total = eligible.iter().filter(|eligible| **eligible).count();
        let current = eligible[..=display_index]
            .iter()
            .filter(|eligible| **eligible)
            .count();
        if total == 0 {
            Progress::Unknown
        } else {
            Progress::Step { current, total }
        }
    };

    debug!(display_index, window_start, progress = %progress, "projection computed");

    Ok(Projection {
        display_index,
        total_questions,
        window_start,
        questions: views,
        show_previous: 0 < display_index && display_index < total_questions,
        show_next: display_index < total_questions,
        progress,
    })
}
