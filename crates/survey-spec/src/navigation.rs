//! Skip-aware movement over the ordered question list.
//!
//! Indices range over `[0, N]` where `N` is the question count and marks the
//! completed state.

use tracing::debug;

use crate::expr::{Bindings, EvaluationError};
use crate::spec::question::QuestionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A question is eligible when it has no `skip_if` or its `skip_if` is false.
pub fn is_eligible<B: Bindings + ?Sized>(
    question: &QuestionSpec,
    context: &B,
) -> Result<bool, EvaluationError> {
    match &question.skip_if {
        Some(condition) => Ok(!condition.evaluate(context)?),
        None => Ok(true),
    }
}

/// Scans from `current_index` one step in `direction` and keeps going past
/// ineligible questions.
///
/// Running off the end returns `N`; running off the start returns `0`, even
/// when question 0 is itself ineligible.
pub fn find_next_eligible<B: Bindings + ?Sized>(
    current_index: usize,
    questions: &[QuestionSpec],
    context: &B,
    direction: Direction,
) -> Result<usize, EvaluationError> {
    let total = questions.len();
    let mut candidate = match direction {
        Direction::Forward => current_index.saturating_add(1),
        Direction::Backward => match current_index.min(total).checked_sub(1) {
            Some(index) => index,
            None => return Ok(0),
        },
    };

    while candidate < total {
        if is_eligible(&questions[candidate], context)? {
            debug!(from = current_index, to = candidate, ?direction, "eligible question found");
            return Ok(candidate);
        }
        candidate = match direction {
            Direction::Forward => candidate + 1,
            Direction::Backward => match candidate.checked_sub(1) {
                Some(index) => index,
                None => break,
            },
        };
    }

    let boundary = match direction {
        Direction::Forward => total,
        Direction::Backward => 0,
    };
    debug!(from = current_index, to = boundary, ?direction, "scan reached boundary");
    Ok(boundary)
}

/// First index at or after `index` whose question is eligible, or `N`.
///
/// Used to pick the question actually shown when the requested index is
/// skipped, e.g. on first load or after a retreat clamps to 0.
pub fn resolve_display_index<B: Bindings + ?Sized>(
    index: usize,
    questions: &[QuestionSpec],
    context: &B,
) -> Result<usize, EvaluationError> {
    let mut candidate = index.min(questions.len());
    while let Some(question) = questions.get(candidate) {
        if is_eligible(question, context)? {
            break;
        }
        candidate += 1;
    }
    Ok(candidate)
}
