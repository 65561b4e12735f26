#![allow(missing_docs)]

pub mod answers;
pub mod expr;
pub mod load;
pub mod navigation;
pub mod projection;
pub mod render;
pub mod spec;
pub mod validate;

pub use answers::{AnswerContext, AnswerError, AnswerSet, is_empty_answer, value_kind};
pub use expr::{Bindings, Condition, EvaluationError, Expr, ExprError, Operand, evaluate};
pub use load::{Format, LoadError, load, parse_spec, read_spec};
pub use navigation::{Direction, find_next_eligible, is_eligible, resolve_display_index};
pub use projection::{Progress, Projection, QuestionView, project, project_full};
pub use render::{
    RenderPayload, RenderQuestion, RenderStatus, build_render_payload, render_json_ui, render_text,
};
pub use spec::{
    ENGINE_VERSION, QuestionSpec, Questionnaire, SpecError, SurveySpec, WidgetArgs, WidgetKind,
};
pub use validate::{Issue, ValidationReport, validate};
