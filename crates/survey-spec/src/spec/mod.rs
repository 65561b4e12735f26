pub mod question;
pub mod survey;

pub use question::{QuestionSpec, WidgetArgs, WidgetKind};
pub use survey::{ENGINE_VERSION, Questionnaire, SpecError, SurveySpec};
