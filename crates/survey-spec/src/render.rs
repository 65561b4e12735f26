use serde_json::{Map, Value, json};

use crate::answers::AnswerContext;
use crate::projection::{Progress, Projection};
use crate::spec::question::{QuestionSpec, WidgetKind};
use crate::spec::survey::Questionnaire;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// A question is waiting for an answer.
    NeedInput,
    /// Every eligible question has been passed.
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
        }
    }
}

/// Describes a single question for render outputs.
#[derive(Debug, Clone)]
pub struct RenderQuestion {
    pub index: usize,
    pub order: u32,
    pub variable: String,
    pub label: String,
    pub widget: WidgetKind,
    pub default: Option<Value>,
    pub choices: Vec<Value>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub step: Option<f64>,
    pub info: Option<String>,
    /// `None` for questions before the projection window, whose state the
    /// widget layer keeps as is.
    pub visible: Option<bool>,
    pub interactive: bool,
    pub current_value: Option<Value>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub survey_name: String,
    pub survey_version: String,
    pub header: Option<String>,
    pub status: RenderStatus,
    pub display_index: usize,
    pub current_variable: Option<String>,
    pub progress: Progress,
    pub show_previous: bool,
    pub show_next: bool,
    pub questions: Vec<RenderQuestion>,
}

/// Build the renderer payload from a projection and the answers it was computed with.
pub fn build_render_payload(
    questionnaire: &Questionnaire,
    projection: &Projection,
    context: &AnswerContext,
) -> RenderPayload {
    let questions = questionnaire
        .questions()
        .iter()
        .enumerate()
        .map(|(index, question)| render_question(index, question, projection, context))
        .collect::<Vec<_>>();

    let current_variable = questionnaire
        .question(projection.display_index)
        .map(|question| question.variable.clone());

    let status = if projection.is_terminal() {
        RenderStatus::Complete
    } else {
        RenderStatus::NeedInput
    };

    RenderPayload {
        survey_name: questionnaire.name().to_string(),
        survey_version: questionnaire.version().to_string(),
        header: questionnaire.header().map(str::to_string),
        status,
        display_index: projection.display_index,
        current_variable,
        progress: projection.progress,
        show_previous: projection.show_previous,
        show_next: projection.show_next,
        questions,
    }
}

fn render_question(
    index: usize,
    question: &QuestionSpec,
    projection: &Projection,
    context: &AnswerContext,
) -> RenderQuestion {
    let view = projection.view(index);
    let args = &question.widget_args;
    RenderQuestion {
        index,
        order: question.order,
        variable: question.variable.clone(),
        label: question.label(),
        widget: question.widget.clone(),
        default: args.default.clone(),
        choices: args.choices.clone(),
        minimum: args.minimum,
        maximum: args.maximum,
        step: args.step,
        info: args.info.clone(),
        visible: view.map(|view| view.visible),
        interactive: view.is_some_and(|view| view.interactive),
        current_value: context.get(&question.variable).cloned(),
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    let questions = payload
        .questions
        .iter()
        .map(|question| {
            let mut map = Map::new();
            map.insert("index".into(), json!(question.index));
            map.insert("order".into(), json!(question.order));
            map.insert("variable".into(), Value::String(question.variable.clone()));
            map.insert("label".into(), Value::String(question.label.clone()));
            // Unknown widgets are presented as text boxes.
            let widget = if question.widget.is_known() {
                question.widget.as_str()
            } else {
                WidgetKind::Textbox.as_str()
            };
            map.insert("widget".into(), Value::String(widget.to_string()));
            if let Some(default) = &question.default {
                map.insert("default".into(), default.clone());
            }
            if !question.choices.is_empty() {
                map.insert("choices".into(), Value::Array(question.choices.clone()));
            }
            for (key, bound) in [
                ("minimum", question.minimum),
                ("maximum", question.maximum),
                ("step", question.step),
            ] {
                if let Some(bound) = bound {
                    map.insert(key.into(), json!(bound));
                }
            }
            if let Some(info) = &question.info {
                map.insert("info".into(), Value::String(info.clone()));
            }
            map.insert(
                "visible".into(),
                question.visible.map(Value::Bool).unwrap_or(Value::Null),
            );
            map.insert("interactive".into(), Value::Bool(question.interactive));
            if let Some(current_value) = &question.current_value {
                map.insert("current_value".into(), current_value.clone());
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    json!({
        "survey_name": payload.survey_name,
        "survey_version": payload.survey_version,
        "header": payload.header,
        "status": payload.status.as_str(),
        "display_index": payload.display_index,
        "current_variable": payload.current_variable,
        "progress": {
            "label": payload.progress.label(),
            "fraction": payload.progress.fraction(),
        },
        "navigation": {
            "show_previous": payload.show_previous,
            "show_next": payload.show_next,
        },
        "questions": questions,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Survey: {} ({})",
        payload.survey_name, payload.survey_version
    ));
    lines.push(format!(
        "Status: {} ({})",
        payload.status.as_str(),
        payload.progress.label()
    ));
    if payload.display_index == 0
        && let Some(header) = &payload.header
    {
        lines.push(header.trim().to_string());
    }

    let answered = payload
        .questions
        .iter()
        .filter(|question| question.visible == Some(true) && !question.interactive)
        .collect::<Vec<_>>();
    if !answered.is_empty() {
        lines.push("Answered questions:".to_string());
        for question in answered {
            let value = question
                .current_value
                .as_ref()
                .map(value_to_display)
                .unwrap_or_default();
            lines.push(format!(" - {} = {}", question.label, value));
        }
    }

    match payload.questions.iter().find(|question| question.interactive) {
        Some(question) => {
            lines.push(format!("Current question: {}", question.label));
            lines.push(format!("  Widget: {}", question.widget));
            if let Some(info) = &question.info {
                lines.push(format!("  Info: {}", info));
            }
            if !question.choices.is_empty() {
                let choices = question
                    .choices
                    .iter()
                    .map(value_to_display)
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("  Choices: {}", choices));
            }
            if question.minimum.is_some() || question.maximum.is_some() {
                let bound = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
                lines.push(format!(
                    "  Range: {}..{}",
                    bound(question.minimum),
                    bound(question.maximum)
                ));
            }
            if let Some(default) = &question.default {
                lines.push(format!("  Default: {}", value_to_display(default)));
            }
            if let Some(value) = &question.current_value
                && !value.is_null()
            {
                lines.push(format!("  Current value: {}", value_to_display(value)));
            }
        }
        None if payload.status == RenderStatus::Complete => {
            lines.push("All questions answered.".to_string());
        }
        None => {}
    }

    let mut controls = Vec::new();
    if payload.show_previous {
        controls.push("previous".to_string());
    }
    if payload.show_next {
        controls.push(format!("next [{}]", payload.progress.label()));
    }
    if !controls.is_empty() {
        lines.push(format!("Controls: {}", controls.join(", ")));
    }

    lines.join("\n")
}

pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(num) => num.to_string(),
        other => other.to_string(),
    }
}
