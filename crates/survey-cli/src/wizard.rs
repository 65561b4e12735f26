use serde_json::{Number, Value};

use survey_session::{FlowError, ResultsPanel, ScoringResult};
use survey_spec::render::value_to_display;
use survey_spec::{
    AnswerError, AnswerSet, Questionnaire, QuestionSpec, RenderPayload, WidgetKind,
    render_json_ui, render_text,
};

use crate::RenderMode;

/// Controls which bits of state the wizard prints.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum Verbosity {
    /// Prompts and results only.
    Clean,
    /// Full projection before every prompt.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Prints the session state between prompts.
pub struct WizardPresenter {
    verbosity: Verbosity,
    format: RenderMode,
    header_printed: bool,
}

impl WizardPresenter {
    pub fn new(verbosity: Verbosity, format: RenderMode) -> Self {
        Self {
            verbosity,
            format,
            header_printed: false,
        }
    }

    pub fn show_header(&mut self, questionnaire: &Questionnaire) {
        if self.header_printed {
            return;
        }
        println!("Survey: {} ({})", questionnaire.name(), questionnaire.version());
        if let Some(header) = questionnaire.header() {
            println!("{}", header);
        }
        println!("Type an answer, '<' to go back, 'score' to recompute or 'exit' to quit.");
        self.header_printed = true;
    }

    pub fn show_step(&self, payload: &RenderPayload) {
        match self.format {
            RenderMode::Json => println!("{}", render_json_ui(payload)),
            RenderMode::Text if self.verbosity.is_verbose() => println!("{}", render_text(payload)),
            RenderMode::Text => {}
        }
    }

    pub fn show_prompt(&self, prompt: &PromptContext) {
        let mut line = match &prompt.progress {
            Some(progress) => format!("[{}] {}", progress, prompt.title),
            None => prompt.title.clone(),
        };
        if let Some(hint) = &prompt.hint {
            line.push(' ');
            line.push_str(hint);
        }
        if let Some(default) = &prompt.default {
            line.push_str(&format!(" [default: {}]", default));
        }
        println!("{}", line);
        if let Some(info) = &prompt.info {
            println!("{}", info);
        }
    }

    pub fn show_parse_error(&self, error: &AnswerParseError) {
        eprintln!("Invalid answer: {}", error.user_message);
        if self.verbosity.is_verbose()
            && let Some(debug) = &error.debug_message
        {
            eprintln!("  Expected: {}", debug);
        }
    }

    pub fn show_warning(&self, warning: &FlowError) {
        eprintln!("Warning: {}", warning);
    }

    pub fn show_results(&self, results: &ResultsPanel) {
        match results {
            ResultsPanel::Hidden => {}
            ResultsPanel::Shown { result, report } => {
                self.show_scoring(result);
                if let Some(report) = report {
                    println!("Reference code: {}", report.reference_code);
                    println!("Report written to {}", report.path.display());
                }
            }
            ResultsPanel::Failed { message } => {
                eprintln!("Results unavailable: {}", message);
            }
        }
    }

    pub fn show_scoring(&self, result: &ScoringResult) {
        if !result.markdown.trim().is_empty() {
            println!("{}", result.markdown.trim_end());
        }
        for row in result.table.rows() {
            println!("| {} |", row.join(" | "));
        }
    }

    pub fn show_completion(&self, answer_set: &AnswerSet) {
        println!("Done");
        match cbor_hex(answer_set) {
            Ok(encoded) => {
                println!("Answers (CBOR hex): {}", encoded);
            }
            Err(err) => {
                eprintln!("Failed to serialize answers to CBOR: {}", err);
            }
        }
        if self.verbosity.is_verbose() {
            match answer_set.to_json_pretty() {
                Ok(pretty) => println!("{}", pretty),
                Err(err) => {
                    eprintln!("Failed to serialize answers to JSON: {}", err);
                }
            }
        }
    }
}

/// Context used to format a single prompt.
pub struct PromptContext {
    pub title: String,
    pub progress: Option<String>,
    pub hint: Option<String>,
    pub default: Option<String>,
    pub info: Option<String>,
}

impl PromptContext {
    pub fn new(question: &QuestionSpec, progress: Option<String>) -> Self {
        Self {
            title: question.label(),
            progress,
            hint: hint(question),
            default: question
                .widget_args
                .default
                .as_ref()
                .filter(|value| !value.is_null())
                .map(value_to_display),
            info: question.widget_args.info.clone(),
        }
    }
}

fn hint(question: &QuestionSpec) -> Option<String> {
    let args = &question.widget_args;
    match &question.widget {
        WidgetKind::Radio if !args.choices.is_empty() => Some(format!(
            "({})",
            args.choices
                .iter()
                .map(value_to_display)
                .collect::<Vec<_>>()
                .join("/")
        )),
        WidgetKind::Checkbox => Some("(yes/no)".to_string()),
        WidgetKind::Number => Some("(whole number)".to_string()),
        WidgetKind::Slider => match (args.minimum, args.maximum) {
            (Some(min), Some(max)) => Some(format!("({}..{})", min, max)),
            _ => Some("(number)".to_string()),
        },
        _ => None,
    }
}

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardInput {
    Answer(Value),
    Back,
    Score,
    Exit,
}

pub fn parse_input(question: &QuestionSpec, raw: &str) -> Result<WizardInput, AnswerParseError> {
    match raw.trim() {
        "<" => return Ok(WizardInput::Back),
        command if command.eq_ignore_ascii_case("back") => return Ok(WizardInput::Back),
        command if command.eq_ignore_ascii_case("score") => return Ok(WizardInput::Score),
        command if command.eq_ignore_ascii_case("exit") => return Ok(WizardInput::Exit),
        _ => {}
    }
    parse_answer(question, raw).map(WizardInput::Answer)
}

/// Parses a typed answer for the question's widget. Empty input takes the
/// declared default, or `null` which the session reports as unanswered.
pub fn parse_answer(question: &QuestionSpec, raw: &str) -> Result<Value, AnswerParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(question.initial_value());
    }

    let args = &question.widget_args;
    match &question.widget {
        WidgetKind::Radio => parse_choice(&args.choices, trimmed),
        WidgetKind::Checkbox => parse_boolean(trimmed),
        WidgetKind::Number => parse_integer(trimmed),
        WidgetKind::Slider => parse_slider(trimmed, args.minimum, args.maximum),
        WidgetKind::Textbox | WidgetKind::Unknown(_) => Ok(Value::String(trimmed.to_string())),
    }
}

fn parse_boolean(raw: &str) -> Result<Value, AnswerParseError> {
    match raw.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
        "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
        _ => Err(AnswerParseError::new(
            "Please enter yes or no.",
            Some("expected boolean (y/n/true/false)".to_string()),
        )),
    }
}

fn parse_integer(raw: &str) -> Result<Value, AnswerParseError> {
    raw.parse::<i64>()
        .map(Number::from)
        .map(Value::Number)
        .map_err(|_| {
            AnswerParseError::new(
                "Please enter a whole number.",
                Some("expected integer".to_string()),
            )
        })
}

fn parse_slider(
    raw: &str,
    minimum: Option<f64>,
    maximum: Option<f64>,
) -> Result<Value, AnswerParseError> {
    let value = raw
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            AnswerParseError::new(
                "Please enter a number.",
                Some("expected finite number".to_string()),
            )
        })?;
    let below = minimum.is_some_and(|min| value < min);
    let above = maximum.is_some_and(|max| value > max);
    if below || above {
        return Err(AnswerParseError::new(
            format!(
                "Please enter a value between {} and {}.",
                minimum.map_or("-inf".to_string(), |min| min.to_string()),
                maximum.map_or("inf".to_string(), |max| max.to_string())
            ),
            Some("value out of slider range".to_string()),
        ));
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number(Number::from(value as i64)));
    }
    Number::from_f64(value).map(Value::Number).ok_or_else(|| {
        AnswerParseError::new(
            "Please enter a finite number.",
            Some("number must be finite".to_string()),
        )
    })
}

fn parse_choice(choices: &[Value], raw: &str) -> Result<Value, AnswerParseError> {
    if choices.is_empty() {
        return Ok(Value::String(raw.to_string()));
    }
    if let Some(choice) = choices
        .iter()
        .find(|choice| value_to_display(choice).eq_ignore_ascii_case(raw))
    {
        return Ok(choice.clone());
    }
    let allowed = choices
        .iter()
        .map(value_to_display)
        .collect::<Vec<_>>()
        .join(", ");
    Err(AnswerParseError::new(
        format!("Choose one of: {}.", allowed),
        Some(format!("allowed values: {}", allowed)),
    ))
}

/// Error produced when parsing answers from the user.
#[derive(Debug)]
pub struct AnswerParseError {
    pub user_message: String,
    pub debug_message: Option<String>,
}

impl AnswerParseError {
    pub fn new(user_message: impl Into<String>, debug_message: Option<String>) -> Self {
        Self {
            user_message: user_message.into(),
            debug_message,
        }
    }
}

fn cbor_hex(answer_set: &AnswerSet) -> Result<String, AnswerError> {
    answer_set.to_cbor().map(hex::encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn question(widget: Value, args: Value) -> QuestionSpec {
        serde_json::from_value(json!({
            "order": 1,
            "variable": "q",
            "question": "Question",
            "widget": widget,
            "widget_args": args
        }))
        .expect("question")
    }

    #[test]
    fn completion_hex_decodes_back_to_answers() {
        let mut answers = serde_json::Map::new();
        answers.insert("smoker".into(), json!("yes"));
        answers.insert("packs".into(), json!(2));
        let answer_set = AnswerSet {
            survey_name: "screen".into(),
            survey_version: "1".into(),
            answers,
        };

        let encoded = cbor_hex(&answer_set).expect("encode");
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        let bytes = hex::decode(&encoded).expect("hex");
        assert_eq!(AnswerSet::from_cbor(&bytes).expect("cbor"), answer_set);
    }

    #[test]
    fn parse_answer_radio_matches_choices_case_insensitively() {
        let radio = question(json!("radio"), json!({ "choices": ["Yes", "No", 3] }));
        assert_eq!(parse_answer(&radio, "yes").unwrap(), json!("Yes"));
        assert_eq!(parse_answer(&radio, "3").unwrap(), json!(3));
        assert!(parse_answer(&radio, "maybe").is_err());
    }

    #[test]
    fn parse_answer_checkbox_accepts_yes_no() {
        let checkbox = question(json!("checkbox"), json!({}));
        assert_eq!(parse_answer(&checkbox, "y").unwrap(), Value::Bool(true));
        assert_eq!(parse_answer(&checkbox, "false").unwrap(), Value::Bool(false));
        assert!(parse_answer(&checkbox, "perhaps").is_err());
    }

    #[test]
    fn parse_answer_number_requires_whole_numbers() {
        let number = question(json!("number"), json!({}));
        assert_eq!(parse_answer(&number, "42").unwrap(), json!(42));
        assert!(parse_answer(&number, "4.5").is_err());
    }

    #[test]
    fn parse_answer_slider_checks_range() {
        let slider = question(json!("slider"), json!({ "minimum": 0, "maximum": 120 }));
        assert_eq!(parse_answer(&slider, "40").unwrap(), json!(40));
        assert_eq!(parse_answer(&slider, "40.5").unwrap(), json!(40.5));
        assert!(parse_answer(&slider, "121").is_err());
        assert!(parse_answer(&slider, "NaN").is_err());
    }

    #[test]
    fn parse_answer_respects_defaults() {
        let slider = question(json!("slider"), json!({ "default": 40 }));
        assert_eq!(parse_answer(&slider, "").unwrap(), json!(40));
        let textbox = question(json!("textbox"), json!({}));
        assert_eq!(parse_answer(&textbox, "  ").unwrap(), Value::Null);
        assert_eq!(parse_answer(&textbox, " free text ").unwrap(), json!("free text"));
    }

    #[test]
    fn parse_input_recognises_commands() {
        let textbox = question(json!("textbox"), json!({}));
        assert_eq!(parse_input(&textbox, "<").unwrap(), WizardInput::Back);
        assert_eq!(parse_input(&textbox, "BACK").unwrap(), WizardInput::Back);
        assert_eq!(parse_input(&textbox, "score").unwrap(), WizardInput::Score);
        assert_eq!(parse_input(&textbox, "exit").unwrap(), WizardInput::Exit);
        assert_eq!(
            parse_input(&textbox, "exits").unwrap(),
            WizardInput::Answer(json!("exits"))
        );
    }

    #[test]
    fn prompt_shows_hint_and_default() {
        let radio = question(
            json!("radio"),
            json!({ "choices": ["yes", "no"], "default": "no", "info": "Daily use" }),
        );
        let prompt = PromptContext::new(&radio, Some("Question 1 / 2".into()));
        assert_eq!(prompt.title, "Q1: Question");
        assert_eq!(prompt.hint.as_deref(), Some("(yes/no)"));
        assert_eq!(prompt.default.as_deref(), Some("no"));
        assert_eq!(prompt.info.as_deref(), Some("Daily use"));
    }
}
