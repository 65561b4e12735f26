use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::expr::Condition;

/// Input control requested for a question.
///
/// Names are matched case-insensitively. Kinds the runtime does not know are
/// kept verbatim and rendered as a text box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WidgetKind {
    Radio,
    Slider,
    /// Numeric entry, always integer precision.
    Number,
    Checkbox,
    Textbox,
    Unknown(String),
}

impl WidgetKind {
    pub fn as_str(&self) -> &str {
        match self {
            WidgetKind::Radio => "radio",
            WidgetKind::Slider => "slider",
            WidgetKind::Number => "number",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::Textbox => "textbox",
            WidgetKind::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, WidgetKind::Unknown(_))
    }
}

impl From<String> for WidgetKind {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "radio" => WidgetKind::Radio,
            "slider" => WidgetKind::Slider,
            "number" => WidgetKind::Number,
            "checkbox" => WidgetKind::Checkbox,
            "textbox" => WidgetKind::Textbox,
            _ => WidgetKind::Unknown(name),
        }
    }
}

impl From<WidgetKind> for String {
    fn from(kind: WidgetKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Widget options. Only `default` matters to navigation; the rest is passed
/// through to the widget layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WidgetArgs {
    /// Declared default value. A key present with a `null` value still counts
    /// as a declared default.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One question of the survey. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionSpec {
    /// Position in the survey, dense `1..N`.
    pub order: u32,
    /// Key into the answer context.
    pub variable: String,
    #[serde(rename = "question")]
    pub prompt: String,
    #[schemars(with = "String")]
    pub widget: WidgetKind,
    #[serde(default)]
    pub widget_args: WidgetArgs,
    /// The question is bypassed while this holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub skip_if: Option<Condition>,
    /// Advancing past the question requires this to hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub valid_if: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_message: Option<String>,
}

impl QuestionSpec {
    /// True when the widget declares a default, which relaxes the answer
    /// requirement.
    pub fn has_default(&self) -> bool {
        self.widget_args.default.is_some()
    }

    /// Value the widget holds before the respondent touches it.
    pub fn initial_value(&self) -> Value {
        self.widget_args.default.clone().unwrap_or(Value::Null)
    }

    pub fn label(&self) -> String {
        self.widget_args
            .label
            .clone()
            .unwrap_or_else(|| format!("Q{}: {}", self.order, self.prompt))
    }
}
