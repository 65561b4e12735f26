use std::path::Path;

use serde_json::{Value, json};

use survey_spec::{
    ENGINE_VERSION, Format, LoadError, Questionnaire, SpecError, SurveySpec, WidgetKind, load,
    parse_spec, validate,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "simple_survey" => include_str!("../tests/fixtures/simple_survey.json"),
        "family_history" => include_str!("../tests/fixtures/family_history.yaml"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn spec(questions: Value) -> SurveySpec {
    serde_json::from_value(json!({
        "survey_name": "checks",
        "survey_version": "1",
        "questions": questions,
    }))
    .expect("deserialize")
}

fn codes(issues: &[survey_spec::Issue]) -> Vec<&str> {
    issues.iter().map(|issue| issue.code.as_str()).collect()
}

#[test]
fn simple_fixture_is_valid() {
    let spec = parse_spec(fixture("simple_survey"), Format::Json).expect("parse");
    let report = validate(&spec);
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.warnings.is_empty());

    let questionnaire = Questionnaire::new(spec).expect("questionnaire");
    assert_eq!(questionnaire.len(), 3);
    assert_eq!(questionnaire.index_of("age"), Some(2));
    let age = questionnaire.question(2).expect("age");
    assert!(age.has_default());
    assert_eq!(age.widget, WidgetKind::Slider);
    assert_eq!(age.widget_args.maximum, Some(120.0));
    assert!(!questionnaire.question(0).expect("smoker").has_default());
}

#[test]
fn yaml_fixture_sorts_and_warns() {
    let spec = parse_spec(fixture("family_history"), Format::Yaml).expect("parse");
    assert_eq!(spec.survey_version, "2.1");

    let questionnaire = Questionnaire::new(spec).expect("questionnaire");
    let variables = questionnaire
        .questions()
        .iter()
        .map(|question| question.variable.as_str())
        .collect::<Vec<_>>();
    assert_eq!(variables, vec!["sex", "crc_count", "crc_age", "ec", "notes"]);

    let notes = questionnaire.question(4).expect("notes");
    assert_eq!(notes.widget, WidgetKind::Unknown("Dropdown".into()));
    assert!(notes.has_default(), "null default still counts");
    assert_eq!(notes.widget_args.extras.get("placeholder"), Some(&json!("optional")));
    assert_eq!(questionnaire.question(0).expect("sex").widget, WidgetKind::Radio);

    let warnings = codes(questionnaire.warnings());
    assert!(warnings.contains(&"unknown_widget"));
    assert!(warnings.contains(&"orphan_invalid_message"));
    if ENGINE_VERSION != "0.1.0" {
        assert!(warnings.contains(&"engine_version_mismatch"));
    }
}

#[test]
fn order_must_be_dense_from_one() {
    let gap = spec(json!([
        { "order": 1, "variable": "a", "question": "A", "widget": "textbox" },
        { "order": 3, "variable": "b", "question": "B", "widget": "textbox" }
    ]));
    assert_eq!(codes(&validate(&gap).errors), vec!["order_not_dense"]);

    let duplicate = spec(json!([
        { "order": 1, "variable": "a", "question": "A", "widget": "textbox" },
        { "order": 1, "variable": "b", "question": "B", "widget": "textbox" }
    ]));
    let report = validate(&duplicate);
    assert!(!report.valid);
    assert!(codes(&report.errors).contains(&"duplicate_order"));

    let zero_based = spec(json!([
        { "order": 0, "variable": "a", "question": "A", "widget": "textbox" },
        { "order": 1, "variable": "b", "question": "B", "widget": "textbox" }
    ]));
    assert_eq!(codes(&validate(&zero_based).errors), vec!["order_not_dense"]);
}

#[test]
fn variables_must_be_unique_identifiers() {
    let report = validate(&spec(json!([
        { "order": 1, "variable": "age", "question": "A", "widget": "number" },
        { "order": 2, "variable": "age", "question": "B", "widget": "number" },
        { "order": 3, "variable": "2nd-try", "question": "C", "widget": "number" }
    ])));
    let errors = codes(&report.errors);
    assert!(errors.contains(&"duplicate_variable"));
    assert!(errors.contains(&"malformed_variable"));
}

#[test]
fn predicates_must_reference_known_variables() {
    let report = validate(&spec(json!([
        { "order": 1, "variable": "age", "question": "A", "widget": "number", "valid_if": "age > minimum_age" },
        { "order": 2, "variable": "sex", "question": "B", "widget": "radio", "skip_if": "gender == 'M'" }
    ])));
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.errors[0].variable.as_deref(), Some("age"));
    assert!(report.errors[1].message.contains("gender"));
}

#[test]
fn empty_question_set_is_rejected() {
    let error = Questionnaire::new(spec(json!([]))).expect_err("empty");
    let SpecError::Invalid { survey, errors } = error;
    assert_eq!(survey, "checks");
    assert_eq!(codes(&errors), vec!["no_questions"]);
}

#[test]
fn malformed_predicate_fails_to_parse() {
    let result = serde_json::from_value::<SurveySpec>(json!({
        "survey_name": "broken",
        "survey_version": "1",
        "questions": [
            { "order": 1, "variable": "a", "question": "A", "widget": "number", "skip_if": "a >" }
        ]
    }));
    assert!(result.is_err());
}

#[test]
fn load_reads_files_by_extension() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");

    let json = load(&dir.join("simple_survey.json")).expect("json");
    assert_eq!(json.name(), "smoking_screen");
    assert!(json.header().is_some_and(|header| header.starts_with("# Smoking")));

    let yaml = load(&dir.join("family_history.yaml")).expect("yaml");
    assert_eq!(yaml.version(), "2.1");

    assert!(matches!(
        load(&dir.join("simple_survey.toml")),
        Err(LoadError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        load(&dir.join("missing.json")),
        Err(LoadError::Io { .. })
    ));
}

#[test]
fn spec_round_trips_through_json() {
    let spec = parse_spec(fixture("simple_survey"), Format::Json).expect("parse");
    let text = serde_json::to_string(&spec).expect("serialize");
    let again: SurveySpec = serde_json::from_str(&text).expect("deserialize");
    assert_eq!(spec, again);
}
