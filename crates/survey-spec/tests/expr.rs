use serde_json::{Map, Value, json};

use survey_spec::{Condition, ExprError, evaluate};

fn context(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object context")
}

#[test]
fn comparisons_and_connectives() {
    let ctx = context(json!({ "age": 42, "sex": "F", "smoker": false }));

    assert!(evaluate("age >= 18", &ctx).expect("evaluate"));
    assert!(evaluate("18 <= age < 65", &ctx).expect("evaluate"));
    assert!(!evaluate("age > 18 and smoker", &ctx).expect("evaluate"));
    assert!(evaluate("sex == 'F' or smoker", &ctx).expect("evaluate"));
    assert!(evaluate("not smoker", &ctx).expect("evaluate"));
    assert!(evaluate("sex == \"F\" && !smoker", &ctx).expect("evaluate"));
    assert!(evaluate("age < 18 || age == 42", &ctx).expect("evaluate"));
}

#[test]
fn membership_and_identity() {
    let ctx = context(json!({ "choice": "Oui", "age": null, "tags": ["a", "b"] }));

    assert!(evaluate("choice in ['Oui', 'Peut-être']", &ctx).expect("evaluate"));
    assert!(evaluate("choice not in ('Non',)", &ctx).expect("evaluate"));
    assert!(evaluate("'u' in choice", &ctx).expect("evaluate"));
    assert!(evaluate("'b' in tags", &ctx).expect("evaluate"));
    assert!(evaluate("age is None", &ctx).expect("evaluate"));
    assert!(!evaluate("age is not None", &ctx).expect("evaluate"));
    assert!(evaluate("age == null", &ctx).expect("evaluate"));
}

#[test]
fn arithmetic_follows_numeric_rules() {
    let ctx = context(json!({ "count": 7, "weight": 70.5, "height": 1.75 }));

    assert!(evaluate("count % 2 == 1", &ctx).expect("evaluate"));
    assert!(evaluate("-7 % 3 == 2", &ctx).expect("evaluate"));
    assert!(evaluate("count / 2 == 3.5", &ctx).expect("evaluate"));
    assert!(evaluate("weight / (height * height) > 23", &ctx).expect("evaluate"));
    assert!(evaluate("count * 2 - 4 == 10", &ctx).expect("evaluate"));
    assert!(evaluate("-count < 0", &ctx).expect("evaluate"));
    assert!(evaluate("1 == 1.0", &ctx).expect("evaluate"));
    assert!(evaluate("'a' + 'b' == 'ab'", &ctx).expect("evaluate"));
}

#[test]
fn checkbox_answers_act_as_zero_or_one() {
    let ctx = context(json!({ "diabetic": true, "smoker": true, "obese": false }));

    assert!(evaluate("diabetic == 1", &ctx).expect("evaluate"));
    assert!(evaluate("obese == 0.0", &ctx).expect("evaluate"));
    assert!(evaluate("diabetic + smoker >= 2", &ctx).expect("evaluate"));
    assert!(evaluate("diabetic + smoker + obese == 2", &ctx).expect("evaluate"));
    assert!(evaluate("diabetic > 0", &ctx).expect("evaluate"));
    assert!(evaluate("obese < smoker", &ctx).expect("evaluate"));
    assert!(evaluate("-diabetic == -1", &ctx).expect("evaluate"));
    assert!(evaluate("1 in [diabetic]", &ctx).expect("evaluate"));
    assert!(!evaluate("diabetic is 1", &ctx).expect("evaluate"));
    assert!(!evaluate("diabetic == 'True'", &ctx).expect("evaluate"));
}

#[test]
fn truthiness_of_bare_values() {
    let ctx = context(json!({
        "zero": 0,
        "empty": "",
        "none": null,
        "list": [],
        "text": "x",
        "yes": true
    }));

    for falsy in ["zero", "empty", "none", "list", "False", "0.0"] {
        assert!(!evaluate(falsy, &ctx).expect("evaluate"), "{falsy}");
    }
    for truthy in ["text", "yes", "[0]", "True", "-1"] {
        assert!(evaluate(truthy, &ctx).expect("evaluate"), "{truthy}");
    }
}

#[test]
fn boolean_operators_short_circuit() {
    let ctx = context(json!({ "known": 1 }));

    assert!(evaluate("known or missing", &ctx).expect("evaluate"));
    assert!(!evaluate("not known and missing", &ctx).expect("evaluate"));
    assert!(!evaluate("known > 5 > missing", &ctx).expect("evaluate"));
}

#[test]
fn unbound_name_is_an_error() {
    let ctx = context(json!({ "age": 30 }));

    let error = evaluate("weight > 10", &ctx).expect_err("unbound");
    assert_eq!(error.expression, "weight > 10");
    assert_eq!(error.source, ExprError::UnboundVariable("weight".into()));
}

#[test]
fn runtime_errors_are_reported() {
    let ctx = context(json!({ "age": null, "count": 3, "profile": { "a": 1 } }));

    let error = evaluate("age >= 18", &ctx).expect_err("ordering None");
    assert!(matches!(error.source, ExprError::TypeMismatch { op: ">=", .. }));

    let error = evaluate("count / 0 > 1", &ctx).expect_err("division");
    assert_eq!(error.source, ExprError::DivisionByZero);

    let error = evaluate("profile == 1", &ctx).expect_err("object");
    assert_eq!(error.source, ExprError::UnsupportedValue("profile".into()));

    let error = evaluate("-'x'", &ctx).expect_err("unary");
    assert!(matches!(error.source, ExprError::BadUnary { op: "-", operand: "str" }));
}

#[test]
fn mismatched_equality_is_false_not_an_error() {
    let ctx = context(json!({ "age": "12" }));

    assert!(!evaluate("age == 12", &ctx).expect("evaluate"));
    assert!(evaluate("age != 12", &ctx).expect("evaluate"));
}

#[test]
fn syntax_errors_carry_a_position() {
    for (source, position) in [
        ("age >= ", 7),
        ("age >== 3", 6),
        ("(age > 3", 8),
        ("'open", 0),
        ("age $ 3", 4),
        ("age 3", 4),
        ("and", 0),
    ] {
        let error = Condition::parse(source).expect_err(source);
        match error {
            ExprError::Syntax { position: found, .. } => assert_eq!(found, position, "{source}"),
            other => panic!("expected syntax error for {source}, got {other:?}"),
        }
    }
}

#[test]
fn host_constructs_are_rejected() {
    for source in ["__import__('os')", "age.real", "len(x)", "x[0]", "lambda: 1"] {
        assert!(Condition::parse(source).is_err(), "{source}");
    }
}

#[test]
fn deep_nesting_is_rejected() {
    let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
    assert!(matches!(
        Condition::parse(&source),
        Err(ExprError::Syntax { .. })
    ));
}

#[test]
fn long_arithmetic_chains_are_rejected() {
    let ctx = context(json!({ "x": 0 }));

    for link in [" + 1", " * 1", " - 1"] {
        let source = format!("x == 0{}", link.repeat(200_000));
        assert!(
            matches!(Condition::parse(&source), Err(ExprError::Syntax { .. })),
            "{link}"
        );
    }

    let short = format!("x{} == 30", " + 1".repeat(30));
    assert!(evaluate(&short, &ctx).expect("evaluate"));
    let mixed = format!("x + 2{} == 2", " * 1".repeat(30));
    assert!(evaluate(&mixed, &ctx).expect("evaluate"));
}

#[test]
fn variables_lists_referenced_names() {
    let condition = Condition::parse("a > 1 and (b in [c, 2] or not d) and 'e' == 'e'")
        .expect("parse");
    let names = condition.variables().into_iter().collect::<Vec<_>>();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
}

#[test]
fn condition_serializes_as_source_text() {
    let condition: Condition = serde_json::from_value(json!("  sex == 'F' ")).expect("deserialize");
    assert_eq!(condition.source(), "sex == 'F'");
    assert_eq!(serde_json::to_value(&condition).expect("serialize"), json!("sex == 'F'"));

    let error = serde_json::from_value::<Condition>(json!("sex ==")).expect_err("malformed");
    assert!(error.to_string().contains("syntax error"));
}
