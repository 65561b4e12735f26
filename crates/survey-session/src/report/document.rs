use handlebars::Handlebars;
use serde::Serialize;

use survey_spec::render::value_to_display;
use survey_spec::{AnswerContext, ENGINE_VERSION, Questionnaire, is_eligible};

use super::ReportError;
use crate::scoring::{ResultTable, ScoringResult};

const TEMPLATE_NAME: &str = "report";

const REPORT_TEMPLATE: &str = "\
# {{survey_name}} (version {{survey_version}})

**Reference code: {{reference_code}}**

- Engine version: {{engine_version}}
- Survey URL: {{survey_url}}
- Generated: {{generated_at}}
{{#if markdown}}

## Results

{{markdown}}
{{/if}}
{{#if table}}

## Results table

{{#each table}}
{{this}}
{{/each}}
{{/if}}

## Answers

{{#each answers}}
- **{{label}}**: {{value}}
{{/each}}
";

#[derive(Debug, Serialize)]
struct DocumentData<'a> {
    survey_name: &'a str,
    survey_version: &'a str,
    reference_code: &'a str,
    engine_version: &'a str,
    survey_url: &'a str,
    generated_at: &'a str,
    markdown: Option<&'a str>,
    table: Vec<String>,
    answers: Vec<AnswerLine>,
}

#[derive(Debug, Serialize)]
struct AnswerLine {
    label: String,
    value: String,
}

/// Fields stamped on a report besides the questionnaire and its answers.
#[derive(Debug, Clone, Copy)]
pub struct DocumentMeta<'a> {
    pub reference_code: &'a str,
    pub survey_url: Option<&'a str>,
    pub generated_at: &'a str,
}

/// Markdown report document backed by a compiled handlebars template.
pub struct ReportDocument {
    registry: Handlebars<'static>,
}

impl ReportDocument {
    pub fn new() -> Result<Self, ReportError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_template_string(TEMPLATE_NAME, REPORT_TEMPLATE)?;
        Ok(Self { registry })
    }

    pub fn render(
        &self,
        questionnaire: &Questionnaire,
        answers: &AnswerContext,
        scoring: &ScoringResult,
        meta: DocumentMeta<'_>,
    ) -> Result<String, ReportError> {
        let markdown = (scoring.options.include_md_in_pdf && !scoring.markdown.trim().is_empty())
            .then_some(scoring.markdown.as_str());
        let table = if scoring.options.include_data_in_pdf {
            markdown_table(&scoring.table)
        } else {
            Vec::new()
        };
        let data = DocumentData {
            survey_name: questionnaire.name(),
            survey_version: questionnaire.version(),
            reference_code: meta.reference_code,
            engine_version: ENGINE_VERSION,
            survey_url: meta.survey_url.unwrap_or("NA"),
            generated_at: meta.generated_at,
            markdown,
            table,
            answers: answer_lines(questionnaire, answers),
        };
        Ok(self.registry.render(TEMPLATE_NAME, &data)?)
    }
}

fn answer_lines(questionnaire: &Questionnaire, answers: &AnswerContext) -> Vec<AnswerLine> {
    questionnaire
        .questions()
        .iter()
        // A skip predicate that fails here still belongs on the record.
        .filter(|question| is_eligible(*question, answers).unwrap_or(true))
        .map(|question| AnswerLine {
            label: question.label(),
            value: answers
                .get(&question.variable)
                .map(value_to_display)
                .unwrap_or_default(),
        })
        .collect()
}

fn markdown_table(table: &ResultTable) -> Vec<String> {
    let row = |cells: &[String]| {
        let cells: Vec<String> = cells.iter().map(|cell| cell.replace('|', "\\|")).collect();
        format!("| {} |", cells.join(" | "))
    };
    let mut lines = vec![row(table.header())];
    lines.push(format!("|{}", " --- |".repeat(table.width())));
    lines.extend(table.data_rows().iter().map(|cells| row(cells)));
    lines
}
