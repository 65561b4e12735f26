mod wizard;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use survey_session::{
    ClientInfo, DEFAULT_DATA_DIR, DEFAULT_TEMP_DIR, FileReportGenerator, ResultsPanel, Scorer,
    ScriptScorer, Session, SessionConfig, StepResponse, clear_temp_reports,
};
use survey_spec::{
    AnswerContext, AnswerSet, Questionnaire, SurveySpec, ValidationReport, build_render_payload,
    load, project, read_spec, render_json_ui, render_text, resolve_display_index, validate,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wizard::{PromptContext, Verbosity, WizardInput, WizardPresenter, parse_input};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Conditional clinical survey runner",
    long_about = "Runs question sets with skip and validation rules, scores the answers with an external script and writes auditable reports"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum RenderMode {
    Text,
    Json,
}

#[derive(Args)]
struct StorageArgs {
    /// Keep reports, archive records and the submission log under --data-dir.
    #[arg(long)]
    save_user_data: bool,
    #[arg(long, value_name = "DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    #[arg(long, value_name = "DIR", default_value = DEFAULT_TEMP_DIR)]
    temp_dir: PathBuf,
    /// URL where the survey is hosted, printed on reports.
    #[arg(long, value_name = "URL")]
    actual_url: Option<String>,
}

impl StorageArgs {
    fn into_config(self) -> SessionConfig {
        SessionConfig {
            save_user_data: self.save_user_data,
            data_dir: self.data_dir,
            temp_dir: self.temp_dir,
            actual_url: self.actual_url,
            ..SessionConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Answer a survey interactively in the terminal.
    Run {
        /// Question set (.json, .yaml or .yml).
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
        /// Scoring script (.py or .R) defining `scoring`.
        #[arg(long, value_name = "SCRIPT")]
        scoring_script: PathBuf,
        /// Interpreter used for the scoring script instead of python3/Rscript.
        #[arg(long, value_name = "PROGRAM")]
        interpreter: Option<String>,
        /// JSON file with initial answers (object by variable or array in question order).
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        #[command(flatten)]
        storage: StorageArgs,
        /// Print the full projection before each prompt.
        #[arg(long)]
        verbose: bool,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Check a question set for structural errors.
    Validate {
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
    },
    /// Print what the respondent would see at a question index.
    Render {
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// Display index; defaults to the first eligible question.
        #[arg(long)]
        index: Option<usize>,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Score a set of answers without running the wizard.
    Score {
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
        #[arg(long, value_name = "SCRIPT")]
        scoring_script: PathBuf,
        #[arg(long, value_name = "PROGRAM")]
        interpreter: Option<String>,
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Print the JSON Schema of question-set documents.
    Schema,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    match cli.command {
        Command::Run {
            survey,
            scoring_script,
            interpreter,
            answers,
            storage,
            verbose,
            format,
        } => run_wizard(
            &survey,
            &scoring_script,
            interpreter,
            answers.as_deref(),
            storage.into_config(),
            verbose,
            format,
        ),
        Command::Validate { survey } => run_validate(&survey),
        Command::Render {
            survey,
            answers,
            index,
            format,
        } => run_render(&survey, answers.as_deref(), index, format),
        Command::Score {
            survey,
            scoring_script,
            interpreter,
            answers,
            format,
        } => run_score(&survey, &scoring_script, interpreter, &answers, format),
        Command::Schema => run_schema(),
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn build_scorer(script: &Path, interpreter: Option<String>) -> CliResult<ScriptScorer> {
    let scorer = ScriptScorer::new(script)?;
    Ok(match interpreter {
        Some(interpreter) => scorer.with_interpreter(interpreter),
        None => scorer,
    })
}

fn read_answers(path: &Path, questionnaire: &Questionnaire) -> CliResult<AnswerContext> {
    let contents = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&contents)? {
        Value::Object(answers) => Ok(AnswerContext::from_partial(
            questionnaire.questions(),
            &answers,
        )),
        Value::Array(values) => Ok(AnswerContext::from_values(
            questionnaire.questions(),
            values,
        )?),
        _ => Err(format!(
            "answers in {} must be a JSON object or array",
            path.display()
        )
        .into()),
    }
}

fn client_info() -> ClientInfo {
    ClientInfo::from([
        (
            "client".to_string(),
            format!("survey-cli/{}", env!("CARGO_PKG_VERSION")),
        ),
        ("platform".to_string(), std::env::consts::OS.to_string()),
    ])
}

fn run_wizard(
    survey_path: &Path,
    scoring_script: &Path,
    interpreter: Option<String>,
    answers_path: Option<&Path>,
    config: SessionConfig,
    verbose: bool,
    format: RenderMode,
) -> CliResult<()> {
    let questionnaire = Arc::new(load(survey_path)?);
    let scorer: Arc<dyn Scorer> = Arc::new(build_scorer(scoring_script, interpreter)?);
    clear_temp_reports(&config.temp_dir);
    let reporter = Arc::new(FileReportGenerator::new(config.clone())?);
    let mut session = Session::new(questionnaire.clone(), scorer, reporter, config.clone())
        .with_client_info(client_info());

    let context = match answers_path {
        Some(path) => read_answers(path, &questionnaire)?,
        None => session.initial_context(),
    };
    let loaded = session.load_with(&context);
    let mut presenter = WizardPresenter::new(Verbosity::from_verbose(verbose), format);
    presenter.show_header(&questionnaire);

    let outcome = wizard_loop(&questionnaire, &mut session, context, loaded, &presenter);
    clear_temp_reports(&config.temp_dir);
    outcome
}

fn wizard_loop(
    questionnaire: &Questionnaire,
    session: &mut Session,
    mut context: AnswerContext,
    mut last: StepResponse,
    presenter: &WizardPresenter,
) -> CliResult<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        if let Some(warning) = &last.warning {
            presenter.show_warning(warning);
        }
        let projection = match session.project(&context) {
            Ok(projection) => {
                presenter.show_step(&build_render_payload(questionnaire, &projection, &context));
                Some(projection)
            }
            Err(error) => {
                presenter.show_warning(&error.into());
                None
            }
        };

        let question = match questionnaire.question(session.current_index()) {
            Some(question) => question,
            None => {
                presenter.show_results(&last.results);
                if matches!(last.results, ResultsPanel::Shown { .. }) {
                    let answer_set =
                        AnswerSet::new(questionnaire.name(), questionnaire.version(), &context);
                    presenter.show_completion(&answer_set);
                }
                println!("Type '<' to go back, 'score' to recompute or 'exit' to quit.");
                print!("> ");
                io::stdout().flush()?;
                let Some(line) = lines.next().transpose()? else {
                    return Ok(());
                };
                match line.trim() {
                    "<" | "back" => last = session.retreat(&context),
                    "score" => match session.recompute_score(&context) {
                        Ok(result) => {
                            presenter.show_scoring(&result);
                            last.warning = None;
                            last.results = ResultsPanel::Hidden;
                        }
                        Err(error) => presenter.show_warning(&error),
                    },
                    "exit" => return Ok(()),
                    _ => {
                        last.warning = None;
                        last.results = ResultsPanel::Hidden;
                    }
                }
                continue;
            }
        };

        let progress = projection
            .filter(|projection| projection.show_next)
            .map(|projection| projection.progress.label());
        let prompt = PromptContext::new(question, progress);
        let input = loop {
            presenter.show_prompt(&prompt);
            print!("> ");
            io::stdout().flush()?;
            let Some(line) = lines.next().transpose()? else {
                debug!("input closed");
                return Ok(());
            };
            match parse_input(question, &line) {
                Ok(input) => break input,
                Err(error) => presenter.show_parse_error(&error),
            }
        };

        last = match input {
            WizardInput::Answer(value) => {
                context = context.with_answer(&question.variable, value);
                session.advance(&context)
            }
            WizardInput::Back => session.retreat(&context),
            WizardInput::Score => {
                match session.recompute_score(&context) {
                    Ok(result) => presenter.show_scoring(&result),
                    Err(error) => presenter.show_warning(&error),
                }
                StepResponse {
                    current_index: session.current_index(),
                    projection: None,
                    warning: None,
                    results: ResultsPanel::Hidden,
                }
            }
            WizardInput::Exit => {
                info!(index = session.current_index(), "wizard exited");
                return Ok(());
            }
        };
    }
}

fn run_validate(survey_path: &Path) -> CliResult<()> {
    let spec = read_spec(survey_path)?;
    let report = validate(&spec);
    println!(
        "Validation result: {}",
        if report.valid { "valid" } else { "invalid" }
    );
    describe_validation(&spec, &report);

    if report.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(spec: &SurveySpec, report: &ValidationReport) {
    println!(
        "Survey: {} ({}), {} questions",
        spec.survey_name,
        spec.survey_version,
        spec.questions.len()
    );
    if !report.errors.is_empty() {
        println!("Errors:");
        for issue in &report.errors {
            println!("  [{}] {}", issue.code, issue);
        }
    }
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for issue in &report.warnings {
            println!("  [{}] {}", issue.code, issue);
        }
    }
}

fn run_render(
    survey_path: &Path,
    answers_path: Option<&Path>,
    index: Option<usize>,
    format: RenderMode,
) -> CliResult<()> {
    let questionnaire = load(survey_path)?;
    let context = match answers_path {
        Some(path) => read_answers(path, &questionnaire)?,
        None => AnswerContext::initial(questionnaire.questions()),
    };
    let index = match index {
        Some(index) => index,
        None => resolve_display_index(0, questionnaire.questions(), &context)?,
    };
    let projection = project(index, questionnaire.questions(), &context)?;
    let payload = build_render_payload(&questionnaire, &projection, &context);
    match format {
        RenderMode::Text => println!("{}", render_text(&payload)),
        RenderMode::Json => println!("{}", serde_json::to_string_pretty(&render_json_ui(&payload))?),
    }
    Ok(())
}

fn run_score(
    survey_path: &Path,
    scoring_script: &Path,
    interpreter: Option<String>,
    answers_path: &Path,
    format: RenderMode,
) -> CliResult<()> {
    let questionnaire = load(survey_path)?;
    let context = read_answers(answers_path, &questionnaire)?;
    let scorer = build_scorer(scoring_script, interpreter)?;
    let result = scorer.score(&context)?;
    match format {
        RenderMode::Text => {
            WizardPresenter::new(Verbosity::Clean, format).show_scoring(&result);
        }
        RenderMode::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(SurveySpec);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
