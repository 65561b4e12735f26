use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::spec::survey::{Questionnaire, SpecError, SurveySpec};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported question set format '{0}', expected .json, .yaml or .yml")]
    UnsupportedFormat(PathBuf),
    #[error(transparent)]
    Invalid(#[from] SpecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }
}

/// Reads a question-set document without structural validation.
pub fn read_spec(path: &Path) -> Result<SurveySpec, LoadError> {
    let format = Format::from_path(path).ok_or_else(|| LoadError::UnsupportedFormat(path.into()))?;
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.into(),
        source,
    })?;
    parse_spec(&text, format).map_err(|error| match error {
        ParseError::Json(source) => LoadError::Json {
            path: path.into(),
            source,
        },
        ParseError::Yaml(source) => LoadError::Yaml {
            path: path.into(),
            source,
        },
    })
}

/// Reads, validates and orders a question set.
pub fn load(path: &Path) -> Result<Questionnaire, LoadError> {
    let spec = read_spec(path)?;
    let questionnaire = Questionnaire::new(spec)?;
    info!(
        path = %path.display(),
        survey = questionnaire.name(),
        version = questionnaire.version(),
        questions = questionnaire.len(),
        "question set loaded"
    );
    Ok(questionnaire)
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub fn parse_spec(text: &str, format: Format) -> Result<SurveySpec, ParseError> {
    Ok(match format {
        Format::Json => serde_json::from_str(text)?,
        Format::Yaml => serde_yaml::from_str(text)?,
    })
}
