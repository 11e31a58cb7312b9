//! The four-stage evaluation pipeline.
//!
//! Stages are independent fan-out calls over the same two texts. They run in
//! a fixed order so results can be shown as they arrive, and the first
//! failure stops everything after it.
mod executor;
mod orchestrator;

pub use executor::{StageExecutor, StageSettings, StageTemperatures};
pub use orchestrator::{run_pipeline, PipelineOutcome, PipelineState, StageEntry};

use crate::generation::ServiceError;
use crate::stage::StageKind;
use crate::verdict::{ParseError, Verdict};
use serde::Serialize;
use thiserror::Error;

/// Input rejected before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("source text is empty")]
    EmptySource,
    #[error("translated text is empty")]
    EmptyTranslation,
}

/// Source document and its translation, both trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    source: String,
    translated: String,
}

impl EvaluationRequest {
    pub fn new(source: &str, translated: &str) -> Result<Self, ValidationError> {
        let source = require_text(source, ValidationError::EmptySource)?;
        let translated = require_text(translated, ValidationError::EmptyTranslation)?;
        Ok(Self {
            source: source.to_string(),
            translated: translated.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn translated(&self) -> &str {
        &self.translated
    }
}

/// Check the fields a single stage needs; classification ignores the
/// translation. Returns the trimmed texts.
pub fn validate_stage_input<'a>(
    stage: StageKind,
    source: &'a str,
    translated: &'a str,
) -> Result<(&'a str, &'a str), ValidationError> {
    let source = require_text(source, ValidationError::EmptySource)?;
    if !stage.uses_translation() {
        return Ok((source, translated.trim()));
    }
    let translated = require_text(translated, ValidationError::EmptyTranslation)?;
    Ok((source, translated))
}

fn require_text(text: &str, err: ValidationError) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(err);
    }
    Ok(trimmed)
}

/// Successful result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Classification(String),
    Review(String),
    Correction(String),
    Verdict(Verdict),
}

impl StageOutput {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Classification(_) => StageKind::Classification,
            Self::Review(_) => StageKind::Review,
            Self::Correction(_) => StageKind::Correction,
            Self::Verdict(_) => StageKind::Verdict,
        }
    }

    /// Free text of the three narrative stages.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Classification(text) | Self::Review(text) | Self::Correction(text) => Some(text),
            Self::Verdict(_) => None,
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Verdict(verdict) => Some(verdict),
            _ => None,
        }
    }
}

/// Underlying cause of a stage failure.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A stage failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {failure}")]
pub struct StageError {
    pub stage: StageKind,
    #[source]
    pub failure: StageFailure,
}

impl StageError {
    pub fn new(stage: StageKind, failure: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            failure: failure.into(),
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self.failure, StageFailure::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_trims_and_requires_both_texts() {
        let request = EvaluationRequest::new("  RG 12.345  \n", "\tCI 12.345 ").unwrap();
        assert_eq!(request.source(), "RG 12.345");
        assert_eq!(request.translated(), "CI 12.345");

        assert_eq!(
            EvaluationRequest::new(" \n", "x"),
            Err(ValidationError::EmptySource)
        );
        assert_eq!(
            EvaluationRequest::new("x", ""),
            Err(ValidationError::EmptyTranslation)
        );
    }

    #[test]
    fn classification_input_does_not_need_translation() {
        assert_eq!(
            validate_stage_input(StageKind::Classification, " Diploma ", ""),
            Ok(("Diploma", ""))
        );
        assert_eq!(
            validate_stage_input(StageKind::Review, "Diploma", "  "),
            Err(ValidationError::EmptyTranslation)
        );
        assert_eq!(
            validate_stage_input(StageKind::Classification, "", "Diploma"),
            Err(ValidationError::EmptySource)
        );
    }

    #[test]
    fn stage_output_serializes_with_stage_tag() {
        let json = serde_json::to_value(StageOutput::Review("Nenhum problema identificado.".into()))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"stage": "review", "output": "Nenhum problema identificado."})
        );
    }

    #[test]
    fn stage_error_message_names_the_stage() {
        let err = StageError::new(StageKind::Verdict, ParseError::NoStructuredFragment);
        assert!(err.is_parse());
        assert_eq!(
            err.to_string(),
            "verdict stage failed: response contains no brace-delimited object"
        );
    }
}
