use super::{StageError, StageOutput};
use crate::generation::{ChatMessage, GenerationClient, GenerationRequest, ServiceError};
use crate::prompt::render_prompt;
use crate::stage::StageKind;
use crate::verdict::parse_verdict;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Sampling temperature per stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageTemperatures {
    pub classification: f32,
    pub review: f32,
    pub correction: f32,
    pub verdict: f32,
}

impl Default for StageTemperatures {
    fn default() -> Self {
        Self {
            classification: StageKind::Classification.default_temperature(),
            review: StageKind::Review.default_temperature(),
            correction: StageKind::Correction.default_temperature(),
            verdict: StageKind::Verdict.default_temperature(),
        }
    }
}

impl StageTemperatures {
    pub fn for_stage(&self, stage: StageKind) -> f32 {
        match stage {
            StageKind::Classification => self.classification,
            StageKind::Review => self.review,
            StageKind::Correction => self.correction,
            StageKind::Verdict => self.verdict,
        }
    }
}

/// Model selection shared by every stage of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub model: String,
    pub temperatures: StageTemperatures,
}

/// Runs single stages against a generation client.
pub struct StageExecutor<'a> {
    client: &'a dyn GenerationClient,
    settings: &'a StageSettings,
}

impl<'a> StageExecutor<'a> {
    pub fn new(client: &'a dyn GenerationClient, settings: &'a StageSettings) -> Self {
        Self { client, settings }
    }

    /// Build the stage prompt, call the service, and shape the answer.
    ///
    /// Narrative stages return the trimmed text; the verdict stage returns
    /// the parsed [`crate::verdict::Verdict`].
    pub fn run(
        &self,
        stage: StageKind,
        source: &str,
        translated: &str,
    ) -> Result<StageOutput, StageError> {
        let prompt = render_prompt(stage, source, translated);
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.settings.temperatures.for_stage(stage),
        };

        let start = Instant::now();
        let raw = self.client.generate(&request).map_err(|err| {
            tracing::warn!(
                stage = %stage,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %err,
                "generation failed"
            );
            StageError::new(stage, err)
        })?;
        tracing::info!(
            stage = %stage,
            model = %request.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.messages[0].content.len(),
            response_bytes = raw.len(),
            "stage complete"
        );

        let text = raw.trim().to_string();
        if text.is_empty() {
            tracing::warn!(stage = %stage, "generation returned only whitespace");
            return Err(StageError::new(stage, ServiceError::EmptyResponse));
        }
        match stage {
            StageKind::Classification => Ok(StageOutput::Classification(text)),
            StageKind::Review => Ok(StageOutput::Review(text)),
            StageKind::Correction => Ok(StageOutput::Correction(text)),
            StageKind::Verdict => parse_verdict(&raw).map(StageOutput::Verdict).map_err(|err| {
                tracing::warn!(stage = %stage, error = %err, "verdict could not be parsed");
                StageError::new(stage, err)
            }),
        }
    }
}
