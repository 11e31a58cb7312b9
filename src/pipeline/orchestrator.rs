use super::{EvaluationRequest, StageError, StageExecutor, StageFailure, StageOutput};
use crate::stage::StageKind;
use crate::verdict::Verdict;
use serde::Serialize;

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Done,
    Aborted,
}

/// Result of one executed stage.
#[derive(Debug)]
pub struct StageEntry {
    pub stage: StageKind,
    pub result: Result<StageOutput, StageError>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ReportOutput<'a> {
    Text(&'a str),
    Verdict(&'a Verdict),
}

/// Flat serializable view of a [`StageEntry`], one NDJSON line per stage.
#[derive(Serialize)]
pub struct StageReport<'a> {
    stage: StageKind,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<ReportOutput<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StageEntry {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn report(&self) -> StageReport<'_> {
        match &self.result {
            Ok(output) => StageReport {
                stage: self.stage,
                status: "ok",
                output: Some(match output {
                    StageOutput::Verdict(verdict) => ReportOutput::Verdict(verdict),
                    other => ReportOutput::Text(other.text().unwrap_or_default()),
                }),
                error_kind: None,
                error: None,
            },
            Err(err) => StageReport {
                stage: self.stage,
                status: "failed",
                output: None,
                error_kind: Some(match err.failure {
                    StageFailure::Service(_) => "service",
                    StageFailure::Parse(_) => "parse",
                }),
                error: Some(err.failure.to_string()),
            },
        }
    }
}

/// Ordered stage results for one request.
///
/// Holds one entry per executed stage. A failed entry is always last.
#[derive(Debug)]
pub struct PipelineOutcome {
    entries: Vec<StageEntry>,
    state: PipelineState,
}

impl PipelineOutcome {
    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.entries
            .iter()
            .find_map(|entry| entry.result.as_ref().ok().and_then(StageOutput::verdict))
    }

    pub fn failure(&self) -> Option<&StageError> {
        self.entries
            .iter()
            .find_map(|entry| entry.result.as_ref().err())
    }
}

/// Run every stage in order, reporting each entry to `on_entry` as soon as
/// it exists. Stops after the first failed stage.
pub fn run_pipeline<F>(
    executor: &StageExecutor<'_>,
    request: &EvaluationRequest,
    mut on_entry: F,
) -> PipelineOutcome
where
    F: FnMut(&StageEntry),
{
    let mut entries = Vec::with_capacity(StageKind::ORDER.len());

    for stage in StageKind::ORDER {
        let result = executor.run(stage, request.source(), request.translated());
        let entry = StageEntry { stage, result };
        on_entry(&entry);
        let failed = !entry.is_ok();
        entries.push(entry);
        if failed {
            tracing::warn!(stage = %stage, "pipeline aborted");
            return PipelineOutcome {
                entries,
                state: PipelineState::Aborted,
            };
        }
    }

    tracing::info!("pipeline complete");
    PipelineOutcome {
        entries,
        state: PipelineState::Done,
    }
}
