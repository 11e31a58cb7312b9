//! Stage identities for the four evaluation questions.
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four independent evaluation steps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Identify the document type from the source text.
    Classification,
    /// List translation errors as free text.
    Review,
    /// List concrete correction pairs as free text.
    Correction,
    /// Produce the structured pass/fail verdict.
    Verdict,
}

impl StageKind {
    /// Fixed execution order of the pipeline.
    pub const ORDER: [StageKind; 4] = [
        StageKind::Classification,
        StageKind::Review,
        StageKind::Correction,
        StageKind::Verdict,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Review => "review",
            Self::Correction => "correction",
            Self::Verdict => "verdict",
        }
    }

    /// Human-facing heading used by the terminal renderer.
    pub fn title(self) -> &'static str {
        match self {
            Self::Classification => "Document type",
            Self::Review => "Review findings",
            Self::Correction => "Corrections",
            Self::Verdict => "Verdict",
        }
    }

    /// Whether the stage reads the translated text at all.
    pub fn uses_translation(self) -> bool {
        !matches!(self, Self::Classification)
    }

    /// Sampling temperature used when the config does not override it.
    pub fn default_temperature(self) -> f32 {
        match self {
            Self::Classification => 0.0,
            Self::Review | Self::Correction => 0.3,
            Self::Verdict => 0.2,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
