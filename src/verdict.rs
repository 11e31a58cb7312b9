//! Verdict extraction from free-form model output.
//!
//! The verdict stage asks the model for a JSON object, but the answer may be
//! wrapped in prose, code fences, or several candidate objects. Extraction is
//! lenient about where the object sits and strict about what it contains:
//! the first balanced `{...}` span is decoded, and every field must validate
//! exactly. No fuzzy matching is applied to the outcome label.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

const APPROVED_LABEL: &str = "Aprovado";
const REJECTED_LABEL: &str = "Rejeitado";
const MAX_SCORE: i64 = 100;
const FRAGMENT_PREVIEW_CHARS: usize = 500;

const SCORE_KEYS: &[&str] = &["nota", "score"];
const OUTCOME_KEYS: &[&str] = &["resultado", "outcome"];
const RATIONALE_KEYS: &[&str] = &["justificativa", "rationale"];

/// Binary outcome of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "Aprovado")]
    Approved,
    #[serde(rename = "Rejeitado")]
    Rejected,
}

impl Outcome {
    /// Wire label, exactly as the model is instructed to emit it.
    pub fn label(self) -> &'static str {
        match self {
            Self::Approved => APPROVED_LABEL,
            Self::Rejected => REJECTED_LABEL,
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            APPROVED_LABEL => Some(Self::Approved),
            REJECTED_LABEL => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Final score, outcome and justification for one evaluation.
///
/// The outcome is taken as the model stated it; the score never overrides a
/// rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    #[serde(rename = "nota")]
    score: u8,
    #[serde(rename = "resultado")]
    outcome: Outcome,
    #[serde(rename = "justificativa")]
    rationale: String,
}

impl Verdict {
    pub fn new(score: u8, outcome: Outcome, rationale: impl Into<String>) -> Result<Self, ParseError> {
        if i64::from(score) > MAX_SCORE {
            return Err(ParseError::InvalidScore {
                found: score.to_string(),
            });
        }
        let rationale = rationale.into();
        if rationale.trim().is_empty() {
            return Err(ParseError::MissingRationale);
        }
        Ok(Self {
            score,
            outcome,
            rationale,
        })
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == Outcome::Approved
    }
}

/// Reasons a verdict could not be recovered from model output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response contains no brace-delimited object")]
    NoStructuredFragment,
    #[error("structured fragment is not a valid JSON object: {reason}; fragment: {fragment}")]
    MalformedFragment { fragment: String, reason: String },
    #[error("score must be an integer between 0 and 100 (got {found})")]
    InvalidScore { found: String },
    #[error("outcome must be exactly \"Aprovado\" or \"Rejeitado\" (got {found})")]
    InvalidOutcome { found: String },
    #[error("justification is missing or empty")]
    MissingRationale,
}

/// Recover a [`Verdict`] from raw model output.
pub fn parse_verdict(text: &str) -> Result<Verdict, ParseError> {
    let fragment = find_structured_fragment(text).ok_or(ParseError::NoStructuredFragment)?;
    let fields = decode_fragment(fragment)?;

    let score = score_from(lookup(&fields, SCORE_KEYS))?;
    let outcome = outcome_from(lookup(&fields, OUTCOME_KEYS))?;
    let rationale = match lookup(&fields, RATIONALE_KEYS) {
        Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
        _ => return Err(ParseError::MissingRationale),
    };

    Verdict::new(score, outcome, rationale)
}

/// Locate the first balanced `{...}` span in `text`.
///
/// Single pass from the first `{`, keeping open braces on a stack. Braces
/// inside JSON string literals are ignored. When an outer `{` never closes,
/// the earliest-opening brace that does close wins.
pub(crate) fn find_structured_fragment(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let mut open: Vec<usize> = Vec::new();
    let mut earliest: Option<(usize, usize)> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[first..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        let idx = first + offset;
        match ch {
            '"' => in_string = true,
            '{' => open.push(idx),
            '}' => {
                let Some(start) = open.pop() else {
                    continue;
                };
                let end = idx + ch.len_utf8();
                if open.is_empty() {
                    return Some(&text[start..end]);
                }
                if !matches!(earliest, Some((best, _)) if best < start) {
                    earliest = Some((start, end));
                }
            }
            _ => {}
        }
    }
    earliest.map(|(start, end)| &text[start..end])
}

fn decode_fragment(fragment: &str) -> Result<Map<String, Value>, ParseError> {
    let malformed = |reason: String| ParseError::MalformedFragment {
        fragment: preview(fragment),
        reason,
    };
    match serde_json::from_str::<Value>(fragment) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(malformed("fragment is not an object".to_string())),
        Err(err) => Err(malformed(err.to_string())),
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key))
}

fn score_from(value: Option<&Value>) -> Result<u8, ParseError> {
    let invalid = |found: String| ParseError::InvalidScore { found };
    let value = value.ok_or_else(|| invalid("nothing".to_string()))?;

    let number = match value {
        Value::Number(number) => number.as_i64().or_else(|| integral(number.as_f64())),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| integral(text.parse::<f64>().ok()))
        }
        _ => None,
    };

    match number {
        Some(n) if (0..=MAX_SCORE).contains(&n) => u8::try_from(n).map_err(|_| invalid(value.to_string())),
        _ => Err(invalid(value.to_string())),
    }
}

fn integral(number: Option<f64>) -> Option<i64> {
    let number = number?;
    if number.is_finite() && number.fract() == 0.0 && number.abs() <= i64::MAX as f64 {
        Some(number as i64)
    } else {
        None
    }
}

fn outcome_from(value: Option<&Value>) -> Result<Outcome, ParseError> {
    match value {
        Some(Value::String(label)) => {
            Outcome::from_label(label).ok_or_else(|| ParseError::InvalidOutcome {
                found: format!("{label:?}"),
            })
        }
        Some(other) => Err(ParseError::InvalidOutcome {
            found: other.to_string(),
        }),
        None => Err(ParseError::InvalidOutcome {
            found: "nothing".to_string(),
        }),
    }
}

fn preview(fragment: &str) -> String {
    if fragment.chars().count() <= FRAGMENT_PREVIEW_CHARS {
        return fragment.to_string();
    }
    let cut: String = fragment.chars().take(FRAGMENT_PREVIEW_CHARS).collect();
    format!("{cut}...(truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prose_wrapped_object_with_string_score() {
        let text = "Analisei a tradução com cuidado.\nHere is the result: {\"nota\": \"95\", \"resultado\": \"Aprovado\", \"justificativa\": \"No issues found.\"}";
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.score(), 95);
        assert_eq!(verdict.outcome(), Outcome::Approved);
        assert_eq!(verdict.rationale(), "No issues found.");
    }

    #[test]
    fn rejects_out_of_range_score() {
        let text = r#"{"nota": 150, "resultado": "Aprovado", "justificativa": "ok"}"#;
        assert!(matches!(
            parse_verdict(text),
            Err(ParseError::InvalidScore { .. })
        ));
    }

    #[test]
    fn rejects_negative_and_fractional_scores() {
        for score in ["-1", "87.5", "\"noventa\"", "null", "true"] {
            let text = format!(
                r#"{{"nota": {score}, "resultado": "Aprovado", "justificativa": "ok"}}"#
            );
            assert!(
                matches!(parse_verdict(&text), Err(ParseError::InvalidScore { .. })),
                "score {score} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_integral_float_score() {
        let text = r#"{"nota": 80.0, "resultado": "Rejeitado", "justificativa": "Nome incorreto."}"#;
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.score(), 80);
        assert_eq!(verdict.outcome(), Outcome::Rejected);
    }

    #[test]
    fn missing_score_is_invalid_score() {
        let text = r#"{"resultado": "Aprovado", "justificativa": "ok"}"#;
        assert!(matches!(
            parse_verdict(text),
            Err(ParseError::InvalidScore { .. })
        ));
    }

    #[test]
    fn rejects_english_outcome_label() {
        let text = r#"{"nota": 80, "resultado": "Approved", "justificativa": "ok"}"#;
        assert_eq!(
            parse_verdict(text),
            Err(ParseError::InvalidOutcome {
                found: "\"Approved\"".to_string()
            })
        );
    }

    #[test]
    fn rejects_case_and_gender_variants_of_outcome() {
        for label in ["aprovado", "APROVADO", "Aprovada", " Aprovado"] {
            let text = format!(
                r#"{{"nota": 90, "resultado": "{label}", "justificativa": "ok"}}"#
            );
            assert!(
                matches!(parse_verdict(&text), Err(ParseError::InvalidOutcome { .. })),
                "label {label:?} should be rejected"
            );
        }
    }

    #[test]
    fn missing_or_blank_rationale_is_rejected() {
        for text in [
            r#"{"nota": 90, "resultado": "Aprovado"}"#,
            r#"{"nota": 90, "resultado": "Aprovado", "justificativa": "   "}"#,
            r#"{"nota": 90, "resultado": "Aprovado", "justificativa": 3}"#,
        ] {
            assert_eq!(parse_verdict(text), Err(ParseError::MissingRationale));
        }
    }

    #[test]
    fn no_braces_means_no_fragment() {
        assert_eq!(
            parse_verdict("Aprovado, nota 100, sem problemas."),
            Err(ParseError::NoStructuredFragment)
        );
    }

    #[test]
    fn unclosed_brace_means_no_fragment() {
        assert_eq!(
            parse_verdict("resultado: { \"nota\": 90"),
            Err(ParseError::NoStructuredFragment)
        );
    }

    #[test]
    fn malformed_fragment_carries_fragment_text() {
        let err = parse_verdict("Resultado: {nota: 90, resultado: Aprovado}").unwrap_err();
        match err {
            ParseError::MalformedFragment { fragment, .. } => {
                assert_eq!(fragment, "{nota: 90, resultado: Aprovado}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn first_of_several_fragments_wins() {
        let text = concat!(
            r#"{"nota": 40, "resultado": "Rejeitado", "justificativa": "Número do RG divergente."}"#,
            "\nou talvez\n",
            r#"{"nota": 100, "resultado": "Aprovado", "justificativa": "Tudo certo."}"#
        );
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.score(), 40);
        assert_eq!(verdict.outcome(), Outcome::Rejected);
    }

    #[test]
    fn low_score_keeps_stated_approval_and_high_score_keeps_rejection() {
        let approved =
            parse_verdict(r#"{"nota": 10, "resultado": "Aprovado", "justificativa": "x"}"#).unwrap();
        assert_eq!(approved.outcome(), Outcome::Approved);
        let rejected =
            parse_verdict(r#"{"nota": 100, "resultado": "Rejeitado", "justificativa": "Nome errado."}"#)
                .unwrap();
        assert_eq!(rejected.outcome(), Outcome::Rejected);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_fragment() {
        let text = r#"Veredito: {"nota": 70, "resultado": "Aprovado", "justificativa": "Trecho {data} mal formatado."} fim"#;
        let verdict = parse_verdict(text).unwrap();
        assert_eq!(verdict.rationale(), "Trecho {data} mal formatado.");
    }

    #[test]
    fn code_fenced_object_is_found() {
        let text = "```json\n{\n  \"nota\": 100,\n  \"resultado\": \"Aprovado\",\n  \"justificativa\": \"Tradução fiel.\"\n}\n```";
        assert_eq!(parse_verdict(text).unwrap().score(), 100);
    }

    #[test]
    fn english_field_aliases_are_accepted() {
        let text = r#"{"score": 88, "outcome": "Aprovado", "rationale": "Pequenos ajustes."}"#;
        assert_eq!(parse_verdict(text).unwrap().score(), 88);
    }

    #[test]
    fn reparsing_serialized_verdict_is_identity() {
        let verdict = Verdict::new(73, Outcome::Rejected, "Nome \"Joao\" grafado {errado}.").unwrap();
        let json = serde_json::to_string(&verdict).unwrap();
        assert_eq!(parse_verdict(&json).unwrap(), verdict);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let verdict = Verdict::new(95, Outcome::Approved, "ok").unwrap();
        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"nota": 95, "resultado": "Aprovado", "justificativa": "ok"})
        );
    }

    #[test]
    fn constructor_enforces_invariants() {
        assert!(matches!(
            Verdict::new(101, Outcome::Approved, "ok"),
            Err(ParseError::InvalidScore { .. })
        ));
        assert_eq!(
            Verdict::new(50, Outcome::Approved, " "),
            Err(ParseError::MissingRationale)
        );
    }

    #[test]
    fn fragment_scan_skips_unbalanced_prefix() {
        assert_eq!(
            find_structured_fragment("{ aberto {\"a\": 1}"),
            Some("{\"a\": 1}")
        );
        assert_eq!(find_structured_fragment("} {\"a\": {\"b\": 2}} x"), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn fragment_scan_prefers_earliest_closing_brace() {
        assert_eq!(
            find_structured_fragment("{ { {\"a\": 1} } {\"b\": 2}"),
            Some("{ {\"a\": 1} }")
        );
    }

    #[test]
    fn many_unclosed_braces_stay_linear() {
        let noise = "{ ".repeat(200_000);
        assert_eq!(find_structured_fragment(&noise), None);

        let text = format!(
            "{noise}{}",
            r#"{"nota": 80, "resultado": "Aprovado", "justificativa": "ok"}"#
        );
        assert_eq!(parse_verdict(&text).unwrap().score(), 80);
    }
}
