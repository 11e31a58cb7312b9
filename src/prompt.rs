//! Instruction text for each evaluation stage.
//!
//! Stage bodies are markdown files embedded at compile time. Each body
//! carries its own rubric and output directive; the document texts are
//! spliced into `"""` delimited blocks through the `{source}` and
//! `{translation}` placeholders.
//!
//! Substitution happens in a single left-to-right pass over the template, so
//! document text that happens to contain `{translation}` or stray braces is
//! copied through untouched.
use crate::stage::StageKind;

const CLASSIFICATION: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/classification.md"
));
const REVIEW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/review.md"));
const CORRECTION: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/correction.md"
));
const VERDICT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/verdict.md"));

const SOURCE_KEY: &str = "source";
const TRANSLATION_KEY: &str = "translation";

fn template_for(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Classification => CLASSIFICATION,
        StageKind::Review => REVIEW,
        StageKind::Correction => CORRECTION,
        StageKind::Verdict => VERDICT,
    }
}

/// Build the full instruction for `stage` over the two document texts.
///
/// Classification only embeds the source text; the other stages embed both.
pub fn render_prompt(stage: StageKind, source: &str, translation: &str) -> String {
    fill_template(
        template_for(stage),
        &[(SOURCE_KEY, source), (TRANSLATION_KEY, translation)],
    )
}

fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open + 1..];
        let hit = values.iter().find(|(key, _)| {
            candidate.starts_with(key) && candidate[key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &candidate[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}
