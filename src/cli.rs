//! CLI argument parsing for translation review.
//!
//! Every command takes the same generation flags so a run can be pointed at
//! a local LM command or a different model without touching the config file.
use crate::config::Overrides;
use crate::stage::StageKind;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "trev",
    version,
    about = "LM-assisted review of certified document translations",
    after_help = "Commands:\n  evaluate --original <file> --translation <file>  Run all four stages in order\n  stage <kind> --original <file> [--translation <file>]  Run a single stage\n  prompt <kind> --original <file> [--translation <file>]  Print a rendered prompt\n  serve [--addr <addr>]                             Serve the HTTP endpoints\n\nExamples:\n  trev evaluate --original rg.txt --translation rg.it.txt\n  trev evaluate --original rg.txt --translation rg.it.txt --json\n  trev stage verdict --original rg.txt --translation rg.it.txt\n  trev prompt classification --original-text 'CERTIDÃO DE NASCIMENTO'\n  TREV_LM_COMMAND='ollama run llama3' trev serve --addr 0.0.0.0:3000",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Evaluate(EvaluateArgs),
    Stage(StageArgs),
    Prompt(PromptArgs),
    Serve(ServeArgs),
}

/// Source and translated text, from files (`-` for stdin) or inline.
#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// File holding the source document text ("-" reads stdin)
    #[arg(long, value_name = "PATH", conflicts_with = "original_text")]
    pub original: Option<PathBuf>,

    /// Source document text given inline
    #[arg(long, value_name = "TEXT")]
    pub original_text: Option<String>,

    /// File holding the translated text ("-" reads stdin)
    #[arg(long, value_name = "PATH", conflicts_with = "translation_text")]
    pub translation: Option<PathBuf>,

    /// Translated text given inline
    #[arg(long, value_name = "TEXT")]
    pub translation_text: Option<String>,
}

/// Generation service flags; each overrides the config file and environment.
#[derive(Args, Debug, Default)]
pub struct ServiceArgs {
    /// Config file (default: <config dir>/translation-review/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model identifier sent with every request
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible chat completions API
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Local command that reads a prompt on stdin and answers on stdout
    #[arg(long, value_name = "CMD")]
    pub lm_command: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

impl ServiceArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            lm_command: self.lm_command.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Evaluate command inputs.
#[derive(Parser, Debug)]
#[command(about = "Run classification, review, correction and verdict in order")]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub service: ServiceArgs,

    /// Emit one JSON object per stage (NDJSON) instead of text
    #[arg(long)]
    pub json: bool,
}

/// Single-stage command inputs.
#[derive(Parser, Debug)]
#[command(about = "Run one evaluation stage")]
pub struct StageArgs {
    /// Stage to run
    #[arg(value_enum)]
    pub stage: StageKind,

    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub service: ServiceArgs,

    /// Emit the stage result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Prompt preview inputs. No generation call is made.
#[derive(Parser, Debug)]
#[command(about = "Print the prompt a stage would send")]
pub struct PromptArgs {
    /// Stage whose prompt to render
    #[arg(value_enum)]
    pub stage: StageKind,

    #[command(flatten)]
    pub input: InputArgs,
}

/// Serve command inputs.
#[derive(Parser, Debug)]
#[command(about = "Serve the per-stage HTTP endpoints")]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub addr: SocketAddr,

    #[command(flatten)]
    pub service: ServiceArgs,
}
