use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

mod cli;
mod config;
mod generation;
mod pipeline;
mod prompt;
mod server;
mod stage;
mod verdict;

use cli::{Command, EvaluateArgs, InputArgs, PromptArgs, RootArgs, ServeArgs, StageArgs};
use pipeline::{
    run_pipeline, validate_stage_input, EvaluationRequest, PipelineState, StageEntry,
    StageExecutor, StageOutput, ValidationError,
};

const EXIT_INVALID_INPUT: u8 = 2;

/// Flag combinations clap cannot reject on its own.
#[derive(Debug, thiserror::Error)]
enum UsageError {
    #[error("only one of --original and --translation can read stdin")]
    StdinReadTwice,
}

/// Usage mistakes and blank input exit with 2; everything else with 1.
fn exit_status_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ValidationError>().is_some() || err.downcast_ref::<UsageError>().is_some()
    {
        EXIT_INVALID_INPUT
    } else {
        1
    }
}

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_logging();

    let result = match args.command {
        Command::Evaluate(args) => cmd_evaluate(args),
        Command::Stage(args) => cmd_stage(args),
        Command::Prompt(args) => cmd_prompt(args),
        Command::Serve(args) => cmd_serve(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status_for(&err))
        }
    }
}

/// Logs go to stderr so stdout carries only results.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn cmd_evaluate(args: EvaluateArgs) -> Result<ExitCode> {
    let (source, translated) = read_inputs(&args.input)?;
    let request = EvaluationRequest::new(&source, &translated)?;

    let config =
        config::resolve_from_env(args.service.config.as_deref(), &args.service.overrides())?;
    tracing::info!(service = %config.describe(), "evaluating translation");
    let client = config.build_client()?;
    let settings = config.stage_settings();
    let executor = StageExecutor::new(client.as_ref(), &settings);

    let mut out = io::stdout().lock();
    let mut write_failure = None;
    let outcome = run_pipeline(&executor, &request, |entry| {
        let written = if args.json {
            write_json_line(&mut out, &entry.report())
        } else {
            out.write_all(render_entry(entry).as_bytes())
                .and_then(|()| out.flush())
        };
        if let Err(err) = written {
            write_failure.get_or_insert(err);
        }
    });
    if let Some(err) = write_failure {
        return Err(err).context("write stage results");
    }
    if args.json {
        write_json_line(&mut out, &serde_json::json!({ "status": outcome.state() }))
            .context("write pipeline status")?;
    } else if let Some(failure) = outcome.failure() {
        writeln!(out, "Evaluation stopped at the {} stage.", failure.stage)?;
    } else if let Some(verdict) = outcome.verdict() {
        let decision = if verdict.is_approved() { "approved" } else { "rejected" };
        writeln!(out, "Translation {decision}.")?;
    }
    tracing::info!(
        stages = outcome.entries().len(),
        state = ?outcome.state(),
        "evaluation finished"
    );

    Ok(match outcome.state() {
        PipelineState::Done => ExitCode::SUCCESS,
        PipelineState::Aborted => ExitCode::FAILURE,
    })
}

fn cmd_stage(args: StageArgs) -> Result<ExitCode> {
    let (source, translated) = read_inputs(&args.input)?;
    let (source, translated) = validate_stage_input(args.stage, &source, &translated)?;

    let config =
        config::resolve_from_env(args.service.config.as_deref(), &args.service.overrides())?;
    let client = config.build_client()?;
    let settings = config.stage_settings();
    let executor = StageExecutor::new(client.as_ref(), &settings);

    let entry = StageEntry {
        stage: args.stage,
        result: executor.run(args.stage, source, translated),
    };
    let mut out = io::stdout().lock();
    if args.json {
        write_json_line(&mut out, &entry.report())?;
    } else {
        write!(out, "{}", render_entry(&entry))?;
    }
    Ok(if entry.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_prompt(args: PromptArgs) -> Result<ExitCode> {
    let (source, translated) = read_inputs(&args.input)?;
    let (source, translated) = validate_stage_input(args.stage, &source, &translated)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", prompt::render_prompt(args.stage, source, translated))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_serve(args: ServeArgs) -> Result<ExitCode> {
    let config =
        config::resolve_from_env(args.service.config.as_deref(), &args.service.overrides())?;
    tracing::info!(service = %config.describe(), addr = %args.addr, "starting server");
    let state = Arc::new(server::AppState {
        client: config.build_client()?,
        settings: config.stage_settings(),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(server::serve(args.addr, state))?;
    Ok(ExitCode::SUCCESS)
}

/// Read both texts; a missing translation reads as empty so validation can
/// decide whether the stage needs it.
fn read_inputs(input: &InputArgs) -> Result<(String, String)> {
    let is_stdin = |path: &Option<std::path::PathBuf>| {
        path.as_deref().is_some_and(|path| path == Path::new("-"))
    };
    if is_stdin(&input.original) && is_stdin(&input.translation) {
        return Err(UsageError::StdinReadTwice.into());
    }
    let source = read_text(input.original.as_deref(), input.original_text.as_deref())
        .context("read source text")?;
    let translated = read_text(input.translation.as_deref(), input.translation_text.as_deref())
        .context("read translated text")?;
    Ok((source, translated))
}

fn read_text(path: Option<&Path>, inline: Option<&str>) -> Result<String> {
    match (path, inline) {
        (Some(path), _) if path == Path::new("-") => {
            io::read_to_string(io::stdin()).context("read stdin")
        }
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display())),
        (None, Some(text)) => Ok(text.to_string()),
        (None, None) => Ok(String::new()),
    }
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Terminal rendering of one stage result.
fn render_entry(entry: &StageEntry) -> String {
    let mut text = format!("== {} ==\n", entry.stage.title());
    match &entry.result {
        Ok(StageOutput::Verdict(verdict)) => {
            text.push_str(&format!(
                "Result: {}\nScore: {}/100\nJustification: {}\n",
                verdict.outcome(),
                verdict.score(),
                verdict.rationale()
            ));
        }
        Ok(output) => {
            text.push_str(output.text().unwrap_or_default());
            text.push('\n');
        }
        Err(err) => {
            text.push_str(&format!("FAILED: {}\n", err.failure));
        }
    }
    text.push('\n');
    text
}
