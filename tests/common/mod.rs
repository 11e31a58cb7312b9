//! Shared test infrastructure for integration tests.
//!
//! Runs the compiled `trev` binary against a shell-script generation command
//! that answers by stage and records every call it receives.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const MOCK_LM: &str = r#"#!/bin/sh
prompt=$(cat)
case "$prompt" in
  *"classificador de documentos"*) stage=classification ;;
  *"tradutor juramentado"*) stage=review ;;
  *"revisor profissional"*) stage=correction ;;
  *) stage=verdict ;;
esac
echo "$stage" >> "$TREV_MOCK_LOG"
if [ "$stage" = "$TREV_MOCK_FAIL" ]; then
  echo "mock backend unavailable" >&2
  exit 3
fi
case "$stage" in
  classification) echo "Certidão de Nascimento" ;;
  review) echo "- Data de nascimento divergente: '12/03' traduzido como '21/03'." ;;
  correction) echo "- Correção necessária: 'nato il 21/03' -----> 'nato il 12/03'" ;;
  verdict) printf '%s\n' "$TREV_MOCK_VERDICT" ;;
esac
"#;

pub const APPROVED_VERDICT: &str =
    r#"Análise: {"nota": "90", "resultado": "Aprovado", "justificativa": "Apenas uma data a corrigir."}"#;

/// Temp workspace holding the mock LM script, its call log, and inputs.
pub struct TestFixture {
    dir: TempDir,
    fail_stage: Option<&'static str>,
    verdict: String,
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(dir.path().join("mock_lm.sh"), MOCK_LM).expect("write mock LM");
        Self {
            dir,
            fail_stage: None,
            verdict: APPROVED_VERDICT.to_string(),
        }
    }

    /// Make the mock fail when it is asked for `stage`.
    pub fn failing_on(mut self, stage: &'static str) -> Self {
        self.fail_stage = Some(stage);
        self
    }

    pub fn with_verdict(mut self, verdict: &str) -> Self {
        self.verdict = verdict.to_string();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an input file into the fixture directory.
    pub fn write_input(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, contents).expect("write input");
        path
    }

    /// Stages the mock was asked for, in call order.
    pub fn calls(&self) -> Vec<String> {
        match fs::read_to_string(self.path().join("calls.log")) {
            Ok(log) => log.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_trev"));
        let lm_command = format!("sh {}", self.path().join("mock_lm.sh").display());
        cmd.args(args)
            .arg("--lm-command")
            .arg(lm_command)
            .env_remove("OPENAI_API_KEY")
            .env_remove("TREV_MODEL")
            .env_remove("TREV_BASE_URL")
            .env_remove("TREV_LM_COMMAND")
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("HOME", self.path())
            .env("RUST_LOG", "warn")
            .env("TREV_MOCK_LOG", self.path().join("calls.log"))
            .env("TREV_MOCK_FAIL", self.fail_stage.unwrap_or(""))
            .env("TREV_MOCK_VERDICT", &self.verdict)
            .stdin(Stdio::null());
        cmd
    }

    /// Run `trev` with the mock LM command appended to `args`.
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run trev")
    }

    /// Run `trev` without the mock backend flag (for commands that take none).
    pub fn run_plain(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_trev"))
            .args(args)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::null())
            .output()
            .expect("run trev")
    }
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Parse NDJSON stdout into values.
pub fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    stdout_of(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is JSON"))
        .collect()
}
