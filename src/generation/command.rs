//! Local command backend.
//!
//! Runs a user-configured command with the prompt on stdin and takes stdout
//! as the completion. Any tool that reads text and writes text works
//! (`llm`, `ollama run`, a caching wrapper script). The model id and
//! temperature are exported as `TREV_MODEL` and `TREV_TEMPERATURE` so
//! wrappers can forward them.
use super::{non_empty, truncate_for_error, GenerationClient, GenerationRequest, ServiceError};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandClient {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandClient {
    /// Parse `command` with shell quoting rules.
    pub fn new(command: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let argv = shell_words::split(command)
            .map_err(|err| ServiceError::Command(format!("parse command {command:?}: {err}")))?;
        if argv.is_empty() {
            return Err(ServiceError::Command("command is empty".to_string()));
        }
        Ok(Self { argv, timeout })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl GenerationClient for CommandClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let prompt = request
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let start = Instant::now();
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .env("TREV_MODEL", &request.model)
            .env("TREV_TEMPERATURE", request.temperature.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches whatever a wrapper
        // script starts.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command
            .spawn()
            .map_err(|err| ServiceError::Command(format!("spawn {}: {err}", self.argv[0])))?;

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // Broken pipes surface through the exit status.
                let _ = stdin.write_all(prompt.as_bytes());
            }
        });
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        // On timeout the pipe threads are left detached: a process that
        // escaped the group may still hold the pipes open.
        let Some(status) = wait_with_deadline(&mut child, self.timeout)? else {
            tracing::warn!(
                program = %self.argv[0],
                timeout_ms = self.timeout.as_millis() as u64,
                "generation command timed out"
            );
            return Err(ServiceError::Timeout(self.timeout));
        };
        let _ = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        tracing::debug!(
            program = %self.argv[0],
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = stdout.len(),
            "generation command complete"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(ServiceError::Command(format!(
                "{} exited with {status}: {}",
                self.argv[0],
                truncate_for_error(&stderr)
            )));
        }

        let text = String::from_utf8(stdout)
            .map_err(|err| ServiceError::MalformedResponse(format!("stdout is not UTF-8: {err}")))?;
        non_empty(text)
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for `child`, killing it once `timeout` elapses. `None` means killed.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>, ServiceError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() >= deadline => {
                kill_process_group(child);
                let _ = child.wait();
                return Ok(None);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(ServiceError::Command(format!("wait for command: {err}"))),
        }
    }
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // The child leads its own group (see `process_group(0)` at spawn).
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.kill();
}
