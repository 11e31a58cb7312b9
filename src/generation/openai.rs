//! Chat-completions backend over HTTP.
//!
//! Speaks the OpenAI `/v1/chat/completions` wire format, which most hosted
//! and self-hosted gateways also accept.
use super::{non_empty, truncate_for_error, GenerationClient, GenerationRequest, ServiceError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub struct OpenAiClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: format!("{}{COMPLETIONS_PATH}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [super::ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl GenerationClient for OpenAiClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
        };

        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send_json(&body)
            .map_err(|err| match err {
                ureq::Error::Timeout(_) => ServiceError::Timeout(self.timeout),
                other => ServiceError::Transport(other.to_string()),
            })?;

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| match err {
                ureq::Error::Timeout(_) => ServiceError::Timeout(self.timeout),
                other => ServiceError::MalformedResponse(format!("read body: {other}")),
            })?;

        tracing::debug!(
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = text.len(),
            "chat completion response"
        );

        match status {
            200..=299 => parse_completion(&text),
            429 => Err(ServiceError::RateLimited(truncate_for_error(&text))),
            _ => Err(ServiceError::Status {
                status,
                body: truncate_for_error(&text),
            }),
        }
    }
}

fn parse_completion(body: &str) -> Result<String, ServiceError> {
    let completion: Completion = serde_json::from_str(body)
        .map_err(|err| ServiceError::MalformedResponse(format!("decode completion: {err}")))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::MalformedResponse("completion has no message content".into()))?;
    non_empty(content)
}
