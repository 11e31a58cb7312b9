//! Boundary to the external text-generation service.
//!
//! The core only sees [`GenerationClient`]: one request in, raw text or a
//! [`ServiceError`] out. Backends never return empty or synthetic text on
//! failure, and none of them retry on their own; [`RetryingClient`] is an
//! opt-in decorator layered on top.
mod command;
mod openai;
mod retry;

pub use command::CommandClient;
pub use openai::OpenAiClient;
pub use retry::RetryingClient;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Failures of the generation boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("generation service unreachable: {0}")]
    Transport(String),
    #[error("generation service timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation service rate limited the request: {0}")]
    RateLimited(String),
    #[error("generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation service response is malformed: {0}")]
    MalformedResponse(String),
    #[error("generation service returned an empty completion")]
    EmptyResponse,
    #[error("generation command failed: {0}")]
    Command(String),
}

impl ServiceError {
    /// Whether a retry layer may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::MalformedResponse(_) | Self::EmptyResponse | Self::Command(_) => false,
        }
    }
}

/// Sends one request to a text-generation service.
///
/// Implementations are shared across concurrent evaluations and must not
/// hold per-request mutable state.
pub trait GenerationClient: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}

impl<C: GenerationClient + ?Sized> GenerationClient for std::sync::Arc<C> {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        (**self).generate(request)
    }
}

impl<C: GenerationClient + ?Sized> GenerationClient for Box<C> {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        (**self).generate(request)
    }
}

/// Reject completions that carry no text.
fn non_empty(text: String) -> Result<String, ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(text)
}

fn truncate_for_error(text: &str) -> String {
    const MAX_CHARS: usize = 500;
    if text.chars().count() <= MAX_CHARS {
        return text.trim().to_string();
    }
    let cut: String = text.chars().take(MAX_CHARS).collect();
    format!("{}...(truncated)", cut.trim_end())
}
