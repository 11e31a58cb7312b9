//! Opt-in retry policy around any [`GenerationClient`].
use super::{GenerationClient, GenerationRequest, ServiceError};
use std::time::Duration;

/// Retries transient failures with linear backoff.
///
/// With `max_retries == 0` this is a pass-through.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
    backoff: Duration,
}

impl<C: GenerationClient> RetryingClient<C> {
    pub fn new(inner: C, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

impl<C: GenerationClient> GenerationClient for RetryingClient<C> {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(request) {
                Ok(text) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "generation retry succeeded");
                    }
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "generation failed, retrying"
                    );
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
